//! Checks on an `EncodingJob` before any command is built.

use crate::engine::core::{ConfigError, EncodingJob, trace_basename};
use serde::Serialize;
use std::fmt;

/// Substring a trace argument must contain
pub const TRACE_MARKER: &str = ".trace";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Whether a CLI argument looks like a trace file
pub fn is_trace_argument(arg: &str) -> bool {
    arg.contains(TRACE_MARKER)
}

/// Validate every field of a job, collecting all problems.
pub fn validate_job(job: &EncodingJob) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if !is_trace_argument(&job.trace_path) {
        errors.push(err(
            "trace",
            &format!("'{}' is not a {} file", job.trace_path, TRACE_MARKER),
        ));
    } else if trace_basename(&job.trace_path).is_empty() {
        errors.push(err("trace", "cannot derive an output name from the path"));
    }

    if job.fps == 0 {
        errors.push(err("fps", "must be a positive integer"));
    }

    let scale = job.scale.as_str();
    if scale.is_empty() {
        errors.push(err("scale", "must not be empty"));
    } else if scale.chars().any(char::is_whitespace) {
        errors.push(err("scale", "must not contain whitespace"));
    } else if scale.starts_with('-') {
        errors.push(err("scale", "must be a size such as 1920x1080"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Collapse validation problems into one `ConfigError`
pub fn into_config_error(errors: &[ValidationError]) -> ConfigError {
    let joined = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    ConfigError::new(format!("invalid settings: {}", joined))
}

fn err(field: &str, message: &str) -> ValidationError {
    ValidationError {
        field: field.to_string(),
        message: message.to_string(),
    }
}
