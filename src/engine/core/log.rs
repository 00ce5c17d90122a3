use super::types::{PipelineResult, PipelineSpec};
use anyhow::Result;
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const RUN_LOG_NAME: &str = "trace2video.log";

pub fn run_log_path(output_dir: &Path) -> PathBuf {
    output_dir.join(RUN_LOG_NAME)
}

/// Append a timestamped line to the run log in `output_dir`, creating it if needed
pub fn write_run_log(output_dir: &Path, message: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(run_log_path(output_dir))?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
    writeln!(file, "[{}] {}", timestamp, message)?;
    Ok(())
}

/// Record one finished pass: both command lines, exit code and wall time
pub fn log_pipeline_result(
    output_dir: &Path,
    spec: &PipelineSpec,
    result: &PipelineResult,
) -> Result<()> {
    let verdict = if result.succeeded { "✓" } else { "✗" };
    let mut message = format!(
        "{} {} pass exited with {} after {:.1}s\n  {}\n  {}",
        verdict,
        spec.pass,
        result.exit_code,
        result.elapsed_seconds(),
        spec.producer,
        spec.consumer,
    );
    if let Some(code) = result.producer_exit_code.filter(|c| *c != 0) {
        message.push_str(&format!("\n  producer exited with {}", code));
    }
    if result.producer_terminated {
        message.push_str("\n  producer outlived the encoder and was terminated");
    }
    if result.timed_out {
        message.push_str("\n  timed out");
    }
    write_run_log(output_dir, &message)
}
