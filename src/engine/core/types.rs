use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// One trace to encode, fixed for the whole run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingJob {
    pub trace_path: String,
    /// Directory the `<basename>-uncompressed` / `<basename>-sample` outputs land in
    pub output_dir: PathBuf,
    pub scale: String,
    pub fps: u32,
    pub sample_enabled: bool,
}

/// Resolved external tools and the user's ffmpeg argument templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderSettings {
    pub dump_executable: PathBuf,
    pub encode_executable: PathBuf,
    /// Appended after the fixed pipe arguments for the raw pass; must contain `{file}`
    pub raw_args_template: String,
    /// Appended after the fixed pipe arguments for the sample pass; must contain `{file}`
    pub sample_args_template: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassKind {
    Raw,
    Sample,
}

impl PassKind {
    pub fn label(self) -> &'static str {
        match self {
            PassKind::Raw => "uncompressed",
            PassKind::Sample => "sample",
        }
    }

    /// Suffix appended to the trace basename for this pass's output file
    pub fn file_suffix(self) -> &'static str {
        match self {
            PassKind::Raw => "-uncompressed",
            PassKind::Sample => "-sample",
        }
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A program plus its argument vector, run directly without a shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build a `std::process::Command` with program and arguments only.
    /// Stdio wiring is left to the caller.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for ProcessCommand {
    /// Shell-quoted rendering, for display only
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let program = self.program.to_string_lossy();
        let parts = std::iter::once(program.as_ref()).chain(self.args.iter().map(String::as_str));
        for (idx, part) in parts.enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            match shlex::try_quote(part) {
                Ok(quoted) => f.write_str(&quoted)?,
                Err(_) => write!(f, "{:?}", part)?,
            }
        }
        Ok(())
    }
}

/// Producer and consumer for one pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub pass: PassKind,
    pub producer: ProcessCommand,
    pub consumer: ProcessCommand,
    /// Output path without extension, as substituted for `{file}`
    pub output_stem: PathBuf,
}

impl fmt::Display for PipelineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | {}", self.producer, self.consumer)
    }
}

/// Outcome of running one pipeline to completion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub pass: PassKind,
    pub succeeded: bool,
    pub exit_code: i32,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    /// Producer exit code, if it exited on its own with one
    pub producer_exit_code: Option<i32>,
    /// Producer was still running after the consumer finished and had to be stopped
    pub producer_terminated: bool,
    pub timed_out: bool,
}

impl PipelineResult {
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }
}

/// How long a pipeline may run before both processes are stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeoutPolicy {
    #[default]
    Unbounded,
    After(Duration),
}

impl TimeoutPolicy {
    /// `0` means no limit, matching the config file convention
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            TimeoutPolicy::Unbounded
        } else {
            TimeoutPolicy::After(Duration::from_secs(secs))
        }
    }

    pub fn expired(&self, elapsed: Duration) -> bool {
        match self {
            TimeoutPolicy::Unbounded => false,
            TimeoutPolicy::After(limit) => elapsed >= *limit,
        }
    }
}

/// Liveness tick emitted while a pipeline runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineProgress {
    pub pass: PassKind,
    pub elapsed: Duration,
    /// 1 for the first tick, incrementing by one per tick
    pub tick: u64,
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
