use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code for a bad or missing trace argument (sysexits `EX_USAGE`)
pub const EXIT_USAGE: i32 = 64;
/// Exit code for I/O failures in trace2video itself (sysexits `EX_IOERR`)
pub const EXIT_IO: i32 = 74;
/// Exit code for configuration errors (sysexits `EX_CONFIG`)
pub const EXIT_CONFIG: i32 = 78;
/// Exit code reported when a pipeline hits its timeout, as `timeout(1)` does
pub const EXIT_TIMEOUT: i32 = 124;
/// Executable exists but could not be run
pub const EXIT_LAUNCH_NOT_EXECUTABLE: i32 = 126;
/// Executable could not be found
pub const EXIT_LAUNCH_NOT_FOUND: i32 = 127;

/// Invalid configuration or command template, raised before anything is spawned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Which side of a pipeline a process is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    Producer,
    Consumer,
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessRole::Producer => write!(f, "producer"),
            ProcessRole::Consumer => write!(f, "consumer"),
        }
    }
}

/// A child process could not be started at all.
#[derive(Debug, Error)]
#[error("failed to launch {role} `{}`: {source}", program.display())]
pub struct LaunchError {
    pub role: ProcessRole,
    pub program: PathBuf,
    #[source]
    pub source: io::Error,
}

impl LaunchError {
    pub fn exit_code(&self) -> i32 {
        match self.source.kind() {
            io::ErrorKind::NotFound => EXIT_LAUNCH_NOT_FOUND,
            _ => EXIT_LAUNCH_NOT_EXECUTABLE,
        }
    }
}

/// Everything that can stop a pipeline from producing a `PipelineResult`.
///
/// A consumer that runs and exits nonzero is not an error here; it is a
/// failed `PipelineResult` carrying the consumer's exit code.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit status to use when this error ends the run
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => EXIT_CONFIG,
            PipelineError::Launch(e) => e.exit_code(),
            PipelineError::Io { .. } => EXIT_IO,
        }
    }
}
