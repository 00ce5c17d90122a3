mod command;
mod error;
mod log;
mod tools;
mod types;

pub use command::{
    FILE_PLACEHOLDER, build_dump_cmd, build_encode_cmd, build_pipeline, output_stem,
    trace_basename,
};
pub use error::{
    ConfigError, EXIT_CONFIG, EXIT_IO, EXIT_LAUNCH_NOT_EXECUTABLE, EXIT_LAUNCH_NOT_FOUND,
    EXIT_TIMEOUT, EXIT_USAGE, LaunchError, PipelineError, ProcessRole,
};
pub use log::{RUN_LOG_NAME, log_pipeline_result, run_log_path, write_run_log};
pub use tools::{apitrace_version, ffmpeg_version};
pub use types::{
    EncoderSettings, EncodingJob, PassKind, PipelineProgress, PipelineResult, PipelineSpec,
    ProcessCommand, TimeoutPolicy,
};
