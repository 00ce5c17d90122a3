// Encoding engine - independent of the CLI

pub mod core;
pub mod orchestrator;
pub mod pipeline;
pub mod validate;

pub use self::core::*;
pub use orchestrator::{Orchestrator, OrchestratorState, PassEvent, RunReport, plan_passes};
pub use pipeline::{PipelineExecutor, PipelineRunner, exit_code_of, run_pipeline};
