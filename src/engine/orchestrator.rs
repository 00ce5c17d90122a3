// Sequencing of the raw and sample passes

use tracing::{debug, info};

use super::{
    ConfigError, EncoderSettings, EncodingJob, PassKind, PipelineError, PipelineExecutor,
    PipelineResult, PipelineSpec, build_pipeline,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    RunningRaw,
    RunningSample,
    Done,
    Terminated { exit_code: i32 },
}

/// Notification sent around each pass
#[derive(Debug)]
pub enum PassEvent<'a> {
    Started {
        spec: &'a PipelineSpec,
    },
    Finished {
        spec: &'a PipelineSpec,
        result: &'a PipelineResult,
    },
}

#[derive(Debug, Clone)]
pub struct RunReport {
    /// One entry per pipeline actually run, in order
    pub results: Vec<PipelineResult>,
    /// Exit status of the last pipeline attempted
    pub exit_code: i32,
    /// Every state the orchestrator went through, starting at `Idle`
    pub states: Vec<OrchestratorState>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Build every spec the job needs, raw first.
///
/// Runs before anything is spawned so template problems surface up front.
/// The sample spec is only built when sampling is enabled.
pub fn plan_passes(
    job: &EncodingJob,
    settings: &EncoderSettings,
) -> Result<Vec<PipelineSpec>, ConfigError> {
    let mut specs = vec![build_pipeline(job, settings, PassKind::Raw)?];
    if job.sample_enabled {
        specs.push(build_pipeline(job, settings, PassKind::Sample)?);
    }
    Ok(specs)
}

pub struct Orchestrator<'a, E> {
    job: &'a EncodingJob,
    settings: &'a EncoderSettings,
    executor: E,
    states: Vec<OrchestratorState>,
}

impl<'a, E> Orchestrator<'a, E>
where
    E: PipelineExecutor,
{
    pub fn new(job: &'a EncodingJob, settings: &'a EncoderSettings, executor: E) -> Self {
        Self {
            job,
            settings,
            executor,
            states: vec![OrchestratorState::Idle],
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.states
            .last()
            .copied()
            .unwrap_or(OrchestratorState::Idle)
    }

    fn transition(&mut self, next: OrchestratorState) {
        debug!(from = ?self.state(), to = ?next, "orchestrator transition");
        self.states.push(next);
    }

    fn report(&mut self, results: Vec<PipelineResult>, exit_code: i32) -> RunReport {
        self.transition(OrchestratorState::Terminated { exit_code });
        RunReport {
            results,
            exit_code,
            states: std::mem::take(&mut self.states),
        }
    }

    /// Run the raw pass, then the sample pass if enabled and the raw pass succeeded.
    ///
    /// A failed pipeline ends the run with that pipeline's exit code. Launch
    /// and I/O errors end it with their sentinel code and are returned as errors.
    pub fn run(
        mut self,
        notify: &mut dyn FnMut(&PassEvent),
    ) -> Result<RunReport, PipelineError> {
        let specs = match plan_passes(self.job, self.settings) {
            Ok(specs) => specs,
            Err(e) => {
                let err = PipelineError::from(e);
                self.transition(OrchestratorState::Terminated {
                    exit_code: err.exit_code(),
                });
                return Err(err);
            }
        };

        let mut results = Vec::with_capacity(specs.len());

        for spec in &specs {
            self.transition(match spec.pass {
                PassKind::Raw => OrchestratorState::RunningRaw,
                PassKind::Sample => OrchestratorState::RunningSample,
            });
            notify(&PassEvent::Started { spec });

            let result = match self.executor.execute(spec) {
                Ok(result) => result,
                Err(e) => {
                    self.transition(OrchestratorState::Terminated {
                        exit_code: e.exit_code(),
                    });
                    return Err(e);
                }
            };
            notify(&PassEvent::Finished {
                spec,
                result: &result,
            });

            let (succeeded, exit_code) = (result.succeeded, result.exit_code);
            results.push(result);

            if !succeeded {
                info!(pass = %spec.pass, exit_code, "pass failed, stopping");
                return Ok(self.report(results, exit_code));
            }
        }

        self.transition(OrchestratorState::Done);
        Ok(self.report(results, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{LaunchError, ProcessRole};
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::io;
    use std::path::PathBuf;
    use std::time::Duration;

    /// Executor replaying scripted outcomes: `Ok(code)` or a launch failure
    struct Scripted {
        outcomes: VecDeque<Result<i32, io::ErrorKind>>,
        seen: Vec<PipelineSpec>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<i32, io::ErrorKind>>) -> Self {
            Self {
                outcomes: outcomes.into(),
                seen: Vec::new(),
            }
        }
    }

    impl PipelineExecutor for &mut Scripted {
        fn execute(&mut self, spec: &PipelineSpec) -> Result<PipelineResult, PipelineError> {
            self.seen.push(spec.clone());
            match self.outcomes.pop_front().expect("unexpected pipeline run") {
                Ok(code) => Ok(PipelineResult {
                    pass: spec.pass,
                    succeeded: code == 0,
                    exit_code: code,
                    elapsed: Duration::from_secs(1),
                    producer_exit_code: Some(0),
                    producer_terminated: false,
                    timed_out: false,
                }),
                Err(kind) => Err(LaunchError {
                    role: ProcessRole::Producer,
                    program: spec.producer.program.clone(),
                    source: io::Error::from(kind),
                }
                .into()),
            }
        }
    }

    fn settings() -> EncoderSettings {
        EncoderSettings {
            dump_executable: PathBuf::from("apitrace"),
            encode_executable: PathBuf::from("ffmpeg"),
            raw_args_template: r#"-vcodec libx264 -qp 0 -y "{file}.mkv""#.to_string(),
            sample_args_template: r#"-vcodec mpeg4 -y "{file}.avi""#.to_string(),
        }
    }

    fn job(sample_enabled: bool) -> EncodingJob {
        EncodingJob {
            trace_path: r"C:\captures\level1.trace".to_string(),
            output_dir: PathBuf::from("out"),
            scale: "1920x1080".to_string(),
            fps: 60,
            sample_enabled,
        }
    }

    fn run_with(
        job: &EncodingJob,
        settings: &EncoderSettings,
        executor: &mut Scripted,
    ) -> Result<RunReport, PipelineError> {
        Orchestrator::new(job, settings, executor).run(&mut |_| {})
    }

    #[test]
    fn raw_then_sample_on_success() {
        let (job, settings) = (job(true), settings());
        let mut exec = Scripted::new(vec![Ok(0), Ok(0)]);

        let report = run_with(&job, &settings, &mut exec).unwrap();

        assert!(report.succeeded());
        assert_eq!(report.results.len(), 2);
        assert_eq!(exec.seen[0].pass, PassKind::Raw);
        assert_eq!(exec.seen[1].pass, PassKind::Sample);
        assert_eq!(
            report.states,
            vec![
                OrchestratorState::Idle,
                OrchestratorState::RunningRaw,
                OrchestratorState::RunningSample,
                OrchestratorState::Done,
                OrchestratorState::Terminated { exit_code: 0 },
            ]
        );
    }

    #[test]
    fn raw_failure_skips_sample_and_keeps_exit_code() {
        let (job, settings) = (job(true), settings());
        let mut exec = Scripted::new(vec![Ok(1)]);

        let report = run_with(&job, &settings, &mut exec).unwrap();

        assert_eq!(report.exit_code, 1);
        assert_eq!(report.results.len(), 1);
        assert!(!report.results[0].succeeded);
        assert_eq!(exec.seen.len(), 1);
        assert_eq!(
            report.states.last(),
            Some(&OrchestratorState::Terminated { exit_code: 1 })
        );
        assert!(!report.states.contains(&OrchestratorState::RunningSample));
    }

    #[test]
    fn sample_disabled_runs_a_single_pipeline() {
        let (job, settings) = (job(false), settings());
        let mut exec = Scripted::new(vec![Ok(0)]);

        let report = run_with(&job, &settings, &mut exec).unwrap();

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.exit_code, report.results[0].exit_code);
        assert!(exec.seen.iter().all(|s| s.pass == PassKind::Raw));
    }

    #[test]
    fn sample_failure_decides_overall_status() {
        let (job, settings) = (job(true), settings());
        let mut exec = Scripted::new(vec![Ok(0), Ok(69)]);

        let report = run_with(&job, &settings, &mut exec).unwrap();

        assert_eq!(report.exit_code, 69);
        assert!(report.results[0].succeeded);
        assert!(!report.results[1].succeeded);
    }

    #[test]
    fn bad_sample_template_fails_before_raw_pass_runs() {
        let job = job(true);
        let mut settings = settings();
        settings.sample_args_template = "-vcodec mpeg4 -y out.avi".to_string();
        let mut exec = Scripted::new(vec![]);

        let err = run_with(&job, &settings, &mut exec).unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
        assert!(exec.seen.is_empty());
    }

    #[test]
    fn bad_sample_template_is_ignored_when_sampling_is_off() {
        let job = job(false);
        let mut settings = settings();
        settings.sample_args_template = String::new();
        let mut exec = Scripted::new(vec![Ok(0)]);

        assert!(run_with(&job, &settings, &mut exec).unwrap().succeeded());
    }

    #[test]
    fn launch_error_terminates_with_sentinel_code() {
        let (job, settings) = (job(true), settings());
        let mut exec = Scripted::new(vec![Err(io::ErrorKind::NotFound)]);

        let err = run_with(&job, &settings, &mut exec).unwrap_err();

        assert!(matches!(err, PipelineError::Launch(_)));
        assert_eq!(err.exit_code(), crate::engine::EXIT_LAUNCH_NOT_FOUND);
        assert_eq!(exec.seen.len(), 1);
    }

    #[test]
    fn events_bracket_each_pass() {
        let (job, settings) = (job(true), settings());
        let mut exec = Scripted::new(vec![Ok(0), Ok(0)]);
        let mut log = Vec::new();

        Orchestrator::new(&job, &settings, &mut exec)
            .run(&mut |event| match event {
                PassEvent::Started { spec } => log.push(format!("start {}", spec.pass)),
                PassEvent::Finished { spec, result } => {
                    log.push(format!("end {} {}", spec.pass, result.exit_code))
                }
            })
            .unwrap();

        assert_eq!(
            log,
            vec!["start uncompressed", "end uncompressed 0", "start sample", "end sample 0"]
        );
    }

    #[test]
    fn plan_builds_sample_spec_only_when_enabled() {
        assert_eq!(plan_passes(&job(false), &settings()).unwrap().len(), 1);

        let specs = plan_passes(&job(true), &settings()).unwrap();
        assert_eq!(specs.len(), 2);
        assert!(specs[0].output_stem.ends_with("level1-uncompressed"));
        assert!(specs[1].output_stem.ends_with("level1-sample"));
    }

    proptest! {
        #[test]
        fn sample_runs_only_after_raw_success(
            raw_code in 0i32..4,
            sample_code in 0i32..4,
            sample_enabled in any::<bool>(),
        ) {
            let (job, settings) = (job(sample_enabled), settings());
            let mut exec = Scripted::new(vec![Ok(raw_code), Ok(sample_code)]);

            let report = run_with(&job, &settings, &mut exec).unwrap();

            let expect_sample = sample_enabled && raw_code == 0;
            prop_assert_eq!(exec.seen.len(), if expect_sample { 2 } else { 1 });
            prop_assert_eq!(report.results.len(), exec.seen.len());

            let expected_code = if expect_sample { sample_code } else { raw_code };
            prop_assert_eq!(report.exit_code, expected_code);
            prop_assert_eq!(report.exit_code, report.results.last().unwrap().exit_code);
        }
    }
}
