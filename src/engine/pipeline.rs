// Producer | consumer execution with liveness ticks and orphan cleanup

use std::io;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    EXIT_TIMEOUT, LaunchError, PipelineError, PipelineProgress, PipelineResult, PipelineSpec,
    ProcessRole, TimeoutPolicy,
};

/// How often the consumer is polled for exit
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long the producer may keep running after the consumer has exited
pub const PRODUCER_GRACE: Duration = Duration::from_secs(2);

/// How long a child gets between SIGTERM and SIGKILL
pub const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Anything that can run one pipeline to completion.
///
/// `PipelineRunner` spawns real processes; tests plug in scripted executors.
pub trait PipelineExecutor {
    fn execute(&mut self, spec: &PipelineSpec) -> Result<PipelineResult, PipelineError>;
}

/// Runs pipelines as real child processes, reporting progress through a callback
pub struct PipelineRunner<F> {
    timeout: TimeoutPolicy,
    on_progress: F,
}

impl<F> PipelineRunner<F>
where
    F: FnMut(&PipelineProgress),
{
    pub fn new(timeout: TimeoutPolicy, on_progress: F) -> Self {
        Self {
            timeout,
            on_progress,
        }
    }
}

impl<F> PipelineExecutor for PipelineRunner<F>
where
    F: FnMut(&PipelineProgress),
{
    fn execute(&mut self, spec: &PipelineSpec) -> Result<PipelineResult, PipelineError> {
        run_pipeline(spec, self.timeout, &mut self.on_progress)
    }
}

/// Exit code for a finished process; signals map to `128 + signo` like a shell reports them
pub fn exit_code_of(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

/// Owns a spawned child and stops it on drop if it is still running.
///
/// Every exit path out of `run_pipeline` (errors, panics included) goes
/// through here, so neither side of a pipeline is left behind.
struct ChildGuard {
    child: Child,
    role: ProcessRole,
    status: Option<ExitStatus>,
}

impl ChildGuard {
    fn new(child: Child, role: ProcessRole) -> Self {
        Self {
            child,
            role,
            status: None,
        }
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// Poll until the child exits or `timeout` passes
    fn wait_timeout(&mut self, timeout: Duration) -> io::Result<Option<ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL.min(timeout));
        }
    }

    /// Ask the child to stop, then force it, and reap it
    fn terminate(&mut self) -> io::Result<ExitStatus> {
        if let Some(status) = self.try_wait()? {
            return Ok(status);
        }

        debug!(role = %self.role, pid = self.child.id(), "terminating child process");

        #[cfg(unix)]
        {
            // The child has not been reaped yet, so the pid still belongs to it
            unsafe {
                libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM);
            }
            if let Some(status) = self.wait_timeout(TERMINATE_GRACE)? {
                return Ok(status);
            }
            warn!(role = %self.role, "child ignored SIGTERM, killing");
        }

        match self.child.kill() {
            Ok(()) => {}
            // Already exited between the last poll and now
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => warn!(role = %self.role, "failed to kill child: {}", e),
        }
        let status = self.child.wait()?;
        self.status = Some(status);
        Ok(status)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.status.is_none() {
            if let Err(e) = self.terminate() {
                warn!(role = %self.role, "failed to stop child process: {}", e);
            }
        }
    }
}

/// Platform tweaks applied to both children before spawning
fn configure_child(cmd: &mut Command) {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: prctl is async-signal-safe and touches no memory of the parent
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    #[cfg(not(any(target_os = "linux", windows)))]
    let _ = cmd;
}

fn spawn_producer(spec: &PipelineSpec) -> Result<ChildGuard, LaunchError> {
    let mut cmd = spec.producer.to_command();
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::null());
    configure_child(&mut cmd);

    let child = cmd.spawn().map_err(|source| LaunchError {
        role: ProcessRole::Producer,
        program: spec.producer.program.clone(),
        source,
    })?;
    Ok(ChildGuard::new(child, ProcessRole::Producer))
}

/// Spawn the consumer reading directly from the producer's pipe.
///
/// `cmd` holds the parent's copy of the read end and is dropped on return,
/// so the consumer is the only reader left.
fn spawn_consumer(spec: &PipelineSpec, frames: ChildStdout) -> Result<ChildGuard, LaunchError> {
    let mut cmd = spec.consumer.to_command();
    cmd.stdin(Stdio::from(frames));
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::null());
    configure_child(&mut cmd);

    let child = cmd.spawn().map_err(|source| LaunchError {
        role: ProcessRole::Consumer,
        program: spec.consumer.program.clone(),
        source,
    })?;
    Ok(ChildGuard::new(child, ProcessRole::Consumer))
}

/// Run one producer | consumer pipeline to completion.
///
/// The consumer's exit decides the outcome. `on_progress` is called at start
/// and then at least once per second from the polling loop; it never sees
/// child output since both children are silenced.
pub fn run_pipeline(
    spec: &PipelineSpec,
    timeout: TimeoutPolicy,
    on_progress: &mut dyn FnMut(&PipelineProgress),
) -> Result<PipelineResult, PipelineError> {
    info!(pass = %spec.pass, "starting pipeline: {}", spec);
    let started = Instant::now();

    let mut producer = spawn_producer(spec)?;
    let frames = producer.child.stdout.take().ok_or_else(|| {
        PipelineError::io(
            "capturing trace dump output",
            io::Error::other("producer stdout was not piped"),
        )
    })?;

    let mut consumer = match spawn_consumer(spec, frames) {
        Ok(consumer) => consumer,
        Err(e) => {
            warn!(pass = %spec.pass, "encoder failed to launch, stopping trace dump");
            if let Err(stop_err) = producer.terminate() {
                warn!("failed to stop trace dump: {}", stop_err);
            }
            return Err(e.into());
        }
    };

    let mut tick = 0;
    let mut next_tick = Duration::ZERO;
    let mut timed_out = false;

    let status = loop {
        if let Some(status) = consumer
            .try_wait()
            .map_err(|e| PipelineError::io("waiting for encoder", e))?
        {
            break status;
        }

        let elapsed = started.elapsed();
        if timeout.expired(elapsed) {
            warn!(pass = %spec.pass, "pipeline timed out after {:.1}s", elapsed.as_secs_f64());
            timed_out = true;
            break consumer
                .terminate()
                .map_err(|e| PipelineError::io("stopping encoder", e))?;
        }

        if elapsed >= next_tick {
            tick += 1;
            on_progress(&PipelineProgress {
                pass: spec.pass,
                elapsed,
                tick,
            });
            next_tick = Duration::from_secs(elapsed.as_secs() + 1);
        }

        thread::sleep(POLL_INTERVAL);
    };

    // The producer normally finishes first; give it a moment, then stop it
    let grace = if timed_out { Duration::ZERO } else { PRODUCER_GRACE };
    let (producer_exit_code, producer_terminated) = match producer
        .wait_timeout(grace)
        .map_err(|e| PipelineError::io("waiting for trace dump", e))?
    {
        Some(producer_status) => (producer_status.code(), false),
        None => {
            warn!(pass = %spec.pass, "trace dump still running after encoder exited, terminating it");
            producer
                .terminate()
                .map_err(|e| PipelineError::io("stopping trace dump", e))?;
            (None, true)
        }
    };

    let elapsed = started.elapsed();
    let exit_code = if timed_out {
        EXIT_TIMEOUT
    } else {
        exit_code_of(&status)
    };
    let succeeded = !timed_out && status.success();

    if let Some(code) = producer_exit_code.filter(|code| succeeded && *code != 0) {
        warn!(
            pass = %spec.pass,
            "encoder succeeded but trace dump exited with {}; output may be truncated",
            code
        );
    }

    info!(
        pass = %spec.pass,
        exit_code,
        elapsed_s = elapsed.as_secs_f64(),
        "pipeline finished"
    );

    Ok(PipelineResult {
        pass: spec.pass,
        succeeded,
        exit_code,
        elapsed,
        producer_exit_code,
        producer_terminated,
        timed_out,
    })
}
