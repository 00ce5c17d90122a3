use crate::cli::{Cli, Commands, Overrides};
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trace2video::config::{self, Config};
use trace2video::engine::{
    self, EXIT_CONFIG, EXIT_IO, EXIT_USAGE, EncoderSettings, EncodingJob, Orchestrator, PassEvent,
    PassKind, PipelineProgress, PipelineRunner, TimeoutPolicy, validate,
};
use tracing::warn;

const USAGE_HINT: &str = "Drag a .trace file onto trace2video or pass it on the command line:\n    trace2video <TRACE>";

/// Config file plus the directory relative paths in it resolve against
struct Session {
    config: Config,
    config_path: PathBuf,
    base_dir: PathBuf,
}

fn locate_config(explicit: Option<PathBuf>) -> Result<(PathBuf, PathBuf)> {
    match explicit {
        Some(path) => {
            let base = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
                Some(parent) => parent.to_path_buf(),
                None => std::env::current_dir().context("Could not determine current directory")?,
            };
            Ok((path, base))
        }
        None => Ok((Config::config_path()?, config::tool_dir()?)),
    }
}

/// Load the session config; missing files are created only when `create` is set
fn load_session(explicit: Option<PathBuf>, create: bool) -> Result<Session> {
    let (config_path, base_dir) = locate_config(explicit)?;

    let config = if create || config_path.exists() {
        if create && !config_path.exists() {
            println!("First run: creating config file {}", config_path.display());
        }
        Config::load_from(&config_path)?
    } else {
        Config::default()
    };

    Ok(Session {
        config,
        config_path,
        base_dir,
    })
}

fn build_job(session: &Session, overrides: &Overrides, trace: &str) -> EncodingJob {
    let general = &session.config.general;
    EncodingJob {
        trace_path: trace.to_string(),
        output_dir: overrides
            .output
            .clone()
            .unwrap_or_else(|| session.config.output_dir(&session.base_dir)),
        scale: overrides.scale.clone().unwrap_or_else(|| general.scale.clone()),
        fps: overrides.fps.unwrap_or(general.fps),
        sample_enabled: overrides.sample().unwrap_or(general.sample),
    }
}

fn timeout_policy(session: &Session, overrides: &Overrides) -> TimeoutPolicy {
    overrides
        .timeout
        .map(TimeoutPolicy::from_secs)
        .unwrap_or_else(|| session.config.timeout_policy())
}

/// Session, validated job and settings, or the exit code to stop with
fn prepare(
    config_path: Option<PathBuf>,
    overrides: &Overrides,
    trace: &str,
    create_config: bool,
) -> Result<(Session, EncodingJob, EncoderSettings), i32> {
    let session = load_session(config_path, create_config).map_err(|e| {
        eprintln!("Error: {:#}", e);
        EXIT_CONFIG
    })?;

    let job = build_job(&session, overrides, trace);
    if let Err(errors) = validate::validate_job(&job) {
        eprintln!("Error: {}", validate::into_config_error(&errors));
        return Err(EXIT_CONFIG);
    }

    let settings = session.config.encoder_settings(&session.base_dir);
    Ok((session, job, settings))
}

pub fn run(cli: Cli) -> i32 {
    let Cli {
        trace,
        command,
        overrides,
        config,
        ..
    } = cli;

    if let Some(command) = command {
        return match command {
            Commands::DryRun { trace, json } => handle_dry_run(config, &overrides, &trace, json),
            Commands::CheckDeps => handle_check_deps(config),
            Commands::InitConfig => handle_init_config(config),
        };
    }

    match trace {
        Some(trace) if validate::is_trace_argument(&trace) => {
            handle_encode(config, &overrides, &trace)
        }
        Some(other) => {
            eprintln!("'{}' is not a {} file.\n{}", other, validate::TRACE_MARKER, USAGE_HINT);
            EXIT_USAGE
        }
        None => {
            eprintln!("No trace file given.\n{}", USAGE_HINT);
            EXIT_USAGE
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

fn print_progress(progress: &PipelineProgress) {
    let dots = ".".repeat(((progress.tick - 1) % 3 + 1) as usize);
    print!("\r  {:<3} {}", dots, format_elapsed(progress.elapsed));
    std::io::stdout().flush().ok();
}

fn print_job(job: &EncodingJob, settings: &EncoderSettings, timeout: TimeoutPolicy) {
    println!(" Initializing: Configs");
    println!("  trace: {}", job.trace_path);
    println!("  output: {}", job.output_dir.display());
    println!("  scale: {}", job.scale);
    println!("  fps: {}", job.fps);
    println!("  sample: {}", job.sample_enabled);
    println!("  apitrace: {}", settings.dump_executable.display());
    println!("  ffmpeg: {}", settings.encode_executable.display());
    println!("  raw_cmd: {}", settings.raw_args_template);
    println!("  sample_cmd: {}", settings.sample_args_template);
    match timeout {
        TimeoutPolicy::Unbounded => println!("  timeout: none"),
        TimeoutPolicy::After(limit) => println!("  timeout: {}s", limit.as_secs()),
    }
}

fn pass_title(pass: PassKind) -> &'static str {
    match pass {
        PassKind::Raw => "uncompressed video",
        PassKind::Sample => "compressed sample",
    }
}

fn handle_encode(config_path: Option<PathBuf>, overrides: &Overrides, trace: &str) -> i32 {
    println!("trace2video v{}\n", env!("CARGO_PKG_VERSION"));

    let (session, job, settings) = match prepare(config_path, overrides, trace, true) {
        Ok(prepared) => prepared,
        Err(code) => return code,
    };
    let timeout = timeout_policy(&session, overrides);

    // Template problems must surface before the output directory or any process exists
    if let Err(e) = engine::plan_passes(&job, &settings) {
        eprintln!("Error: {}", e);
        return EXIT_CONFIG;
    }

    println!(" Config file: {}\n", session.config_path.display());
    print_job(&job, &settings, timeout);

    println!("\n Checking: output");
    if let Err(e) = fs::create_dir_all(&job.output_dir) {
        eprintln!(
            "Error: Failed to create output directory {}: {}",
            job.output_dir.display(),
            e
        );
        return EXIT_IO;
    }

    println!("\n Warning: Do not resize the render window. It may interrupt the process!\n");

    let output_dir = job.output_dir.clone();
    let runner = PipelineRunner::new(timeout, print_progress);
    let outcome = Orchestrator::new(&job, &settings, runner).run(&mut |event| match event {
        PassEvent::Started { spec } => {
            println!(" Writing: {}", pass_title(spec.pass));
        }
        PassEvent::Finished { spec, result } => {
            println!();
            if let Err(e) = engine::log_pipeline_result(&output_dir, spec, result) {
                warn!("Could not write run log: {:#}", e);
            }
            if result.timed_out {
                eprintln!("Error writing {}: timed out", pass_title(spec.pass));
            } else if !result.succeeded {
                eprintln!(
                    "Error writing {}: ffmpeg exited with {}",
                    pass_title(spec.pass),
                    result.exit_code
                );
            }
        }
    });

    match outcome {
        Ok(report) if report.succeeded() => {
            println!("\n Done :)");
            for result in &report.results {
                println!(
                    "  {}: {}",
                    result.pass,
                    format_elapsed(result.elapsed)
                );
            }
            0
        }
        Ok(report) => report.exit_code,
        Err(e) => {
            println!();
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn handle_dry_run(
    config_path: Option<PathBuf>,
    overrides: &Overrides,
    trace: &str,
    json: bool,
) -> i32 {
    let (_session, job, settings) = match prepare(config_path, overrides, trace, false) {
        Ok(prepared) => prepared,
        Err(code) => return code,
    };

    let specs = match engine::plan_passes(&job, &settings) {
        Ok(specs) => specs,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_CONFIG;
        }
    };

    if json {
        match serde_json::to_string_pretty(&specs) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => {
                eprintln!("Error: Failed to serialize plan: {}", e);
                return EXIT_IO;
            }
        }
    } else {
        println!("Dry run: pipelines for {}", trace);
        for spec in &specs {
            println!("[{}]\n  {}", spec.pass, spec);
        }
    }
    0
}

fn check_tool(name: &str, path: &Path, probe: fn(&Path) -> Result<String>) -> bool {
    match probe(path) {
        Ok(version) => {
            println!("{} found: {}", name, version);
            true
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            false
        }
    }
}

fn handle_check_deps(config_path: Option<PathBuf>) -> i32 {
    let session = match load_session(config_path, false) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return EXIT_CONFIG;
        }
    };
    let settings = session.config.encoder_settings(&session.base_dir);

    let apitrace_ok = check_tool("apitrace", &settings.dump_executable, engine::apitrace_version);
    let ffmpeg_ok = check_tool("ffmpeg", &settings.encode_executable, engine::ffmpeg_version);

    if apitrace_ok && ffmpeg_ok { 0 } else { 1 }
}

fn handle_init_config(config_path: Option<PathBuf>) -> i32 {
    let (path, _base) = match locate_config(config_path) {
        Ok(located) => located,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return EXIT_CONFIG;
        }
    };

    match Config::ensure_default(&path) {
        Ok(true) => {
            println!("Default config saved to {}", path.display());
            0
        }
        Ok(false) => match Config::load_from(&path) {
            Ok(cfg) => {
                println!("Config loaded successfully from {}", path.display());
                println!("{:#?}", cfg);
                0
            }
            Err(e) => {
                eprintln!("Config invalid: {:#}", e);
                EXIT_CONFIG
            }
        },
        Err(e) => {
            eprintln!("Failed to save default config: {:#}", e);
            EXIT_CONFIG
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_formats_as_clock() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_millis(59_999)), "00:00:59");
        assert_eq!(format_elapsed(Duration::from_secs(3 * 3600 + 7 * 60 + 5)), "03:07:05");
    }

    #[test]
    fn overrides_win_over_config() {
        let session = Session {
            config: Config::default(),
            config_path: PathBuf::from("/opt/t2v/trace2video.toml"),
            base_dir: PathBuf::from("/opt/t2v"),
        };
        let overrides = Overrides {
            output: Some(PathBuf::from("/renders")),
            fps: Some(24),
            no_sample: true,
            ..Overrides::default()
        };

        let job = build_job(&session, &overrides, "a.trace");
        assert_eq!(job.output_dir, PathBuf::from("/renders"));
        assert_eq!(job.fps, 24);
        assert_eq!(job.scale, "1920x1080");
        assert!(!job.sample_enabled);

        let job = build_job(&session, &Overrides::default(), "a.trace");
        assert_eq!(job.output_dir, PathBuf::from("/opt/t2v/output"));
        assert!(job.sample_enabled);
        assert_eq!(session.config_path.file_name().unwrap(), "trace2video.toml");
    }
}
