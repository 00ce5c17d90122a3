use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "trace2video")]
#[command(version)]
#[command(about = "Render an apitrace capture to video through ffmpeg", long_about = None)]
pub struct Cli {
    /// Trace file to render (drag and drop works too)
    #[arg(value_name = "TRACE")]
    pub trace: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub overrides: Overrides,

    /// Config file (defaults to trace2video.toml next to the executable)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

/// Per-run overrides for values from the config file
#[derive(clap::Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Output directory
    #[arg(short, long, global = true, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Output size of the uncompressed video, e.g. 1920x1080
    #[arg(long, global = true, value_name = "WxH")]
    pub scale: Option<String>,

    /// Frames per second
    #[arg(long, global = true)]
    pub fps: Option<u32>,

    /// Write the compressed sample (overrides config)
    #[arg(long, global = true, conflicts_with = "no_sample")]
    pub sample: bool,

    /// Skip the compressed sample (overrides config)
    #[arg(long, global = true, conflicts_with = "sample")]
    pub no_sample: bool,

    /// Stop a pass after this many seconds (0 = no limit)
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl Overrides {
    pub fn sample(&self) -> Option<bool> {
        if self.sample {
            Some(true)
        } else if self.no_sample {
            Some(false)
        } else {
            None // Use config default
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the pipelines that would run, without starting anything
    DryRun {
        /// Trace file to plan for
        trace: String,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that apitrace and ffmpeg can be found and run
    CheckDeps,

    /// Show config status and location, or create default config if missing
    InitConfig,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn positional_trace_with_overrides() {
        let cli = Cli::try_parse_from([
            "trace2video",
            "level1.trace",
            "--fps",
            "30",
            "--no-sample",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.trace.as_deref(), Some("level1.trace"));
        assert!(cli.command.is_none());
        assert_eq!(cli.overrides.fps, Some(30));
        assert_eq!(cli.overrides.sample(), Some(false));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn sample_flags_conflict() {
        assert!(Cli::try_parse_from(["trace2video", "a.trace", "--sample", "--no-sample"]).is_err());
    }

    #[test]
    fn dry_run_subcommand() {
        let cli = Cli::try_parse_from(["trace2video", "dry-run", "a.trace", "--json"]).unwrap();
        match cli.command {
            Some(Commands::DryRun { trace, json }) => {
                assert_eq!(trace, "a.trace");
                assert!(json);
            }
            _ => panic!("expected dry-run"),
        }
    }

    #[test]
    fn no_arguments_parses_to_nothing() {
        let cli = Cli::try_parse_from(["trace2video"]).unwrap();
        assert!(cli.trace.is_none());
        assert!(cli.command.is_none());
        assert_eq!(cli.overrides.sample(), None);
    }
}
