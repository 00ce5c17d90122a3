mod app;
mod cli;

use std::io::IsTerminal;
use tracing::level_filters::LevelFilter;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = cli::parse();
    init_logging(cli.verbose);
    std::process::exit(app::run(cli));
}
