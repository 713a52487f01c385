use anyhow::Result;
use clap::Parser;
use tracing::info;
use trident::args::Cli;
use trident::commands;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    logutil::configure_global_logger(level, cli.log_format.into(), std::io::stderr);

    info!(version = env!("CARGO_PKG_VERSION"), "starting trident");

    commands::run(cli)
}
