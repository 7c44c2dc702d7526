#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use transit::{Transit, TransitConfig, find_config_file};
use transit_common::logging;

/// Synthetic email delivery latency probe
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file (otherwise TRANSIT_CONFIG, ./transit.config.ron,
    /// /etc/transit/transit.config.ron)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run a single cycle and exit; the exit code reflects the outcome
    #[arg(long)]
    test: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let config_path = find_config_file(args.config.as_deref())?;
    let config = TransitConfig::load(&config_path)?;

    if args.test {
        logging::init();

        let report = Transit::from_config(&config)?.run_single().await?;
        return Ok(if report.is_delivered() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    transit::controller::run(&config).await?;

    Ok(ExitCode::SUCCESS)
}
