//! icstage - Initial-condition staging
//!
//! CLI entry point for the staging orchestrator.

// Allow multiple crate versions from dependencies (can't easily control)
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use icstage::cli::{print_fatal, render_diagnostic_report};
use icstage::config::StageConfig;
use icstage::doctor::diagnose;
use icstage::log::{JsonlLogger, StageOutcome};
use icstage::stage::cycle::CycleContext;
use icstage::stage::executor::Stager;
use icstage::stage::retrieve::{AwsS3Client, HtarClient};

/// Initial-condition staging for forecast cycles
///
/// Retrieves the cycle's archive and replay analyses when asked to, renders
/// the manifest template and copies the listed files into the experiment
/// directory.
#[derive(Parser, Debug)]
#[command(name = "icstage", version, about)]
struct Cli {
    /// Path to the stage.toml configuration file
    #[arg(long, default_value = "stage.toml")]
    config: PathBuf,

    /// Cycle to stage (YYYYMMDDHH or RFC 3339), overriding the config
    #[arg(long)]
    cycle: Option<String>,

    /// Directory for log files (.stage by default)
    #[arg(long, default_value = ".stage")]
    log_dir: PathBuf,

    /// Run preflight checks and exit
    #[arg(long, conflicts_with = "dry_run")]
    check: bool,

    /// Render the manifest and print it to stdout without retrieving or copying
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = StageConfig::from_path(&cli.config)
        .with_context(|| format!("Failed to load config from '{}'", cli.config.display()))?;
    let cycle = config.resolve_cycle(cli.cycle.as_deref())?;
    let request = config.into_request(cycle);
    let stamp = CycleContext::new(cycle).stamp;

    let logger = JsonlLogger::new(&cli.log_dir).context("Failed to initialize JSONL logger")?;

    if cli.check {
        let history = logger
            .read_all()
            .context("Failed to read log for preflight checks")?;
        let report = diagnose(&request, &history);
        eprintln!("Preflight checks for cycle {stamp}:");
        render_diagnostic_report(&report);
        if report.error_count() > 0 {
            std::process::exit(1);
        }
        return Ok(());
    }

    let stager = Stager::new(HtarClient::new(), AwsS3Client::anonymous_copy())
        .with_display(!cli.dry_run);

    if cli.dry_run {
        return match stager.render(&request) {
            Ok(manifest) => {
                print!("{manifest}");
                Ok(())
            }
            Err(err) => {
                print_fatal(&err);
                std::process::exit(1);
            }
        };
    }

    let start = Instant::now();
    match stager.run(&request).await {
        Ok(report) => {
            logger
                .append(&StageOutcome::from_report(&report))
                .context("Failed to write to JSONL log")?;
            Ok(())
        }
        Err(err) => {
            print_fatal(&err);
            let outcome = StageOutcome::from_error(&stamp, &err, start.elapsed().as_secs());
            if let Err(log_err) = logger.append(&outcome) {
                eprintln!("Failed to write to JSONL log: {log_err:#}");
            }
            std::process::exit(1);
        }
    }
}
