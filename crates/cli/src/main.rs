//! FOTA CLI - Main Entry Point
//!
//! Runs firmware-over-the-air round-trips against simulated devices,
//! provisions those devices, and summarizes outcome logs.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use fota_e2e::FotaConfig;

mod commands;
mod output;

use commands::{provision, report, run};

/// Exit code when at least one round did not pass
const EXIT_ROUND_FAILED: u8 = 1;
/// Exit code when the suite could not run at all
const EXIT_SETUP_ERROR: u8 = 2;

/// FOTA CLI - round-trip automation for simulated devices
#[derive(Parser)]
#[command(name = "fota")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (missing file = defaults)
    #[arg(long, default_value = "fota.toml", global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run update rounds: devices × times
    Run(run::RunArgs),

    /// Insert and activate simulated devices through the REST API
    Provision(provision::ProvisionArgs),

    /// Summarize a group's outcome log
    Report(report::ReportArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let logs = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if cli.log_json {
        logs.json().init();
    } else {
        logs.init();
    }

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(EXIT_SETUP_ERROR)
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let load = || {
        FotaConfig::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))
    };

    match cli.command {
        Commands::Run(args) => {
            let passed = run::execute(args, load()?, cli.format).await?;
            if !passed {
                return Ok(ExitCode::from(EXIT_ROUND_FAILED));
            }
        }
        Commands::Provision(args) => provision::execute(args, load()?, cli.format).await?,
        Commands::Report(args) => report::execute(args, load()?, cli.format)?,
        Commands::Version => {
            println!("FOTA CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(ExitCode::SUCCESS)
}
