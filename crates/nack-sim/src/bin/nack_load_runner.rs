use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use nack_sim::scenarios::{practical_baseline, run_scenario, LoadScenario};
use nack_tracker::config::NackTrackerConfig;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Drives a live nack tracker with a synthetic workload and prints a JSON report.
#[derive(Debug, Parser)]
#[command(name = "nack_load_runner")]
struct Args {
    /// TOML tracker configuration; flags below override it.
    #[arg(long, env = "NACK_CONFIG")]
    config: Option<PathBuf>,
    /// Bucket precision bits, in [0, 63].
    #[arg(long)]
    precision_bits: Option<u32>,
    /// Distinct entries to nack.
    #[arg(long)]
    reservations: Option<u64>,
    #[arg(long)]
    ledgers: Option<u32>,
    /// Upper bound for uniformly drawn nack delays.
    #[arg(long)]
    max_delay_ms: Option<u64>,
    /// Percent of entries nacked twice.
    #[arg(long)]
    renack_percent: Option<u8>,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Extra seconds to wait past the largest delay.
    #[arg(long, default_value_t = 5)]
    grace_secs: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => match NackTrackerConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                error!("config {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => NackTrackerConfig::default(),
    };
    if let Some(bits) = args.precision_bits {
        config.precision_bits = bits;
    }

    let baseline = practical_baseline();
    let scenario = LoadScenario {
        reservations: args.reservations.unwrap_or(baseline.reservations),
        ledgers: args.ledgers.unwrap_or(baseline.ledgers),
        max_delay_ms: args.max_delay_ms.unwrap_or(baseline.max_delay_ms),
        renack_percent: args.renack_percent.unwrap_or(baseline.renack_percent).min(100),
        grace: Duration::from_secs(args.grace_secs),
    };

    let report = match run_scenario(&config, scenario, args.seed) {
        Ok(report) => report,
        Err(err) => {
            error!("load run failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            error!("failed to encode report: {err}");
            return ExitCode::FAILURE;
        }
    }
    if report.completed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
