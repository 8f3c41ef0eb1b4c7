//! Fixture harness: reapplies each scenario's branch twice against an
//! in-memory execution and reports PASS/FAIL per scenario.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use history_reapply::metrics::ReapplyMetrics;
use history_reapply::Reapplier;
use history_reapply_runtime::fixture::load_scenarios;
use history_reapply_runtime::{logging, RuntimeConfig, RuntimeError};

#[derive(Debug, Parser)]
#[command(name = "history-reapply-harness")]
#[command(version, about = "Check reapplication scenarios from a fixture file", long_about = None)]
struct Cli {
    /// JSON array of scenarios.
    fixture: PathBuf,

    /// Runtime config file. Defaults plus environment overrides when absent.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path),
        None => RuntimeConfig::from_env(),
    };
    let config = match config {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.log_filter);

    match run(&cli, &config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli, config: &RuntimeConfig) -> Result<bool, RuntimeError> {
    let scenarios = load_scenarios(&cli.fixture)?;
    println!("Loaded {} scenarios from {}", scenarios.len(), cli.fixture.display());

    let metrics = if config.metrics_enabled {
        ReapplyMetrics::new()
    } else {
        ReapplyMetrics::disabled()
    };
    let reapplier = Reapplier::new(metrics);

    let mut passed = 0;
    for scenario in &scenarios {
        let report = scenario.run(&reapplier)?;
        if report.passed() {
            passed += 1;
            println!("  {}: PASS (hash={}...)", report.name, &report.hash[..16]);
        } else {
            println!("  {}: FAIL", report.name);
            for failure in &report.failures {
                println!("    {failure}");
            }
        }
    }

    println!();
    println!("Results: {passed}/{} passed", scenarios.len());
    Ok(passed == scenarios.len())
}
