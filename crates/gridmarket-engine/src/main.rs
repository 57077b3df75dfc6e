//! Simulation engine binary for the gridmarket workspace.
//!
//! Wires together configuration, the population, the deterministic
//! heuristic oracle, and the bounded runner. An external LLM runner can
//! replace the heuristic by implementing `DecisionOracle`; everything
//! else stays the same.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `gridmarket-config.yaml` (path overridable
//!    via `GRIDMARKET_CONFIG`)
//! 3. Validate the configuration (fail fast)
//! 4. Install ctrl-c cancellation (stops between ticks, never mid-commit)
//! 5. Run the simulation and log the final report

mod error;
mod heuristic;

use std::path::{Path, PathBuf};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gridmarket_core::config::SimulationConfig;
use gridmarket_core::runner::{self, CancelToken};

use crate::error::EngineError;
use crate::heuristic::HeuristicOracle;

/// Default configuration path relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "gridmarket-config.yaml";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("gridmarket-engine starting");

    let config = load_config()?;
    config.validate().map_err(EngineError::from)?;
    info!(
        ticks = config.run.ticks,
        seed = config.run.seed,
        consumers = config.population.consumers,
        prosumers = config.population.prosumers,
        producers = config.population.producers,
        utilities = config.population.utilities,
        "Configuration loaded"
    );

    let cancel = CancelToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received; stopping after the current tick");
            ctrl_c_cancel.cancel();
        }
    });

    let mut oracle = HeuristicOracle::new();
    let report = runner::run(&config, &mut oracle, &cancel)
        .await
        .map_err(EngineError::from)?;

    log_report(&report);
    Ok(())
}

/// Load configuration from disk, falling back to defaults when the file
/// does not exist.
fn load_config() -> Result<SimulationConfig, EngineError> {
    let path: PathBuf = std::env::var("GRIDMARKET_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    if Path::new(&path).exists() {
        info!(path = %path.display(), "Loading configuration");
        Ok(SimulationConfig::from_file(&path)?)
    } else {
        warn!(path = %path.display(), "Config file not found; using defaults");
        Ok(SimulationConfig::default())
    }
}

/// Log the end-of-run report.
fn log_report(report: &runner::RunReport) {
    info!(
        reason = ?report.end_reason,
        ticks_run = report.ticks_run,
        agent_records = report.agent_records.len(),
        events = report.events.len(),
        "Simulation ended"
    );

    if let Some(metrics) = &report.final_metrics {
        info!(
            price_volatility = metrics.price_volatility,
            supply_demand_mismatch = metrics.supply_demand_mismatch,
            renewable_penetration = metrics.renewable_penetration,
            renewable_stability = metrics.renewable_stability,
            wholesale_concentration = metrics.wholesale_concentration,
            "Final metrics"
        );
    }

    if let Some(last) = report.market_records.last() {
        info!(
            tick = last.tick,
            local_price = ?last.local_price,
            wholesale_price = ?last.wholesale_price,
            total_supply = %last.total_supply,
            total_demand = %last.total_demand,
            carbon_tax = %last.levers.carbon_tax,
            renewable_incentive = %last.levers.renewable_incentive,
            "Final market record"
        );
    }
}
