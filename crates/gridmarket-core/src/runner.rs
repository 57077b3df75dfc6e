//! Bounded simulation runner.
//!
//! Drives [`run_tick`] for a configured number of ticks with optional
//! real-time pacing and cooperative cancellation. Cancellation takes
//! effect only between ticks: a tick that has started always commits, so
//! no component ever observes a half-applied tick.
//!
//! [`run_tick`]: crate::tick::run_tick

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use gridmarket_types::{AgentRecord, MarketEvent, MarketRecord, TickMetrics};

use crate::config::SimulationConfig;
use crate::oracle::DecisionOracle;
use crate::tick::{self, SimulationState, TickError};

/// Errors that can occur during a simulation run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Setup or tick execution failed.
    #[error("tick error: {source}")]
    Tick {
        /// The underlying tick error.
        #[from]
        source: TickError,
    },
}

/// Why the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEndReason {
    /// All configured ticks ran.
    Completed,
    /// The run was cancelled between ticks.
    Cancelled,
}

/// Cooperative cancellation handle, checked between ticks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the run stops after the current tick commits.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The complete output of a run.
#[derive(Debug)]
pub struct RunReport {
    /// Why the run ended.
    pub end_reason: RunEndReason,
    /// Number of ticks that committed.
    pub ticks_run: u64,
    /// Per-tick market records, ordered by tick.
    pub market_records: Vec<MarketRecord>,
    /// Per-tick per-agent records, ordered by tick then agent id.
    pub agent_records: Vec<AgentRecord>,
    /// Every event recorded during the run.
    pub events: Vec<MarketEvent>,
    /// Metrics of the final committed tick, if any tick ran.
    pub final_metrics: Option<TickMetrics>,
}

/// Run an already-built simulation for up to `num_ticks` ticks.
///
/// # Errors
///
/// Returns [`RunnerError`] if a tick fails unrecoverably.
pub async fn run_simulation(
    state: &mut SimulationState,
    oracle: &mut dyn DecisionOracle,
    num_ticks: u64,
    tick_interval_ms: u64,
    cancel: &CancelToken,
) -> Result<RunReport, RunnerError> {
    info!(num_ticks, tick_interval_ms, "Simulation starting");

    let mut market_records = Vec::new();
    let mut agent_records = Vec::new();
    let mut final_metrics = None;
    let mut ticks_run = 0u64;
    let mut end_reason = RunEndReason::Completed;

    for _ in 0..num_ticks {
        if cancel.is_cancelled() {
            info!(ticks_run, "Run cancelled between ticks");
            end_reason = RunEndReason::Cancelled;
            break;
        }

        let summary = tick::run_tick(state, oracle)?;
        ticks_run = ticks_run.saturating_add(1);
        final_metrics = Some(summary.market.metrics);
        market_records.push(summary.market);
        agent_records.extend(summary.agents);

        if tick_interval_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(tick_interval_ms)).await;
        }
    }

    info!(ticks_run, reason = ?end_reason, "Simulation ended");

    Ok(RunReport {
        end_reason,
        ticks_run,
        market_records,
        agent_records,
        events: state.events.clone(),
        final_metrics,
    })
}

/// Build a simulation from configuration and run it to completion.
///
/// This is the `run(num_ticks, config)` entry point: the tick count and
/// pacing come from the configuration, and the report carries the final
/// metrics plus the complete per-tick records.
///
/// # Errors
///
/// Returns [`RunnerError`] if the configuration is invalid or a tick
/// fails unrecoverably.
pub async fn run(
    config: &SimulationConfig,
    oracle: &mut dyn DecisionOracle,
    cancel: &CancelToken,
) -> Result<RunReport, RunnerError> {
    let mut state = SimulationState::from_config(config)?;
    run_simulation(
        &mut state,
        oracle,
        config.run.ticks,
        config.run.tick_interval_ms,
        cancel,
    )
    .await
}
