//! Decision oracle trait and deterministic stub implementations.
//!
//! During the decision phase the scheduler presents every agent -- in
//! ascending id order -- with its own state, the immutable
//! [`MarketSnapshot`], and its bounded history (carried inside the agent
//! record), and awaits one [`AgentAction`] per agent. The
//! [`DecisionOracle`] trait abstracts the mechanism: an LLM runner, a
//! scripted policy, or a test stub.
//!
//! The decision phase is the only suspension point on the critical path.
//! Implementations own their concurrency and per-agent deadline policy;
//! an agent that misses the deadline is reported as
//! [`OracleReply::Failed`], which the scheduler converts into the
//! deterministic fallback. Individual failures are never fatal --
//! [`OracleError`] is reserved for the whole phase collapsing.

use std::collections::BTreeMap;

use gridmarket_agents::AgentTable;
use gridmarket_types::{AgentAction, AgentId, MarketSnapshot};

/// Errors that abort the decision phase entirely.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// An internal error in the oracle (lost connection, poisoned state).
    #[error("decision oracle error: {message}")]
    Internal {
        /// Description of the error.
        message: String,
    },
}

/// One agent's reply for one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleReply {
    /// The oracle produced an action.
    Action(AgentAction),
    /// The oracle failed or timed out for this agent; the scheduler
    /// substitutes the deterministic fallback and records the reason.
    Failed {
        /// Why no action was produced.
        reason: String,
    },
}

/// A source of agent decisions.
///
/// The scheduler calls [`collect_decisions`] once per tick. Agents absent
/// from the returned map are treated as failed.
///
/// [`collect_decisions`]: DecisionOracle::collect_decisions
pub trait DecisionOracle {
    /// Collect one reply per agent for the given tick.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError`] only when the decision process fails as a
    /// whole; per-agent problems are reported via [`OracleReply::Failed`].
    fn collect_decisions(
        &mut self,
        tick: u64,
        snapshot: &MarketSnapshot,
        agents: &AgentTable,
    ) -> Result<BTreeMap<AgentId, OracleReply>, OracleError>;
}

/// An oracle that always returns [`AgentAction::Hold`].
///
/// Exercises the tick cycle end-to-end with every agent forfeiting its
/// turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoldOracle;

impl HoldOracle {
    /// Create a new hold oracle.
    pub const fn new() -> Self {
        Self
    }
}

impl DecisionOracle for HoldOracle {
    fn collect_decisions(
        &mut self,
        _tick: u64,
        _snapshot: &MarketSnapshot,
        agents: &AgentTable,
    ) -> Result<BTreeMap<AgentId, OracleReply>, OracleError> {
        Ok(agents
            .ids()
            .map(|id| (id, OracleReply::Action(AgentAction::Hold)))
            .collect())
    }
}

/// An oracle replaying a fixed action per agent every tick.
///
/// This is the deterministic stub used by the replay tests: two runs with
/// the same script, configuration, and seed must produce bit-identical
/// trade histories. Agents without a scripted action hold.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOracle {
    script: BTreeMap<AgentId, AgentAction>,
}

impl ScriptedOracle {
    /// Create a scripted oracle from fixed per-agent actions.
    pub const fn new(script: BTreeMap<AgentId, AgentAction>) -> Self {
        Self { script }
    }

    /// Set the scripted action for one agent.
    pub fn set(&mut self, agent: AgentId, action: AgentAction) {
        self.script.insert(agent, action);
    }
}

impl DecisionOracle for ScriptedOracle {
    fn collect_decisions(
        &mut self,
        _tick: u64,
        _snapshot: &MarketSnapshot,
        agents: &AgentTable,
    ) -> Result<BTreeMap<AgentId, OracleReply>, OracleError> {
        Ok(agents
            .ids()
            .map(|id| {
                let action = self
                    .script
                    .get(&id)
                    .cloned()
                    .unwrap_or(AgentAction::Hold);
                (id, OracleReply::Action(action))
            })
            .collect())
    }
}

/// An oracle that fails for a chosen set of agents and holds for the rest.
///
/// Used to test the fallback path: a timeout for one agent must not
/// disturb any other agent's trades that tick.
#[derive(Debug, Clone, Default)]
pub struct FailingOracle {
    failing: Vec<AgentId>,
}

impl FailingOracle {
    /// Create an oracle failing for the given agents.
    pub const fn new(failing: Vec<AgentId>) -> Self {
        Self { failing }
    }
}

impl DecisionOracle for FailingOracle {
    fn collect_decisions(
        &mut self,
        _tick: u64,
        _snapshot: &MarketSnapshot,
        agents: &AgentTable,
    ) -> Result<BTreeMap<AgentId, OracleReply>, OracleError> {
        Ok(agents
            .ids()
            .map(|id| {
                let reply = if self.failing.contains(&id) {
                    OracleReply::Failed {
                        reason: "deadline exceeded".to_owned(),
                    }
                } else {
                    OracleReply::Action(AgentAction::Hold)
                };
                (id, reply)
            })
            .collect())
    }
}
