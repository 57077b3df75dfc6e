//! The canonical agent table.
//!
//! The scheduler exclusively owns one [`AgentTable`] per run and is the
//! only component that mutates it, during the commit phase. The table is
//! keyed by [`AgentId`] in a `BTreeMap`, so iteration order is the stable
//! agent ordering every order-sensitive tie-break relies on.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use gridmarket_types::{Agent, AgentId, Consumer, Producer, Prosumer, Regulator, Utility};

/// The canonical table of all agents in a run.
///
/// Agents are created once at initialization and never removed mid-run.
#[derive(Debug, Default)]
pub struct AgentTable {
    agents: BTreeMap<AgentId, Agent>,
}

impl AgentTable {
    /// Build a table from a list of agents.
    pub fn new(agents: Vec<Agent>) -> Self {
        Self {
            agents: agents.into_iter().map(|a| (a.id(), a)).collect(),
        }
    }

    /// Number of agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Look up an agent by id.
    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    /// Mutable lookup by id.
    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(&id)
    }

    /// All agents in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// All agent ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.agents.keys().copied()
    }

    /// Add a signed delta to an agent's balance. Unknown ids are ignored.
    pub fn add_balance(&mut self, id: AgentId, delta: Decimal) {
        if let Some(agent) = self.agents.get_mut(&id) {
            let common = agent.common_mut();
            common.balance = common.balance.saturating_add(delta);
        }
    }

    /// All consumers, in id order.
    pub fn consumers(&self) -> impl Iterator<Item = &Consumer> {
        self.agents.values().filter_map(|a| match a {
            Agent::Consumer(c) => Some(c),
            _ => None,
        })
    }

    /// All prosumers, in id order.
    pub fn prosumers(&self) -> impl Iterator<Item = &Prosumer> {
        self.agents.values().filter_map(|a| match a {
            Agent::Prosumer(p) => Some(p),
            _ => None,
        })
    }

    /// All producers, in id order.
    pub fn producers(&self) -> impl Iterator<Item = &Producer> {
        self.agents.values().filter_map(|a| match a {
            Agent::Producer(p) => Some(p),
            _ => None,
        })
    }

    /// All utilities, in id order.
    pub fn utilities(&self) -> impl Iterator<Item = &Utility> {
        self.agents.values().filter_map(|a| match a {
            Agent::Utility(u) => Some(u),
            _ => None,
        })
    }

    /// The regulator, if present.
    pub fn regulator(&self) -> Option<&Regulator> {
        self.agents.values().find_map(|a| match a {
            Agent::Regulator(r) => Some(r),
            _ => None,
        })
    }

    /// Mutable access to the regulator.
    pub fn regulator_mut(&mut self) -> Option<&mut Regulator> {
        self.agents.values_mut().find_map(|a| match a {
            Agent::Regulator(r) => Some(r),
            _ => None,
        })
    }

    /// The regulator's id, if present.
    pub fn regulator_id(&self) -> Option<AgentId> {
        self.regulator().map(|r| r.common.id)
    }
}
