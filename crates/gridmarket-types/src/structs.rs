//! Agent records and policy structures.
//!
//! These are pure data: the scheduler owns the canonical agent table and is
//! the only component that mutates it, during the commit phase. The prosumer
//! is modeled as composition -- a [`ConsumerProfile`] plus production fields --
//! rather than inheritance, so adding variants never touches a hierarchy.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::{AgentKind, EnergySource};
use crate::ids::AgentId;

// ---------------------------------------------------------------------------
// Persona
// ---------------------------------------------------------------------------

/// Opaque behavioral-bias tag attached to every agent.
///
/// The tag is forwarded to the decision oracle verbatim; the core never
/// branches on its contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona(pub String);

impl Persona {
    /// Create a persona tag from a label.
    pub fn new(label: &str) -> Self {
        Self(label.to_owned())
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self("balanced".to_owned())
    }
}

impl core::fmt::Display for Persona {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One per-tick observation stored in an agent's bounded history window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// The tick the observation was taken at.
    pub tick: u64,
    /// Local-segment clearing price, if the segment traded.
    pub local_price: Option<Decimal>,
    /// Wholesale-segment clearing price, if the segment traded.
    pub wholesale_price: Option<Decimal>,
    /// The agent's balance after the tick committed.
    pub balance: Decimal,
    /// Total volume the agent traded this tick (both directions).
    pub traded_volume: Decimal,
}

/// A bounded window of past observations.
///
/// Pushing beyond the window length evicts the oldest entry. A window of
/// zero keeps no history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    /// Maximum number of observations retained.
    window: usize,
    /// Observations in chronological order, oldest first.
    entries: VecDeque<Observation>,
}

impl History {
    /// Create an empty history with the given window length.
    pub fn new(window: usize) -> Self {
        Self {
            window,
            entries: VecDeque::with_capacity(window),
        }
    }

    /// Append an observation, evicting the oldest if the window is full.
    pub fn push(&mut self, observation: Observation) {
        if self.window == 0 {
            return;
        }
        while self.entries.len() >= self.window {
            self.entries.pop_front();
        }
        self.entries.push_back(observation);
    }

    /// Observations in chronological order, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &Observation> {
        self.entries.iter()
    }

    /// The most recent observation, if any.
    pub fn latest(&self) -> Option<&Observation> {
        self.entries.back()
    }

    /// Number of retained observations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Common agent fields
// ---------------------------------------------------------------------------

/// Fields shared by every agent variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCommon {
    /// Unique, run-stable identifier.
    pub id: AgentId,
    /// Opaque behavioral-bias tag.
    pub persona: Persona,
    /// Monetary balance; signed, may go negative.
    pub balance: Decimal,
    /// Bounded window of past observations.
    pub history: History,
}

/// Consumption-side fields, shared by consumers and prosumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerProfile {
    /// Energy required per tick.
    pub energy_need: Decimal,
    /// Counterparties this agent prefers to trade with (advisory; passed to
    /// the oracle, never enforced by the clearing engine).
    pub preferred_sellers: Vec<AgentId>,
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// An agent that only consumes energy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumer {
    /// Shared agent fields.
    pub common: AgentCommon,
    /// Consumption profile.
    pub profile: ConsumerProfile,
}

/// An agent that consumes and also produces, stores, and sells energy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prosumer {
    /// Shared agent fields.
    pub common: AgentCommon,
    /// Consumption profile (the prosumer's consumer capability set).
    pub profile: ConsumerProfile,
    /// Maximum production per tick.
    pub capacity: Decimal,
    /// Production this tick, set by the generation model; in `0..=capacity`.
    pub production: Decimal,
    /// Stored energy; in `0..=storage_capacity`.
    pub storage: Decimal,
    /// Maximum stored energy.
    pub storage_capacity: Decimal,
    /// Current asking price for surplus energy.
    pub ask_price: Decimal,
    /// Generation technology (always renewable in practice, but carried
    /// explicitly so trades can be tagged).
    pub source: EnergySource,
    /// Per-tick maintenance cost as a fraction of capacity.
    pub maintenance_rate: Decimal,
}

/// A linear marginal-cost curve: unit cost at output `q` is `base + slope * q`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginalCost {
    /// Cost of the first unit.
    pub base: Decimal,
    /// Cost increase per unit of output.
    pub slope: Decimal,
}

impl MarginalCost {
    /// Marginal cost of one unit at the given output level.
    pub fn unit_cost(&self, output: Decimal) -> Decimal {
        self.base.saturating_add(self.slope.saturating_mul(output))
    }
}

/// A bulk generator selling wholesale to utilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Producer {
    /// Shared agent fields.
    pub common: AgentCommon,
    /// Maximum output per tick.
    pub capacity: Decimal,
    /// Output this tick; in `0..=capacity`.
    pub output: Decimal,
    /// Marginal cost curve.
    pub cost: MarginalCost,
    /// Current asking price.
    pub ask_price: Decimal,
    /// Generation technology; determines the renewable tag and carbon tax.
    pub source: EnergySource,
    /// Capacity added per unit of money invested.
    pub invest_yield: Decimal,
    /// Capacity increase booked this tick, effective next tick.
    pub pending_capacity: Decimal,
}

/// A distributor buying wholesale and reselling to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utility {
    /// Shared agent fields.
    pub common: AgentCommon,
    /// Energy held in storage; in `0..=storage_capacity`.
    pub inventory: Decimal,
    /// Maximum inventory.
    pub storage_capacity: Decimal,
    /// Posted resale price on the local segment.
    pub resale_price: Decimal,
    /// Minimum fraction of procurement that must be renewable, in `0..=1`.
    pub min_renewable_fraction: Decimal,
}

/// Current values of the policy levers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLevers {
    /// Per-unit tax on non-renewable energy sold; never negative.
    pub carbon_tax: Decimal,
    /// Per-unit subsidy on renewable energy sold; never negative.
    pub renewable_incentive: Decimal,
}

/// Parameters of the regulator's reactive adjustment rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRule {
    /// Target renewable penetration, in `0..=1`.
    pub renewable_target: Decimal,
    /// Price volatility above which tax hikes are suppressed.
    pub volatility_ceiling: f64,
    /// Penetration growth (per window) below which the incentive rises.
    pub growth_floor: f64,
    /// Maximum absolute lever change per tick.
    pub max_step: Decimal,
    /// An ask above `gouging_multiple` times the trailing clearing price is
    /// price gouging.
    pub gouging_multiple: Decimal,
    /// Fine per unit of excess ask price.
    pub gouging_fine_rate: Decimal,
}

/// The policy-setting agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regulator {
    /// Shared agent fields. The regulator's balance absorbs taxes and
    /// penalties and funds incentives.
    pub common: AgentCommon,
    /// Current policy levers.
    pub levers: PolicyLevers,
    /// Adjustment-rule parameters.
    pub rule: AdjustmentRule,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Any agent in the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Agent {
    /// A consumer.
    Consumer(Consumer),
    /// A prosumer.
    Prosumer(Prosumer),
    /// A producer.
    Producer(Producer),
    /// A utility.
    Utility(Utility),
    /// The regulator.
    Regulator(Regulator),
}

impl Agent {
    /// The shared fields of this agent.
    pub const fn common(&self) -> &AgentCommon {
        match self {
            Self::Consumer(a) => &a.common,
            Self::Prosumer(a) => &a.common,
            Self::Producer(a) => &a.common,
            Self::Utility(a) => &a.common,
            Self::Regulator(a) => &a.common,
        }
    }

    /// Mutable access to the shared fields.
    pub const fn common_mut(&mut self) -> &mut AgentCommon {
        match self {
            Self::Consumer(a) => &mut a.common,
            Self::Prosumer(a) => &mut a.common,
            Self::Producer(a) => &mut a.common,
            Self::Utility(a) => &mut a.common,
            Self::Regulator(a) => &mut a.common,
        }
    }

    /// The agent's identifier.
    pub const fn id(&self) -> AgentId {
        self.common().id
    }

    /// The agent's variant.
    pub const fn kind(&self) -> AgentKind {
        match self {
            Self::Consumer(_) => AgentKind::Consumer,
            Self::Prosumer(_) => AgentKind::Prosumer,
            Self::Producer(_) => AgentKind::Producer,
            Self::Utility(_) => AgentKind::Utility,
            Self::Regulator(_) => AgentKind::Regulator,
        }
    }

    /// The agent's current balance.
    pub const fn balance(&self) -> Decimal {
        self.common().balance
    }
}
