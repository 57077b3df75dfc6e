//! Enumeration types for the gridmarket simulation.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Agent variants
// ---------------------------------------------------------------------------

/// The economic role of an agent.
///
/// The derived ordering (declaration order, then index) is part of the
/// public contract: it defines the canonical agent iteration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Buys energy on the local segment to cover a per-tick need.
    Consumer,
    /// A consumer that also produces, stores, and sells energy locally.
    Prosumer,
    /// Generates energy at scale and sells it wholesale to utilities.
    Producer,
    /// Buys wholesale, holds inventory, and resells to consumers.
    Utility,
    /// Sets policy levers and polices market conduct.
    Regulator,
}

impl core::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Consumer => "consumer",
            Self::Prosumer => "prosumer",
            Self::Producer => "producer",
            Self::Utility => "utility",
            Self::Regulator => "regulator",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// Market structure
// ---------------------------------------------------------------------------

/// A market segment cleared independently each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    /// Prosumer/utility sellers to consumer buyers.
    Local,
    /// Producer sellers to utility buyers.
    Wholesale,
}

impl core::fmt::Display for Segment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Wholesale => write!(f, "wholesale"),
        }
    }
}

/// The direction of an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// A bid: willingness to buy up to a limit price.
    Buy,
    /// An ask: willingness to sell at or above a price.
    Sell,
}

// ---------------------------------------------------------------------------
// Energy sources
// ---------------------------------------------------------------------------

/// The generation technology behind a production facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergySource {
    /// Photovoltaic generation; output follows the day curve.
    Solar,
    /// Wind turbines; output is weather-volatile.
    Wind,
    /// Hydroelectric generation.
    Hydro,
    /// Nuclear fission.
    Nuclear,
    /// Natural gas turbines.
    Gas,
    /// Coal-fired generation.
    Coal,
    /// Oil-fired generation.
    Oil,
}

impl EnergySource {
    /// Whether the source counts toward renewable quotas and incentives.
    ///
    /// Nuclear is low-carbon but not renewable-tagged, matching how the
    /// quota is defined on the utility side.
    pub const fn is_renewable(self) -> bool {
        matches!(self, Self::Solar | Self::Wind | Self::Hydro)
    }
}

impl core::fmt::Display for EnergySource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Solar => "solar",
            Self::Wind => "wind",
            Self::Hydro => "hydro",
            Self::Nuclear => "nuclear",
            Self::Gas => "gas",
            Self::Coal => "coal",
            Self::Oil => "oil",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// Policy levers
// ---------------------------------------------------------------------------

/// A policy lever the regulatory controller can adjust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyLever {
    /// Per-unit tax on non-renewable energy sold.
    CarbonTax,
    /// Per-unit subsidy on renewable energy sold.
    RenewableIncentive,
}
