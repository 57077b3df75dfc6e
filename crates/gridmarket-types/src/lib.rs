//! Shared type definitions for the gridmarket simulation.
//!
//! This crate is the single source of truth for all types used across the
//! gridmarket workspace: pure data, no behavior beyond constructors and
//! accessors.
//!
//! # Modules
//!
//! - [`ids`] -- Deterministic typed identifiers for agents, trades, contracts
//! - [`enums`] -- Enumeration types (agent kinds, segments, energy sources)
//! - [`structs`] -- Agent records, policy levers, bounded history
//! - [`market`] -- Offers, trades, contracts, the per-tick market snapshot
//! - [`actions`] -- The closed per-variant action set the oracle returns
//! - [`events`] -- Explicit market events (fallbacks, clamps, penalties)
//! - [`report`] -- Per-tick market and per-agent reporting records

pub mod actions;
pub mod enums;
pub mod events;
pub mod ids;
pub mod market;
pub mod report;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use actions::{AgentAction, ProducerPlan, ProsumerPlan, UtilityPlan};
pub use enums::{AgentKind, EnergySource, PolicyLever, Segment, Side};
pub use events::{MarketEvent, MarketEventKind};
pub use ids::{AgentId, ContractId, TradeId};
pub use market::{Contract, ContractRequest, MarketSnapshot, Offer, Trade};
pub use report::{AgentDetail, AgentRecord, MarketRecord, TickMetrics};
pub use structs::{
    AdjustmentRule, Agent, AgentCommon, Consumer, ConsumerProfile, History, MarginalCost,
    Observation, Persona, PolicyLevers, Producer, Prosumer, Regulator, Utility,
};
