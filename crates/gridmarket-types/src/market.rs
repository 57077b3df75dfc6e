//! Market primitives: offers, trades, contracts, and the per-tick snapshot.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::{Segment, Side};
use crate::ids::{AgentId, ContractId, TradeId};
use crate::structs::PolicyLevers;

// ---------------------------------------------------------------------------
// Offers
// ---------------------------------------------------------------------------

/// A spot bid or ask, valid only within the tick it was issued.
///
/// Offers are consumed by the clearing engine and never persisted; unmatched
/// remainders are discarded when the tick commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// The issuing agent.
    pub agent: AgentId,
    /// Buy or sell.
    pub side: Side,
    /// The segment the offer targets.
    pub segment: Segment,
    /// Offered volume; strictly positive.
    pub volume: Decimal,
    /// Limit price for bids, asking price for asks; never negative.
    pub price: Decimal,
    /// The tick the offer was issued at.
    pub tick: u64,
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

/// A committed trade. Immutable once recorded; the append-only basis for
/// all derived metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Sequence identifier assigned by the trade log.
    pub id: TradeId,
    /// The tick the trade settled at.
    pub tick: u64,
    /// The segment the trade cleared in.
    pub segment: Segment,
    /// The buying agent.
    pub buyer: AgentId,
    /// The selling agent.
    pub seller: AgentId,
    /// Traded volume; strictly positive.
    pub volume: Decimal,
    /// Unit price the trade settled at.
    pub price: Decimal,
    /// Whether the energy is renewable-tagged.
    pub renewable: bool,
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

/// A multi-period fixed-price, fixed-volume agreement between a buyer and
/// a seller.
///
/// The locked volume is reserved against the seller's capacity and the
/// buyer's demand each tick, before either party may place spot offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    /// Sequence identifier assigned by the contract book.
    pub id: ContractId,
    /// The buying agent.
    pub buyer: AgentId,
    /// The selling agent.
    pub seller: AgentId,
    /// Locked unit price.
    pub unit_price: Decimal,
    /// Locked volume delivered each period.
    pub volume_per_tick: Decimal,
    /// Periods left to settle. A contract reaching zero is removed after
    /// its final settlement, not before.
    pub remaining_periods: u32,
    /// The tick the contract was formed at.
    pub origin_tick: u64,
}

/// A contract proposal embedded in a buyer's tick action.
///
/// Formation requires the named seller's matching acceptance in the same
/// tick; unmatched requests expire when the tick ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRequest {
    /// The producer the buyer wants to contract with.
    pub seller: AgentId,
    /// Requested volume per period.
    pub volume_per_tick: Decimal,
    /// Proposed locked unit price.
    pub unit_price: Decimal,
    /// Requested number of periods.
    pub periods: u32,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The immutable per-tick read of market state handed to every oracle call.
///
/// Rebuilt by the scheduler from the prior tick's committed state; never
/// mutated after the tick commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// The tick this snapshot was built for.
    pub tick: u64,
    /// Price anchor: the last wholesale clearing price, else the configured
    /// initial price.
    pub reference_price: Decimal,
    /// Local clearing price of the previous tick, if that segment traded.
    pub local_price: Option<Decimal>,
    /// Wholesale clearing price of the previous tick, if that segment traded.
    pub wholesale_price: Option<Decimal>,
    /// Total volume offered for sale in the previous tick.
    pub total_supply: Decimal,
    /// Total volume bid for in the previous tick.
    pub total_demand: Decimal,
    /// Policy levers in force for this tick.
    pub levers: PolicyLevers,
}
