//! Append-only ledgers and the contract book for the gridmarket simulation.
//!
//! Every traded energy unit and every monetary movement in a run is tracked
//! here. Energy is never created from nothing by a trade (every trade has
//! exactly one buyer and one seller for the same volume) and money only
//! leaves the economy through the explicit cost sink. Conservation is
//! verified at the end of every tick.
//!
//! # Architecture
//!
//! - [`trades`] -- The [`TradeLog`]: append-only trade records with
//!   per-segment conservation verification.
//! - [`cash`] -- The [`CashLedger`]: double-entry monetary movements with
//!   typed entry kinds and sink-flow semantics.
//! - [`contracts`] -- The [`ContractBook`]: multi-period agreements,
//!   reservation queries, settlement with partial delivery, and formation
//!   from matched request/acceptance pairs.
//!
//! # Conservation
//!
//! For every tick T and market segment S, the volume bought in S equals
//! the volume sold in S -- exactly. For every tick T, monetary debits equal
//! credits plus explicit sink outflow. A violation produces a
//! [`LedgerAnomaly`], the run's most critical integrity alert. The ledger
//! never panics; it returns errors.

pub mod cash;
pub mod contracts;
pub mod trades;

// Re-export primary types at crate root.
pub use cash::{CashEntry, CashEntryKind, CashLedger, Party};
pub use contracts::{ContractBook, SettledLeg, Settlement, Shortfall};
pub use trades::{TradeLog, TradeParams};

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use gridmarket_types::Segment;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when recording ledger entries.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Volume must be strictly positive.
    #[error("volume must be positive, got {volume}")]
    NonPositiveVolume {
        /// The invalid volume.
        volume: Decimal,
    },

    /// Price must not be negative.
    #[error("price must not be negative, got {price}")]
    NegativePrice {
        /// The invalid price.
        price: Decimal,
    },

    /// Monetary amounts must be strictly positive.
    #[error("amount must be positive, got {amount}")]
    NonPositiveAmount {
        /// The invalid amount.
        amount: Decimal,
    },

    /// A trade or contract cannot pair an agent with itself.
    #[error("buyer and seller must differ")]
    SelfDealing,

    /// A contract must run for at least one period.
    #[error("contract must run for at least one period")]
    ZeroPeriods,

    /// An internal error that should not occur in normal operation.
    #[error("internal ledger error: {0}")]
    Internal(&'static str),
}

// ---------------------------------------------------------------------------
// Conservation
// ---------------------------------------------------------------------------

/// The result of a conservation check for a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConservationResult {
    /// The ledger is balanced for this tick.
    Balanced,
    /// One or more segments or flows are imbalanced.
    Anomaly(LedgerAnomaly),
}

/// A conservation violation detected during tick verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerAnomaly {
    /// The tick where the anomaly was detected.
    pub tick: u64,
    /// Per-segment imbalance: `(bought_total, sold_total)` for each segment
    /// that did not balance. Empty for purely monetary anomalies.
    pub imbalances: BTreeMap<Segment, (Decimal, Decimal)>,
    /// Human-readable description of the anomaly.
    pub message: String,
}

impl core::fmt::Display for LedgerAnomaly {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.message)
    }
}
