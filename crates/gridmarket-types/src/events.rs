//! Explicit market events.
//!
//! Every corrective or regulatory act is recorded as an event -- fallbacks,
//! clamps, policy adjustments, penalties, and contract lifecycle changes
//! are never silent. The event log is part of the run's reproducible
//! output: two identical runs produce identical event streams.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::PolicyLever;
use crate::ids::{AgentId, ContractId};

/// A recorded market event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketEvent {
    /// The tick the event occurred at.
    pub tick: u64,
    /// What happened.
    pub kind: MarketEventKind,
}

/// The catalog of recordable events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MarketEventKind {
    /// The oracle failed, timed out, or returned an invalid action for an
    /// agent; the deterministic fallback was substituted.
    OracleFallback {
        /// The affected agent.
        agent: AgentId,
        /// Why the fallback was taken.
        reason: String,
    },
    /// An out-of-range action value was clamped to the nearest boundary.
    ValueClamped {
        /// The issuing agent.
        agent: AgentId,
        /// Which action field was corrected.
        field: String,
        /// The value the agent requested.
        requested: Decimal,
        /// The value actually applied.
        applied: Decimal,
    },
    /// The regulatory controller changed a policy lever.
    PolicyAdjusted {
        /// Which lever moved.
        lever: PolicyLever,
        /// Value before the adjustment.
        previous: Decimal,
        /// Value in force from the next tick.
        updated: Decimal,
        /// The rule or proposal that drove the change.
        cause: String,
    },
    /// A direct balance penalty against an agent.
    PenaltyImposed {
        /// The fined agent.
        agent: AgentId,
        /// Amount transferred to the regulator.
        amount: Decimal,
        /// Why the penalty was imposed.
        reason: String,
    },
    /// A new contract was formed from a matched request and acceptance.
    ContractFormed {
        /// The new contract.
        contract: ContractId,
        /// The buying agent.
        buyer: AgentId,
        /// The selling agent.
        seller: AgentId,
        /// Locked volume per period.
        volume_per_tick: Decimal,
        /// Locked unit price.
        unit_price: Decimal,
        /// Number of periods.
        periods: u32,
    },
    /// A contract request found no matching acceptance and expired.
    ContractRejected {
        /// The requesting buyer.
        buyer: AgentId,
        /// The named seller.
        seller: AgentId,
        /// Why the request was not matched.
        reason: String,
    },
    /// A contract settled its final period and left the active set.
    ContractExpired {
        /// The expired contract.
        contract: ContractId,
    },
    /// A seller could not deliver a contract's full locked volume.
    ContractShortfall {
        /// The affected contract.
        contract: ContractId,
        /// The defaulting seller.
        seller: AgentId,
        /// Volume actually delivered.
        delivered: Decimal,
        /// Volume the contract locked.
        contracted: Decimal,
        /// Penalty charged to the seller.
        penalty: Decimal,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::enums::AgentKind;

    #[test]
    fn event_roundtrip_serde() {
        let event = MarketEvent {
            tick: 12,
            kind: MarketEventKind::PenaltyImposed {
                agent: AgentId::new(AgentKind::Producer, 0),
                amount: Decimal::new(250, 0),
                reason: "price gouging".to_owned(),
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        let restored: MarketEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, restored);
    }
}
