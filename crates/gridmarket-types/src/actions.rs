//! The closed per-variant action set returned by the decision oracle.
//!
//! One action per agent per tick. `Hold` is the universal deterministic
//! fallback used when the oracle fails, times out, or returns an action
//! that does not match the agent's variant: consumers make no trade,
//! producers keep their current price and output, utilities keep their
//! posted resale price and procure nothing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::AgentKind;
use crate::market::ContractRequest;

/// A prosumer's dispatch plan for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProsumerPlan {
    /// Stored energy to draw toward own need.
    pub draw_storage: Decimal,
    /// Surplus production to put into storage.
    pub store_surplus: Decimal,
    /// Surplus volume to offer on the local segment.
    pub sell_volume: Decimal,
    /// Asking price for the surplus offer.
    pub ask_price: Decimal,
    /// Limit price for a bid covering any remaining deficit.
    pub deficit_limit_price: Decimal,
}

/// A producer's quote for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerPlan {
    /// Target output; clamped to capacity.
    pub output: Decimal,
    /// Asking price on the wholesale segment.
    pub ask_price: Decimal,
    /// Whether contract requests naming this producer are accepted this tick.
    pub accept_contracts: bool,
    /// Money to invest in capacity, effective next tick.
    pub invest: Option<Decimal>,
}

/// A utility's procurement and retail plan for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilityPlan {
    /// Volume to bid for on the wholesale segment.
    pub procure_volume: Decimal,
    /// Limit price for the wholesale bid.
    pub limit_price: Decimal,
    /// Posted resale price on the local segment.
    pub resale_price: Decimal,
    /// Optional contract proposal to a named producer.
    pub contract_request: Option<ContractRequest>,
}

/// One agent's action for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    /// Take no market action; the deterministic fallback for every variant.
    Hold,
    /// Consumer: bid for energy on the local segment.
    Bid {
        /// Volume to buy.
        volume: Decimal,
        /// Maximum acceptable unit price.
        limit_price: Decimal,
    },
    /// Prosumer: storage dispatch, surplus offer, and deficit bid.
    Dispatch(ProsumerPlan),
    /// Producer: output, price, contract stance, and optional investment.
    Quote(ProducerPlan),
    /// Utility: wholesale procurement and retail pricing.
    Procure(UtilityPlan),
    /// Regulator: propose policy lever deltas, merged into the controller's
    /// rule output and jointly clamped to the per-tick step bound.
    AdjustPolicy {
        /// Proposed carbon tax change.
        carbon_tax_delta: Decimal,
        /// Proposed renewable incentive change.
        incentive_delta: Decimal,
    },
}

impl AgentAction {
    /// Whether this action is in the closed set for the given variant.
    pub const fn allowed_for(&self, kind: AgentKind) -> bool {
        match self {
            Self::Hold => true,
            Self::Bid { .. } => matches!(kind, AgentKind::Consumer),
            Self::Dispatch(_) => matches!(kind, AgentKind::Prosumer),
            Self::Quote(_) => matches!(kind, AgentKind::Producer),
            Self::Procure(_) => matches!(kind, AgentKind::Utility),
            Self::AdjustPolicy { .. } => matches!(kind, AgentKind::Regulator),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hold_is_allowed_for_every_variant() {
        for kind in [
            AgentKind::Consumer,
            AgentKind::Prosumer,
            AgentKind::Producer,
            AgentKind::Utility,
            AgentKind::Regulator,
        ] {
            assert!(AgentAction::Hold.allowed_for(kind));
        }
    }

    #[test]
    fn variant_actions_reject_other_kinds() {
        let bid = AgentAction::Bid {
            volume: Decimal::ONE,
            limit_price: Decimal::ONE,
        };
        assert!(bid.allowed_for(AgentKind::Consumer));
        assert!(!bid.allowed_for(AgentKind::Prosumer));
        assert!(!bid.allowed_for(AgentKind::Producer));

        let policy = AgentAction::AdjustPolicy {
            carbon_tax_delta: Decimal::ONE,
            incentive_delta: Decimal::ZERO,
        };
        assert!(policy.allowed_for(AgentKind::Regulator));
        assert!(!policy.allowed_for(AgentKind::Utility));
    }

    #[test]
    fn action_roundtrip_serde() {
        let action = AgentAction::Quote(ProducerPlan {
            output: Decimal::new(500, 0),
            ask_price: Decimal::new(32, 0),
            accept_contracts: true,
            invest: None,
        });
        let json = serde_json::to_string(&action).unwrap();
        let restored: AgentAction = serde_json::from_str(&json).unwrap();
        assert_eq!(action, restored);
    }
}
