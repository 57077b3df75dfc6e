//! Reporting records produced for every tick.
//!
//! The core guarantees field completeness and ordering by tick; column
//! layout and on-disk serialization belong to an external consumer.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::AgentKind;
use crate::ids::AgentId;
use crate::structs::PolicyLevers;

/// Derived market-health statistics for one tick.
///
/// Recomputing these from the same committed trade history yields
/// bit-identical values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickMetrics {
    /// Rolling standard deviation of the clearing price over the window.
    pub price_volatility: f64,
    /// `(total supply - total demand) / total demand`, signed; 0 when
    /// demand is zero.
    pub supply_demand_mismatch: f64,
    /// Renewable-tagged traded volume over total traded volume, in `0..=1`.
    pub renewable_penetration: f64,
    /// `1 - cv(renewable penetration)` over the window, clamped to `0..=1`;
    /// defined as 0 when mean penetration is 0.
    pub renewable_stability: f64,
    /// Herfindahl-Hirschman index of wholesale sellers by traded volume,
    /// in `0..=1`.
    pub wholesale_concentration: f64,
}

/// The per-tick market record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRecord {
    /// The tick this record describes.
    pub tick: u64,
    /// Local clearing price, if the segment traded.
    pub local_price: Option<Decimal>,
    /// Wholesale clearing price, if the segment traded.
    pub wholesale_price: Option<Decimal>,
    /// Total volume offered for sale across both segments.
    pub total_supply: Decimal,
    /// Total volume bid for across both segments.
    pub total_demand: Decimal,
    /// Policy levers in force during the tick.
    pub levers: PolicyLevers,
    /// Derived market-health metrics.
    pub metrics: TickMetrics,
}

/// Role-specific reporting fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum AgentDetail {
    /// Consumer fields.
    Consumer {
        /// Energy need this tick.
        energy_need: Decimal,
        /// Volume actually purchased.
        purchased: Decimal,
    },
    /// Prosumer fields.
    Prosumer {
        /// Production this tick.
        production: Decimal,
        /// Storage level after commit.
        storage: Decimal,
        /// Volume sold on the local segment.
        sold: Decimal,
        /// Volume purchased to cover the deficit.
        purchased: Decimal,
    },
    /// Producer fields.
    Producer {
        /// Output this tick.
        output: Decimal,
        /// Asking price this tick.
        ask_price: Decimal,
        /// Volume sold (spot plus contract deliveries).
        sold: Decimal,
        /// Capacity after any investment effects.
        capacity: Decimal,
    },
    /// Utility fields.
    Utility {
        /// Inventory after commit.
        inventory: Decimal,
        /// Posted resale price.
        resale_price: Decimal,
        /// Volume procured wholesale (spot plus contract deliveries).
        procured: Decimal,
        /// Renewable-tagged share of that procurement.
        renewable_procured: Decimal,
        /// Volume distributed on the local segment.
        distributed: Decimal,
    },
    /// Regulator fields.
    Regulator {
        /// Carbon tax in force.
        carbon_tax: Decimal,
        /// Renewable incentive in force.
        renewable_incentive: Decimal,
        /// Penalties imposed this tick.
        penalties_imposed: u32,
    },
}

/// The per-tick per-agent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// The tick this record describes.
    pub tick: u64,
    /// The agent.
    pub agent: AgentId,
    /// The agent's variant.
    pub kind: AgentKind,
    /// Balance after commit.
    pub balance: Decimal,
    /// Profit this tick: sales revenue minus purchase cost minus taxes
    /// plus incentives.
    pub tick_profit: Decimal,
    /// Cumulative profit since tick 1.
    pub cumulative_profit: Decimal,
    /// Role-specific fields.
    pub detail: AgentDetail,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn agent_record_roundtrip_serde() {
        let record = AgentRecord {
            tick: 5,
            agent: AgentId::new(AgentKind::Consumer, 1),
            kind: AgentKind::Consumer,
            balance: Decimal::new(1500, 0),
            tick_profit: Decimal::new(-120, 0),
            cumulative_profit: Decimal::new(-480, 0),
            detail: AgentDetail::Consumer {
                energy_need: Decimal::new(100, 0),
                purchased: Decimal::new(100, 0),
            },
        };
        let json = serde_json::to_string(&record).unwrap();
        let restored: AgentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, restored);
    }
}
