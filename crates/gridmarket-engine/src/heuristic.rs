//! A deterministic rule-based decision oracle.
//!
//! Stands where an external LLM runner would: consumers bid their need
//! near the going price, prosumers cover their own need and sell the
//! rest, producers quote cost-plus while tracking the market, and
//! utilities refill storage and contract ahead when inventory runs low.
//! Every decision is a pure function of agent state and the snapshot --
//! no randomness -- so engine runs replay exactly.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use gridmarket_agents::AgentTable;
use gridmarket_core::oracle::{DecisionOracle, OracleError, OracleReply};
use gridmarket_types::{
    Agent, AgentAction, AgentId, ContractRequest, MarketSnapshot, ProducerPlan, ProsumerPlan,
    UtilityPlan,
};

/// Margin consumers accept above the going price.
const BID_MARKUP: Decimal = Decimal::from_parts(11, 0, 0, false, 1); // 1.1

/// Discount prosumers offer below the going price to sell first.
const PROSUMER_DISCOUNT: Decimal = Decimal::from_parts(95, 0, 0, false, 2); // 0.95

/// Producer margin over marginal cost.
const PRODUCER_MARGIN: Decimal = Decimal::from_parts(115, 0, 0, false, 2); // 1.15

/// Utility retail margin over the going price.
const RETAIL_MARGIN: Decimal = Decimal::from_parts(110, 0, 0, false, 2); // 1.10

/// Inventory fraction below which a utility seeks a new contract.
const CONTRACT_TRIGGER: Decimal = Decimal::from_parts(2, 0, 0, false, 1); // 0.2

/// The deterministic heuristic oracle.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicOracle;

impl HeuristicOracle {
    /// Create a new heuristic oracle.
    pub const fn new() -> Self {
        Self
    }
}

impl DecisionOracle for HeuristicOracle {
    fn collect_decisions(
        &mut self,
        _tick: u64,
        snapshot: &MarketSnapshot,
        agents: &AgentTable,
    ) -> Result<BTreeMap<AgentId, OracleReply>, OracleError> {
        let decisions = agents
            .iter()
            .map(|agent| (agent.id(), OracleReply::Action(decide(agent, snapshot, agents))))
            .collect();
        Ok(decisions)
    }
}

/// Decide one agent's action from its state and the snapshot.
fn decide(agent: &Agent, snapshot: &MarketSnapshot, agents: &AgentTable) -> AgentAction {
    let local_anchor = snapshot.local_price.unwrap_or(snapshot.reference_price);

    match agent {
        Agent::Consumer(c) => AgentAction::Bid {
            volume: c.profile.energy_need,
            limit_price: local_anchor.saturating_mul(BID_MARKUP).round_dp(2),
        },
        Agent::Prosumer(p) => {
            // Production here is last tick's level; close enough for a
            // dispatch heuristic.
            let deficit = p
                .profile
                .energy_need
                .saturating_sub(p.production)
                .max(Decimal::ZERO);
            let surplus = p
                .production
                .saturating_sub(p.profile.energy_need)
                .max(Decimal::ZERO);
            AgentAction::Dispatch(ProsumerPlan {
                draw_storage: deficit.min(p.storage),
                store_surplus: p.storage_capacity.saturating_sub(p.storage),
                sell_volume: surplus,
                ask_price: local_anchor.saturating_mul(PROSUMER_DISCOUNT).round_dp(2),
                deficit_limit_price: local_anchor.saturating_mul(BID_MARKUP).round_dp(2),
            })
        }
        Agent::Producer(p) => {
            let wholesale_anchor = snapshot.wholesale_price.unwrap_or(snapshot.reference_price);
            let floor = p
                .cost
                .unit_cost(p.capacity)
                .saturating_mul(PRODUCER_MARGIN)
                .round_dp(2);
            // Smooth toward the market the way real quoting drifts.
            let target = wholesale_anchor.max(floor);
            let ask = (p.ask_price.saturating_add(target))
                .saturating_mul(Decimal::new(5, 1))
                .round_dp(2);
            // Run flat out while the market pays above cost.
            let output = if wholesale_anchor >= p.cost.unit_cost(Decimal::ZERO) {
                p.capacity
            } else {
                p.capacity.saturating_mul(Decimal::new(5, 1)).round_dp(3)
            };
            AgentAction::Quote(ProducerPlan {
                output,
                ask_price: ask,
                accept_contracts: true,
                invest: None,
            })
        }
        Agent::Utility(u) => {
            let refill = u.storage_capacity.saturating_sub(u.inventory);
            let trigger = u.storage_capacity.saturating_mul(CONTRACT_TRIGGER);
            let contract_request = (u.inventory < trigger)
                .then(|| cheapest_producer_request(agents, u.storage_capacity))
                .flatten();
            let wholesale_anchor = snapshot.wholesale_price.unwrap_or(snapshot.reference_price);
            AgentAction::Procure(UtilityPlan {
                procure_volume: refill,
                limit_price: wholesale_anchor.saturating_mul(BID_MARKUP).round_dp(2),
                resale_price: local_anchor.saturating_mul(RETAIL_MARGIN).round_dp(2),
                contract_request,
            })
        }
        // The reactive controller handles lever adjustment on its own.
        Agent::Regulator(_) => AgentAction::Hold,
    }
}

/// Propose a contract with the cheapest-quoting producer.
fn cheapest_producer_request(
    agents: &AgentTable,
    storage_capacity: Decimal,
) -> Option<ContractRequest> {
    let cheapest = agents
        .producers()
        .min_by(|a, b| a.ask_price.cmp(&b.ask_price).then(a.common.id.cmp(&b.common.id)))?;
    let volume = storage_capacity
        .saturating_mul(Decimal::new(1, 1))
        .round_dp(3);
    if volume <= Decimal::ZERO {
        return None;
    }
    Some(ContractRequest {
        seller: cheapest.common.id,
        volume_per_tick: volume,
        unit_price: cheapest.ask_price,
        periods: 6,
    })
}
