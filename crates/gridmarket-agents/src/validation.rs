//! Clamp-to-boundary sanitation of oracle actions.
//!
//! Invalid values never reach the clearing engine unclamped: negative
//! prices and volumes clamp to zero, a producer's output clamps into
//! `0..=capacity`, and every correction is recorded as a
//! [`MarketEventKind::ValueClamped`] event. An action whose variant does
//! not match the agent's kind is replaced by the deterministic fallback
//! and recorded as an oracle fallback.

use rust_decimal::Decimal;
use tracing::debug;

use gridmarket_types::{
    Agent, AgentAction, MarketEvent, MarketEventKind, ProducerPlan, ProsumerPlan, UtilityPlan,
};

/// Clamp a single field to zero if negative, recording an event.
fn clamp_non_negative(
    tick: u64,
    agent: &Agent,
    field: &str,
    value: Decimal,
    events: &mut Vec<MarketEvent>,
) -> Decimal {
    if value < Decimal::ZERO {
        debug!(tick, agent = %agent.id(), field, %value, "Clamped negative action value");
        events.push(MarketEvent {
            tick,
            kind: MarketEventKind::ValueClamped {
                agent: agent.id(),
                field: field.to_owned(),
                requested: value,
                applied: Decimal::ZERO,
            },
        });
        Decimal::ZERO
    } else {
        value
    }
}

/// Clamp a field into `0..=limit`, recording an event on either correction.
fn clamp_range(
    tick: u64,
    agent: &Agent,
    field: &str,
    value: Decimal,
    limit: Decimal,
    events: &mut Vec<MarketEvent>,
) -> Decimal {
    let clamped = value.clamp(Decimal::ZERO, limit);
    if clamped != value {
        debug!(tick, agent = %agent.id(), field, %value, %clamped, "Clamped out-of-range action value");
        events.push(MarketEvent {
            tick,
            kind: MarketEventKind::ValueClamped {
                agent: agent.id(),
                field: field.to_owned(),
                requested: value,
                applied: clamped,
            },
        });
    }
    clamped
}

/// Sanitize one agent's action for one tick.
///
/// Returns the action to execute plus the clamp/fallback events produced.
/// A variant mismatch yields [`AgentAction::Hold`] with an
/// [`MarketEventKind::OracleFallback`] event; out-of-range numeric fields
/// are clamped to the nearest boundary.
pub fn sanitize_action(
    tick: u64,
    agent: &Agent,
    action: AgentAction,
) -> (AgentAction, Vec<MarketEvent>) {
    let mut events = Vec::new();

    if !action.allowed_for(agent.kind()) {
        events.push(MarketEvent {
            tick,
            kind: MarketEventKind::OracleFallback {
                agent: agent.id(),
                reason: format!("action not in the {} action set", agent.kind()),
            },
        });
        return (AgentAction::Hold, events);
    }

    let sanitized = match action {
        AgentAction::Hold | AgentAction::AdjustPolicy { .. } => action,
        AgentAction::Bid { volume, limit_price } => AgentAction::Bid {
            volume: clamp_non_negative(tick, agent, "bid.volume", volume, &mut events),
            limit_price: clamp_non_negative(
                tick,
                agent,
                "bid.limit_price",
                limit_price,
                &mut events,
            ),
        },
        AgentAction::Dispatch(plan) => {
            AgentAction::Dispatch(sanitize_prosumer_plan(tick, agent, plan, &mut events))
        }
        AgentAction::Quote(plan) => {
            AgentAction::Quote(sanitize_producer_plan(tick, agent, plan, &mut events))
        }
        AgentAction::Procure(plan) => {
            AgentAction::Procure(sanitize_utility_plan(tick, agent, plan, &mut events))
        }
    };

    (sanitized, events)
}

fn sanitize_prosumer_plan(
    tick: u64,
    agent: &Agent,
    plan: ProsumerPlan,
    events: &mut Vec<MarketEvent>,
) -> ProsumerPlan {
    ProsumerPlan {
        draw_storage: clamp_non_negative(tick, agent, "dispatch.draw_storage", plan.draw_storage, events),
        store_surplus: clamp_non_negative(tick, agent, "dispatch.store_surplus", plan.store_surplus, events),
        sell_volume: clamp_non_negative(tick, agent, "dispatch.sell_volume", plan.sell_volume, events),
        ask_price: clamp_non_negative(tick, agent, "dispatch.ask_price", plan.ask_price, events),
        deficit_limit_price: clamp_non_negative(
            tick,
            agent,
            "dispatch.deficit_limit_price",
            plan.deficit_limit_price,
            events,
        ),
    }
}

fn sanitize_producer_plan(
    tick: u64,
    agent: &Agent,
    plan: ProducerPlan,
    events: &mut Vec<MarketEvent>,
) -> ProducerPlan {
    let capacity = match agent {
        Agent::Producer(p) => p.capacity,
        _ => Decimal::ZERO,
    };
    ProducerPlan {
        output: clamp_range(tick, agent, "quote.output", plan.output, capacity, events),
        ask_price: clamp_non_negative(tick, agent, "quote.ask_price", plan.ask_price, events),
        accept_contracts: plan.accept_contracts,
        invest: plan
            .invest
            .map(|amount| clamp_non_negative(tick, agent, "quote.invest", amount, events))
            .filter(|amount| *amount > Decimal::ZERO),
    }
}

fn sanitize_utility_plan(
    tick: u64,
    agent: &Agent,
    plan: UtilityPlan,
    events: &mut Vec<MarketEvent>,
) -> UtilityPlan {
    let contract_request = plan.contract_request.map(|mut request| {
        request.volume_per_tick = clamp_non_negative(
            tick,
            agent,
            "procure.contract.volume_per_tick",
            request.volume_per_tick,
            events,
        );
        request.unit_price = clamp_non_negative(
            tick,
            agent,
            "procure.contract.unit_price",
            request.unit_price,
            events,
        );
        request
    });

    UtilityPlan {
        procure_volume: clamp_non_negative(
            tick,
            agent,
            "procure.volume",
            plan.procure_volume,
            events,
        ),
        limit_price: clamp_non_negative(tick, agent, "procure.limit_price", plan.limit_price, events),
        resale_price: clamp_non_negative(
            tick,
            agent,
            "procure.resale_price",
            plan.resale_price,
            events,
        ),
        contract_request,
    }
}
