//! The regulatory controller.
//!
//! A reactive state machine run at the end of every tick: it reads the
//! latest metrics, merges any lever deltas the regulator's own oracle
//! proposed, applies the fixed adjustment rule, clamps the combined
//! change to the per-tick maximum step, and fines price gouging. Every
//! adjustment and penalty is an explicit [`MarketEvent`]; nothing here is
//! silent. New lever values take effect the following tick.
//!
//! The rule:
//!
//! - Raise the carbon tax when renewable penetration is below target and
//!   price volatility is below the ceiling (a hike into an already
//!   volatile market would compound the instability).
//! - Decay the carbon tax when penetration is comfortably above target
//!   (1.5x), so the lever does not ratchet forever.
//! - Raise the renewable incentive when penetration is below target and
//!   growing too slowly.

use rust_decimal::Decimal;
use tracing::info;

use gridmarket_types::{
    AgentId, MarketEvent, MarketEventKind, PolicyLever, PolicyLevers, Regulator, Segment,
    TickMetrics,
};

/// Lever deltas proposed by the regulator's oracle action.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyProposal {
    /// Proposed carbon tax change.
    pub carbon_tax_delta: Decimal,
    /// Proposed renewable incentive change.
    pub incentive_delta: Decimal,
}

/// A fine to apply against an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Penalty {
    /// The fined agent.
    pub agent: AgentId,
    /// Amount transferred to the regulator.
    pub amount: Decimal,
    /// Why the penalty was imposed.
    pub reason: String,
}

/// Everything the controller reads for one review.
#[derive(Debug)]
pub struct ReviewInputs<'a> {
    /// The tick being reviewed.
    pub tick: u64,
    /// The tick's committed metrics.
    pub metrics: &'a TickMetrics,
    /// Renewable penetration at the previous tick, for the growth check.
    pub previous_penetration: Option<f64>,
    /// Lever deltas proposed by the regulator's oracle, if any.
    pub proposal: Option<PolicyProposal>,
    /// Asking prices observed this tick: `(agent, segment, ask price)`.
    pub asks: &'a [(AgentId, Segment, Decimal)],
    /// Trailing local clearing price.
    pub trailing_local: Option<Decimal>,
    /// Trailing wholesale clearing price.
    pub trailing_wholesale: Option<Decimal>,
}

/// The outcome of one review.
#[derive(Debug, Clone)]
pub struct PolicyReview {
    /// Lever values for the next tick.
    pub levers: PolicyLevers,
    /// Adjustment and penalty events.
    pub events: Vec<MarketEvent>,
    /// Fines for the scheduler to apply.
    pub penalties: Vec<Penalty>,
}

/// Run one regulatory review.
pub fn review(regulator: &Regulator, inputs: &ReviewInputs<'_>) -> PolicyReview {
    let rule = &regulator.rule;
    let metrics = inputs.metrics;
    let mut events = Vec::new();

    let target = decimal_to_f64(rule.renewable_target);
    let below_target = metrics.renewable_penetration < target;
    let calm = metrics.price_volatility < rule.volatility_ceiling;
    let growth = inputs
        .previous_penetration
        .map_or(0.0, |prev| metrics.renewable_penetration - prev);

    // --- Carbon tax ---
    let mut tax_delta = inputs.proposal.map_or(Decimal::ZERO, |p| p.carbon_tax_delta);
    let mut tax_cause = inputs
        .proposal
        .filter(|p| p.carbon_tax_delta != Decimal::ZERO)
        .map(|_| "oracle proposal".to_owned());

    if below_target && calm {
        tax_delta = tax_delta.saturating_add(rule.max_step);
        tax_cause = Some(format!(
            "renewable penetration {:.3} below target {target:.3}",
            metrics.renewable_penetration
        ));
    } else if metrics.renewable_penetration > target * 1.5 {
        tax_delta = tax_delta.saturating_sub(rule.max_step);
        tax_cause = Some(format!(
            "renewable penetration {:.3} well above target {target:.3}",
            metrics.renewable_penetration
        ));
    }

    // --- Renewable incentive ---
    let mut incentive_delta = inputs.proposal.map_or(Decimal::ZERO, |p| p.incentive_delta);
    let mut incentive_cause = inputs
        .proposal
        .filter(|p| p.incentive_delta != Decimal::ZERO)
        .map(|_| "oracle proposal".to_owned());

    if below_target && growth < rule.growth_floor {
        incentive_delta = incentive_delta.saturating_add(rule.max_step);
        incentive_cause = Some(format!(
            "renewable growth {growth:.4} below floor {:.4}",
            rule.growth_floor
        ));
    }

    // Bounded adjustment: the combined delta never exceeds the step
    // limit, and levers never go negative.
    let step = rule.max_step;
    let levers = regulator.levers;
    let carbon_tax = levers
        .carbon_tax
        .saturating_add(tax_delta.clamp(-step, step))
        .max(Decimal::ZERO);
    let renewable_incentive = levers
        .renewable_incentive
        .saturating_add(incentive_delta.clamp(-step, step))
        .max(Decimal::ZERO);

    if carbon_tax != levers.carbon_tax {
        info!(
            tick = inputs.tick,
            previous = %levers.carbon_tax,
            updated = %carbon_tax,
            "Carbon tax adjusted"
        );
        events.push(MarketEvent {
            tick: inputs.tick,
            kind: MarketEventKind::PolicyAdjusted {
                lever: PolicyLever::CarbonTax,
                previous: levers.carbon_tax,
                updated: carbon_tax,
                cause: tax_cause.unwrap_or_else(|| "adjustment rule".to_owned()),
            },
        });
    }
    if renewable_incentive != levers.renewable_incentive {
        info!(
            tick = inputs.tick,
            previous = %levers.renewable_incentive,
            updated = %renewable_incentive,
            "Renewable incentive adjusted"
        );
        events.push(MarketEvent {
            tick: inputs.tick,
            kind: MarketEventKind::PolicyAdjusted {
                lever: PolicyLever::RenewableIncentive,
                previous: levers.renewable_incentive,
                updated: renewable_incentive,
                cause: incentive_cause.unwrap_or_else(|| "adjustment rule".to_owned()),
            },
        });
    }

    // --- Price gouging ---
    let penalties = detect_gouging(regulator, inputs, &mut events);

    PolicyReview {
        levers: PolicyLevers {
            carbon_tax,
            renewable_incentive,
        },
        events,
        penalties,
    }
}

/// Fine every ask priced above the gouging threshold of its segment.
fn detect_gouging(
    regulator: &Regulator,
    inputs: &ReviewInputs<'_>,
    events: &mut Vec<MarketEvent>,
) -> Vec<Penalty> {
    let rule = &regulator.rule;
    let mut penalties = Vec::new();

    for (agent, segment, ask_price) in inputs.asks {
        let trailing = match segment {
            Segment::Local => inputs.trailing_local,
            Segment::Wholesale => inputs.trailing_wholesale,
        };
        let Some(trailing) = trailing else {
            continue;
        };

        let threshold = trailing.saturating_mul(rule.gouging_multiple);
        if *ask_price <= threshold {
            continue;
        }

        let excess = ask_price.saturating_sub(threshold);
        let amount = excess.saturating_mul(rule.gouging_fine_rate).round_dp(2);
        if amount <= Decimal::ZERO {
            continue;
        }

        info!(
            tick = inputs.tick,
            agent = %agent,
            %ask_price,
            %threshold,
            %amount,
            "Price gouging fined"
        );
        events.push(MarketEvent {
            tick: inputs.tick,
            kind: MarketEventKind::PenaltyImposed {
                agent: *agent,
                amount,
                reason: format!(
                    "price gouging: ask {ask_price} above threshold {threshold} on the {segment} segment"
                ),
            },
        });
        penalties.push(Penalty {
            agent: *agent,
            amount,
            reason: "price gouging".to_owned(),
        });
    }

    penalties
}

fn decimal_to_f64(value: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64().unwrap_or(0.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gridmarket_types::{
        AdjustmentRule, AgentCommon, AgentKind, History, Persona,
    };

    use super::*;

    fn regulator(carbon_tax: i64, incentive: i64) -> Regulator {
        Regulator {
            common: AgentCommon {
                id: AgentId::new(AgentKind::Regulator, 0),
                persona: Persona::default(),
                balance: Decimal::ZERO,
                history: History::new(4),
            },
            levers: PolicyLevers {
                carbon_tax: Decimal::new(carbon_tax, 0),
                renewable_incentive: Decimal::new(incentive, 0),
            },
            rule: AdjustmentRule {
                renewable_target: Decimal::new(3, 1),
                volatility_ceiling: 15.0,
                growth_floor: 0.01,
                max_step: Decimal::new(2, 0),
                gouging_multiple: Decimal::new(12, 1),
                gouging_fine_rate: Decimal::new(2, 0),
            },
        }
    }

    fn metrics(penetration: f64, volatility: f64) -> TickMetrics {
        TickMetrics {
            price_volatility: volatility,
            supply_demand_mismatch: 0.0,
            renewable_penetration: penetration,
            renewable_stability: 0.5,
            wholesale_concentration: 0.2,
        }
    }

    fn inputs<'a>(metrics: &'a TickMetrics, asks: &'a [(AgentId, Segment, Decimal)]) -> ReviewInputs<'a> {
        ReviewInputs {
            tick: 5,
            metrics,
            previous_penetration: Some(metrics.renewable_penetration),
            proposal: None,
            asks,
            trailing_local: Some(Decimal::new(100, 0)),
            trailing_wholesale: Some(Decimal::new(30, 0)),
        }
    }

    #[test]
    fn low_penetration_in_calm_market_raises_tax() {
        let reg = regulator(10, 5);
        let m = metrics(0.1, 5.0);
        let outcome = review(&reg, &inputs(&m, &[]));
        assert_eq!(outcome.levers.carbon_tax, Decimal::new(12, 0));
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e.kind, MarketEventKind::PolicyAdjusted { lever: PolicyLever::CarbonTax, .. })));
    }

    #[test]
    fn volatile_market_suppresses_tax_hike() {
        let reg = regulator(10, 5);
        let m = metrics(0.1, 50.0);
        let outcome = review(&reg, &inputs(&m, &[]));
        assert_eq!(outcome.levers.carbon_tax, Decimal::new(10, 0));
    }

    #[test]
    fn high_penetration_decays_tax() {
        let reg = regulator(10, 5);
        let m = metrics(0.6, 5.0);
        let outcome = review(&reg, &inputs(&m, &[]));
        assert_eq!(outcome.levers.carbon_tax, Decimal::new(8, 0));
    }

    #[test]
    fn stalled_growth_raises_incentive() {
        let reg = regulator(10, 5);
        let m = metrics(0.1, 5.0);
        let mut i = inputs(&m, &[]);
        i.previous_penetration = Some(0.1); // zero growth
        let outcome = review(&reg, &i);
        assert_eq!(outcome.levers.renewable_incentive, Decimal::new(7, 0));
    }

    #[test]
    fn adjustments_never_exceed_max_step() {
        let reg = regulator(10, 5);
        let m = metrics(0.1, 5.0);
        let mut i = inputs(&m, &[]);
        // An extreme oracle proposal on top of the rule must still clamp.
        i.proposal = Some(PolicyProposal {
            carbon_tax_delta: Decimal::new(100, 0),
            incentive_delta: Decimal::new(-100, 0),
        });
        let outcome = review(&reg, &i);
        assert_eq!(outcome.levers.carbon_tax, Decimal::new(12, 0));
        assert_eq!(outcome.levers.renewable_incentive, Decimal::new(7, 0));
    }

    #[test]
    fn levers_never_go_negative() {
        let reg = regulator(1, 0);
        let m = metrics(0.6, 5.0); // decay branch, delta -2
        let outcome = review(&reg, &inputs(&m, &[]));
        assert_eq!(outcome.levers.carbon_tax, Decimal::ZERO);
        assert_eq!(outcome.levers.renewable_incentive, Decimal::ZERO);
    }

    #[test]
    fn gouging_ask_is_fined_relative_to_trailing_price() {
        let reg = regulator(10, 5);
        let m = metrics(0.5, 5.0);
        let seller = AgentId::new(AgentKind::Producer, 0);
        // Threshold: 30 * 1.2 = 36; ask 50 exceeds by 14; fine 28.
        let asks = vec![(seller, Segment::Wholesale, Decimal::new(50, 0))];
        let outcome = review(&reg, &inputs(&m, &asks));
        assert_eq!(outcome.penalties.len(), 1);
        let penalty = outcome.penalties.first().unwrap();
        assert_eq!(penalty.agent, seller);
        assert_eq!(penalty.amount, Decimal::new(28, 0));
    }

    #[test]
    fn asks_below_threshold_are_not_fined() {
        let reg = regulator(10, 5);
        let m = metrics(0.5, 5.0);
        let seller = AgentId::new(AgentKind::Producer, 0);
        let asks = vec![(seller, Segment::Wholesale, Decimal::new(35, 0))];
        let outcome = review(&reg, &inputs(&m, &asks));
        assert!(outcome.penalties.is_empty());
    }

    #[test]
    fn no_trailing_price_means_no_gouging_check() {
        let reg = regulator(10, 5);
        let m = metrics(0.5, 5.0);
        let seller = AgentId::new(AgentKind::Prosumer, 0);
        let asks = vec![(seller, Segment::Local, Decimal::new(900, 0))];
        let mut i = inputs(&m, &asks);
        i.trailing_local = None;
        let outcome = review(&reg, &i);
        assert!(outcome.penalties.is_empty());
    }
}
