//! The tick scheduler: the phased loop that drives the market.
//!
//! Each tick runs through a fixed phase order:
//!
//! 1. **Snapshot** -- advance the tick counter, apply investments booked
//!    last tick, and build an immutable [`MarketSnapshot`] from the prior
//!    tick's committed state.
//! 2. **Decision** -- collect one action per agent from the
//!    [`DecisionOracle`], agents in ascending id order. Failures become
//!    the deterministic fallback; invalid values are clamped and flagged.
//! 3. **Plans** -- producers publish output and price, prosumer production
//!    and storage flows resolve against physical bounds, utilities post
//!    resale prices.
//! 4. **Settlement** -- active contracts settle at locked prices before
//!    the spot market sees either party; new contracts form from matched
//!    request/acceptance pairs.
//! 5. **Clearing** -- both segments clear on the tick's offers.
//! 6. **Commit** -- every balance, inventory, and storage delta lands in
//!    one pass; trades and cash entries append to the ledgers;
//!    conservation is verified.
//! 7. **Metrics** -- the collector recomputes market health from the
//!    committed history.
//! 8. **Regulation** -- the controller reviews the tick, adjusts levers
//!    for the next tick, and fines misconduct.
//!
//! Tick `t+1` depends only on the committed outcome of tick `t`; no
//! component observes an intermediate state.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use gridmarket_agents::{
    sanitize_action, spawn_population, AgentTable, GenerationModel, PopulationError,
};
use gridmarket_clearing::{clear_uniform, clear_wholesale, Ask, Bid, Fill, WholesaleBid};
use gridmarket_ledger::{
    CashEntryKind, CashLedger, ConservationResult, ContractBook, LedgerAnomaly, LedgerError,
    TradeLog, TradeParams,
};
use gridmarket_types::{
    Agent, AgentAction, AgentDetail, AgentId, AgentKind, AgentRecord, MarketEvent,
    MarketEventKind, MarketRecord, MarketSnapshot, Observation, Offer, Segment, Side,
    TickMetrics,
};

use crate::config::{ConfigError, SimulationConfig};
use crate::metrics::{self, MetricsCollector};
use crate::oracle::{DecisionOracle, OracleError, OracleReply};
use crate::regulator::{self, PolicyProposal, ReviewInputs};

/// Errors that can occur during setup or tick execution.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// The configuration is invalid.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// Population construction failed.
    #[error("population error: {source}")]
    Population {
        /// The underlying population error.
        #[from]
        source: PopulationError,
    },

    /// The decision phase failed as a whole.
    #[error("oracle error: {source}")]
    Oracle {
        /// The underlying oracle error.
        #[from]
        source: OracleError,
    },

    /// A ledger append was rejected.
    #[error("ledger error: {source}")]
    Ledger {
        /// The underlying ledger error.
        #[from]
        source: LedgerError,
    },

    /// Conservation verification failed after commit.
    #[error("conservation violated: {anomaly}")]
    Conservation {
        /// The detected anomaly.
        anomaly: LedgerAnomaly,
    },

    /// The simulation has no regulator agent.
    #[error("no regulator in the agent table")]
    MissingRegulator,
}

/// Summary of a single committed tick.
#[derive(Debug, Clone)]
pub struct TickSummary {
    /// The tick number that was executed.
    pub tick: u64,
    /// The per-tick market record.
    pub market: MarketRecord,
    /// Per-agent records, in ascending id order.
    pub agents: Vec<AgentRecord>,
    /// Events recorded during the tick.
    pub events: Vec<MarketEvent>,
}

/// The mutable simulation state threaded through the tick cycle.
///
/// The scheduler exclusively owns tick progression and the canonical
/// agent table; components receive explicit references, never globals.
#[derive(Debug)]
pub struct SimulationState {
    /// The last committed tick; 0 before the first tick runs.
    pub tick: u64,
    /// The canonical agent table.
    pub agents: AgentTable,
    /// The active contract set.
    pub contracts: ContractBook,
    /// The append-only trade log.
    pub trades: TradeLog,
    /// The append-only cash ledger.
    pub cash: CashLedger,
    /// All events recorded so far.
    pub events: Vec<MarketEvent>,
    /// Weather-driven production model.
    pub generation: GenerationModel,
    /// Metrics collector.
    pub collector: MetricsCollector,
    /// Price anchor before the first clearing.
    pub initial_price: Decimal,
    /// Penalty rate on undelivered contract value.
    pub shortfall_penalty_rate: Decimal,
    /// Local clearing price of the last committed tick.
    pub last_local_price: Option<Decimal>,
    /// Wholesale clearing price of the last committed tick.
    pub last_wholesale_price: Option<Decimal>,
    /// Offered supply of the last committed tick.
    pub last_total_supply: Decimal,
    /// Offered demand of the last committed tick.
    pub last_total_demand: Decimal,
    /// Renewable penetration of the last committed tick.
    pub last_penetration: Option<f64>,
}

impl SimulationState {
    /// Build a fresh simulation from a validated configuration.
    ///
    /// Spawns the population and seeds the initial utility-producer
    /// contracts that cover the expected retail demand, the way the
    /// market opens with standing supply agreements rather than a cold
    /// spot market.
    ///
    /// # Errors
    ///
    /// Returns [`TickError`] if the configuration is invalid or the
    /// population cannot be constructed.
    pub fn from_config(config: &SimulationConfig) -> Result<Self, TickError> {
        config.validate()?;
        let agents = spawn_population(&config.population_spec())?;

        let mut state = Self {
            tick: 0,
            agents,
            contracts: ContractBook::new(),
            trades: TradeLog::new(),
            cash: CashLedger::new(),
            events: Vec::new(),
            generation: GenerationModel::new(config.run.seed),
            collector: MetricsCollector::new(config.metrics.window),
            initial_price: config.market.initial_price,
            shortfall_penalty_rate: config.policy.shortfall_penalty_rate,
            last_local_price: None,
            last_wholesale_price: None,
            last_total_supply: Decimal::ZERO,
            last_total_demand: Decimal::ZERO,
            last_penetration: None,
        };
        state.seed_initial_contracts();
        Ok(state)
    }

    /// Open the standing contracts that cover expected retail demand.
    fn seed_initial_contracts(&mut self) {
        let total_need: Decimal = self
            .agents
            .consumers()
            .map(|c| c.profile.energy_need)
            .chain(self.agents.prosumers().map(|p| p.profile.energy_need))
            .fold(Decimal::ZERO, |acc, n| acc.saturating_add(n));

        let utilities: Vec<AgentId> = self.agents.utilities().map(|u| u.common.id).collect();
        let producers: Vec<AgentId> = self.agents.producers().map(|p| p.common.id).collect();
        let Some(per_utility) = total_need.checked_div(Decimal::from(utilities.len() as u64))
        else {
            return;
        };
        let per_utility = per_utility.round_dp(3);

        for (u_idx, utility) in utilities.iter().enumerate() {
            let mut remaining = per_utility;
            for (p_idx, producer_id) in producers.iter().enumerate() {
                if remaining <= Decimal::ZERO {
                    break;
                }
                let Some(Agent::Producer(producer)) = self.agents.get(*producer_id) else {
                    continue;
                };
                let uncommitted = producer
                    .capacity
                    .saturating_sub(self.contracts.reserved_sale(*producer_id));
                let volume = remaining.min(uncommitted);
                if volume <= Decimal::ZERO {
                    continue;
                }

                let periods = 2 + ((u_idx + p_idx) % 4) as u32;
                let request = gridmarket_types::ContractRequest {
                    seller: *producer_id,
                    volume_per_tick: volume,
                    unit_price: producer.ask_price,
                    periods,
                };
                if let Ok(contract) = self.contracts.open(0, *utility, &request) {
                    self.events.push(MarketEvent {
                        tick: 0,
                        kind: MarketEventKind::ContractFormed {
                            contract: contract.id,
                            buyer: contract.buyer,
                            seller: contract.seller,
                            volume_per_tick: contract.volume_per_tick,
                            unit_price: contract.unit_price,
                            periods,
                        },
                    });
                    remaining = remaining.saturating_sub(volume);
                }
            }
        }

        // Producers open with output matching their standing obligations.
        for producer_id in producers {
            let committed = self.contracts.reserved_sale(producer_id);
            if let Some(Agent::Producer(producer)) = self.agents.get_mut(producer_id) {
                producer.output = committed.min(producer.capacity);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Working structures
// ---------------------------------------------------------------------------

/// A trade computed during the tick, committed in phase 6.
#[derive(Debug, Clone)]
struct PendingTrade {
    segment: Segment,
    buyer: AgentId,
    seller: AgentId,
    volume: Decimal,
    price: Decimal,
    renewable: bool,
    contract: bool,
}

/// Resolved prosumer dispatch for one tick.
#[derive(Debug, Clone, Default)]
struct ProsumerFlows {
    draw: Decimal,
    store: Decimal,
    sell: Decimal,
    deficit_bid: Option<(Decimal, Decimal)>,
}

/// Everything phase 3 resolves from the sanitized actions.
#[derive(Debug, Default)]
struct PlanOutcome {
    prosumer_flows: BTreeMap<AgentId, ProsumerFlows>,
    /// Sink-bound costs: `(agent, kind, amount)`.
    costs: Vec<(AgentId, CashEntryKind, Decimal)>,
    /// Producers accepting contract requests this tick.
    accepting: BTreeMap<AgentId, bool>,
    /// The regulator's lever proposal, if any.
    proposal: Option<PolicyProposal>,
}

/// The tick's offer books plus observed ask prices.
///
/// `offers` is the flat record of everything placed this tick, in the
/// spec's offer shape; it is consumed with the tick and never persisted.
#[derive(Debug, Default)]
struct OfferBooks {
    local_bids: Vec<Bid>,
    local_asks: Vec<Ask>,
    wholesale_bids: Vec<WholesaleBid>,
    wholesale_asks: Vec<Ask>,
    /// Every offer placed this tick, both directions and segments.
    offers: Vec<Offer>,
    /// Asking prices for the gouging check: `(agent, segment, price)`.
    ask_prices: Vec<(AgentId, Segment, Decimal)>,
}

impl OfferBooks {
    /// Record the spec-shaped offer behind a book entry.
    fn note(
        &mut self,
        tick: u64,
        agent: AgentId,
        side: Side,
        segment: Segment,
        volume: Decimal,
        price: Decimal,
    ) {
        self.offers.push(Offer {
            agent,
            side,
            segment,
            volume,
            price,
            tick,
        });
    }

    fn total_supply(&self) -> Decimal {
        self.offers
            .iter()
            .filter(|o| o.side == Side::Sell)
            .fold(Decimal::ZERO, |acc, o| acc.saturating_add(o.volume))
    }

    fn total_demand(&self) -> Decimal {
        self.offers
            .iter()
            .filter(|o| o.side == Side::Buy)
            .fold(Decimal::ZERO, |acc, o| acc.saturating_add(o.volume))
    }
}

// ---------------------------------------------------------------------------
// Tick execution
// ---------------------------------------------------------------------------

/// Execute one complete tick.
///
/// # Errors
///
/// Returns [`TickError`] if the decision phase collapses, a ledger append
/// is rejected, or conservation verification fails. Per-agent oracle
/// failures are handled by the fallback policy and never abort the tick.
pub fn run_tick(
    state: &mut SimulationState,
    oracle: &mut dyn DecisionOracle,
) -> Result<TickSummary, TickError> {
    let tick = state.tick.saturating_add(1);
    let regulator_id = state.agents.regulator_id().ok_or(TickError::MissingRegulator)?;

    // --- Phase 1: snapshot ---
    apply_pending_capacity(state);
    let snapshot = build_snapshot(state, tick);
    info!(tick, reference_price = %snapshot.reference_price, "Tick started");

    // --- Phase 2: decision ---
    let replies = oracle.collect_decisions(tick, &snapshot, &state.agents)?;
    let (actions, mut events) = resolve_actions(state, tick, &replies);

    // --- Phase 3: plans ---
    let plans = apply_plans(state, tick, &actions);

    // --- Phase 4: contract settlement and formation ---
    let mut pending: Vec<PendingTrade> = Vec::new();
    let mut penalties: Vec<(AgentId, Decimal, String)> = Vec::new();
    let (contract_inflow, contract_delivered) =
        settle_contracts(state, tick, &mut pending, &mut penalties, &mut events);
    form_contracts(state, tick, &actions, &plans, &mut events);

    // --- Phase 5: clearing ---
    let books = build_offers(state, tick, &actions, &plans, &contract_inflow, &contract_delivered);
    let total_supply = books.total_supply();
    let total_demand = books.total_demand();

    let local = clear_uniform(&books.local_bids, &books.local_asks);
    let wholesale = clear_wholesale(&books.wholesale_bids, &books.wholesale_asks);
    queue_fills(&mut pending, Segment::Local, &local.fills, local.clearing_price);
    queue_fills(&mut pending, Segment::Wholesale, &wholesale.fills, wholesale.clearing_price);

    debug!(
        tick,
        local_price = ?local.clearing_price,
        wholesale_price = ?wholesale.clearing_price,
        trades = pending.len(),
        "Clearing complete"
    );

    // --- Phase 6: commit ---
    commit(state, tick, regulator_id, &pending, &plans, &penalties)?;
    verify_tick(state, tick)?;

    // --- Phase 7: metrics ---
    let tick_metrics = state
        .collector
        .compute(tick, &state.trades, total_supply, total_demand);

    // --- Phase 8: regulation ---
    let review_events = apply_regulation(state, tick, regulator_id, &tick_metrics, &plans, &books)?;
    events.extend(review_events);
    verify_tick(state, tick)?;

    // --- Records and history ---
    let market = MarketRecord {
        tick,
        local_price: local.clearing_price,
        wholesale_price: wholesale.clearing_price,
        total_supply,
        total_demand,
        levers: snapshot.levers,
        metrics: tick_metrics,
    };
    let agent_records = build_agent_records(state, tick, &snapshot, &events);
    push_observations(state, tick, local.clearing_price, wholesale.clearing_price);

    state.last_local_price = local.clearing_price.or(state.last_local_price);
    state.last_wholesale_price = wholesale.clearing_price.or(state.last_wholesale_price);
    state.last_total_supply = total_supply;
    state.last_total_demand = total_demand;
    state.last_penetration = Some(tick_metrics.renewable_penetration);
    state.tick = tick;
    state.events.extend(events.iter().cloned());

    info!(
        tick,
        trades = state.trades.for_tick(tick).count(),
        events = events.len(),
        "Tick committed"
    );

    Ok(TickSummary {
        tick,
        market,
        agents: agent_records,
        events,
    })
}

/// Investments booked last tick become capacity at the start of this one.
fn apply_pending_capacity(state: &mut SimulationState) {
    let ids: Vec<AgentId> = state.agents.producers().map(|p| p.common.id).collect();
    for id in ids {
        if let Some(Agent::Producer(p)) = state.agents.get_mut(id) {
            if p.pending_capacity > Decimal::ZERO {
                p.capacity = p.capacity.saturating_add(p.pending_capacity);
                p.pending_capacity = Decimal::ZERO;
            }
        }
    }
}

/// Build the immutable snapshot from the prior tick's committed state.
fn build_snapshot(state: &SimulationState, tick: u64) -> MarketSnapshot {
    let levers = state
        .agents
        .regulator()
        .map_or(
            gridmarket_types::PolicyLevers {
                carbon_tax: Decimal::ZERO,
                renewable_incentive: Decimal::ZERO,
            },
            |r| r.levers,
        );
    MarketSnapshot {
        tick,
        reference_price: state
            .last_wholesale_price
            .or(state.last_local_price)
            .unwrap_or(state.initial_price),
        local_price: state.last_local_price,
        wholesale_price: state.last_wholesale_price,
        total_supply: state.last_total_supply,
        total_demand: state.last_total_demand,
        levers,
    }
}

/// Convert oracle replies into sanitized actions plus events.
fn resolve_actions(
    state: &SimulationState,
    tick: u64,
    replies: &BTreeMap<AgentId, OracleReply>,
) -> (BTreeMap<AgentId, AgentAction>, Vec<MarketEvent>) {
    let mut actions = BTreeMap::new();
    let mut events = Vec::new();

    for agent in state.agents.iter() {
        let id = agent.id();
        let action = match replies.get(&id) {
            Some(OracleReply::Action(action)) => {
                let (sanitized, clamp_events) = sanitize_action(tick, agent, action.clone());
                events.extend(clamp_events);
                sanitized
            }
            Some(OracleReply::Failed { reason }) => {
                warn!(tick, agent = %id, reason = %reason, "Oracle failed; holding");
                events.push(MarketEvent {
                    tick,
                    kind: MarketEventKind::OracleFallback {
                        agent: id,
                        reason: reason.clone(),
                    },
                });
                AgentAction::Hold
            }
            None => {
                warn!(tick, agent = %id, "Oracle returned no reply; holding");
                events.push(MarketEvent {
                    tick,
                    kind: MarketEventKind::OracleFallback {
                        agent: id,
                        reason: "no reply".to_owned(),
                    },
                });
                AgentAction::Hold
            }
        };
        actions.insert(id, action);
    }

    (actions, events)
}

/// Phase 3: publish quotes, resolve prosumer dispatch, accrue costs.
fn apply_plans(
    state: &mut SimulationState,
    tick: u64,
    actions: &BTreeMap<AgentId, AgentAction>,
) -> PlanOutcome {
    let mut outcome = PlanOutcome::default();
    let ids: Vec<AgentId> = state.agents.ids().collect();

    for id in ids {
        let action = actions.get(&id).cloned().unwrap_or(AgentAction::Hold);
        let Some(agent) = state.agents.get_mut(id) else {
            continue;
        };

        match agent {
            Agent::Producer(p) => {
                if let AgentAction::Quote(plan) = &action {
                    p.output = plan.output;
                    p.ask_price = plan.ask_price;
                    outcome.accepting.insert(id, plan.accept_contracts);
                    if let Some(amount) = plan.invest {
                        // Never invest more than the producer can pay.
                        let affordable = amount.min(p.common.balance.max(Decimal::ZERO));
                        if affordable > Decimal::ZERO {
                            p.pending_capacity = p
                                .pending_capacity
                                .saturating_add(affordable.saturating_mul(p.invest_yield));
                            outcome.costs.push((id, CashEntryKind::Investment, affordable));
                        }
                    }
                } else {
                    outcome.accepting.insert(id, false);
                }
                if p.output > Decimal::ZERO {
                    // Average unit cost on a linear marginal curve.
                    let avg = p.cost.base.saturating_add(
                        p.cost
                            .slope
                            .saturating_mul(p.output)
                            .saturating_mul(Decimal::new(5, 1)),
                    );
                    let cost = p.output.saturating_mul(avg).round_dp(4);
                    if cost > Decimal::ZERO {
                        outcome.costs.push((id, CashEntryKind::OperatingCost, cost));
                    }
                }
            }
            Agent::Prosumer(p) => {
                p.production =
                    state
                        .generation
                        .production(tick, p.common.id.index, p.source, p.capacity);
                let maintenance = p.capacity.saturating_mul(p.maintenance_rate).round_dp(3);
                if maintenance > Decimal::ZERO {
                    outcome.costs.push((id, CashEntryKind::Maintenance, maintenance));
                }

                let flows = resolve_prosumer_flows(p, &action);
                if let AgentAction::Dispatch(plan) = &action {
                    p.ask_price = plan.ask_price;
                }
                outcome.prosumer_flows.insert(id, flows);
            }
            Agent::Utility(u) => {
                if let AgentAction::Procure(plan) = &action {
                    u.resale_price = plan.resale_price;
                }
            }
            Agent::Regulator(_) => {
                if let AgentAction::AdjustPolicy {
                    carbon_tax_delta,
                    incentive_delta,
                } = &action
                {
                    outcome.proposal = Some(PolicyProposal {
                        carbon_tax_delta: *carbon_tax_delta,
                        incentive_delta: *incentive_delta,
                    });
                }
            }
            Agent::Consumer(_) => {}
        }
    }

    outcome
}

/// Resolve a prosumer's physical flows for the tick.
///
/// `Hold` covers own need from production and storage, banks any surplus,
/// and stays out of the market.
fn resolve_prosumer_flows(
    p: &gridmarket_types::Prosumer,
    action: &AgentAction,
) -> ProsumerFlows {
    let need = p.profile.energy_need;
    let production = p.production;

    if let AgentAction::Dispatch(plan) = action {
        let draw = plan.draw_storage.min(p.storage);
        let available = production.saturating_add(draw);
        let used = need.min(available);
        let deficit = need.saturating_sub(used);
        let surplus = available.saturating_sub(used);
        let free = p
            .storage_capacity
            .saturating_sub(p.storage.saturating_sub(draw));
        let store = plan.store_surplus.min(surplus).min(free);
        let sell = plan.sell_volume.min(surplus.saturating_sub(store));
        ProsumerFlows {
            draw,
            store,
            sell,
            deficit_bid: (deficit > Decimal::ZERO)
                .then_some((deficit, plan.deficit_limit_price)),
        }
    } else {
        let draw = need.saturating_sub(production).max(Decimal::ZERO).min(p.storage);
        let available = production.saturating_add(draw);
        let used = need.min(available);
        let surplus = available.saturating_sub(used);
        let free = p
            .storage_capacity
            .saturating_sub(p.storage.saturating_sub(draw));
        ProsumerFlows {
            draw,
            store: surplus.min(free),
            sell: Decimal::ZERO,
            deficit_bid: None,
        }
    }
}

/// Phase 4a: settle the active contract set.
///
/// Returns `(contract inflow per buyer, delivered volume per seller)`.
fn settle_contracts(
    state: &mut SimulationState,
    tick: u64,
    pending: &mut Vec<PendingTrade>,
    penalties: &mut Vec<(AgentId, Decimal, String)>,
    events: &mut Vec<MarketEvent>,
) -> (BTreeMap<AgentId, Decimal>, BTreeMap<AgentId, Decimal>) {
    let availability: BTreeMap<AgentId, Decimal> = state
        .agents
        .producers()
        .map(|p| (p.common.id, p.output))
        .collect();
    let settlement = state.contracts.settle(tick, &availability);

    let mut inflow: BTreeMap<AgentId, Decimal> = BTreeMap::new();
    let mut delivered: BTreeMap<AgentId, Decimal> = BTreeMap::new();

    for leg in &settlement.legs {
        let renewable = seller_is_renewable(&state.agents, leg.seller);
        pending.push(PendingTrade {
            segment: Segment::Wholesale,
            buyer: leg.buyer,
            seller: leg.seller,
            volume: leg.volume,
            price: leg.unit_price,
            renewable,
            contract: true,
        });
        let b = inflow.entry(leg.buyer).or_insert(Decimal::ZERO);
        *b = b.saturating_add(leg.volume);
        let s = delivered.entry(leg.seller).or_insert(Decimal::ZERO);
        *s = s.saturating_add(leg.volume);
    }

    for shortfall in &settlement.shortfalls {
        let undelivered = shortfall.contracted.saturating_sub(shortfall.delivered);
        let penalty = state
            .shortfall_penalty_rate
            .saturating_mul(undelivered)
            .saturating_mul(shortfall.unit_price)
            .round_dp(2);
        warn!(
            tick,
            contract = %shortfall.contract,
            seller = %shortfall.seller,
            %undelivered,
            %penalty,
            "Contract shortfall penalized"
        );
        events.push(MarketEvent {
            tick,
            kind: MarketEventKind::ContractShortfall {
                contract: shortfall.contract,
                seller: shortfall.seller,
                delivered: shortfall.delivered,
                contracted: shortfall.contracted,
                penalty,
            },
        });
        if penalty > Decimal::ZERO {
            penalties.push((shortfall.seller, penalty, "contract shortfall".to_owned()));
        }
    }

    for id in &settlement.expired {
        events.push(MarketEvent {
            tick,
            kind: MarketEventKind::ContractExpired { contract: *id },
        });
    }

    (inflow, delivered)
}

/// Phase 4b: form new contracts from matched request/acceptance pairs.
fn form_contracts(
    state: &mut SimulationState,
    tick: u64,
    actions: &BTreeMap<AgentId, AgentAction>,
    plans: &PlanOutcome,
    events: &mut Vec<MarketEvent>,
) {
    for (buyer, action) in actions {
        let AgentAction::Procure(plan) = action else {
            continue;
        };
        let Some(request) = &plan.contract_request else {
            continue;
        };

        let reject = |events: &mut Vec<MarketEvent>, reason: &str| {
            debug!(tick, buyer = %buyer, seller = %request.seller, reason, "Contract request expired");
            events.push(MarketEvent {
                tick,
                kind: MarketEventKind::ContractRejected {
                    buyer: *buyer,
                    seller: request.seller,
                    reason: reason.to_owned(),
                },
            });
        };

        if request.volume_per_tick <= Decimal::ZERO {
            reject(events, "non-positive volume");
            continue;
        }
        let Some(Agent::Producer(producer)) = state.agents.get(request.seller) else {
            reject(events, "seller is not a producer");
            continue;
        };
        if !plans.accepting.get(&request.seller).copied().unwrap_or(false) {
            reject(events, "seller declined contracts this tick");
            continue;
        }
        let uncommitted = producer
            .capacity
            .saturating_sub(state.contracts.reserved_sale(request.seller));
        if uncommitted < request.volume_per_tick {
            reject(events, "insufficient uncommitted capacity");
            continue;
        }
        if request.unit_price < producer.cost.unit_cost(producer.output) {
            reject(events, "price below marginal cost");
            continue;
        }

        match state.contracts.open(tick, *buyer, request) {
            Ok(contract) => {
                events.push(MarketEvent {
                    tick,
                    kind: MarketEventKind::ContractFormed {
                        contract: contract.id,
                        buyer: contract.buyer,
                        seller: contract.seller,
                        volume_per_tick: contract.volume_per_tick,
                        unit_price: contract.unit_price,
                        periods: contract.remaining_periods,
                    },
                });
            }
            Err(error) => reject(events, &error.to_string()),
        }
    }
}

/// Phase 5 preparation: build both segments' offer books.
fn build_offers(
    state: &SimulationState,
    tick: u64,
    actions: &BTreeMap<AgentId, AgentAction>,
    plans: &PlanOutcome,
    contract_inflow: &BTreeMap<AgentId, Decimal>,
    contract_delivered: &BTreeMap<AgentId, Decimal>,
) -> OfferBooks {
    let mut books = OfferBooks::default();

    // Consumer bids: volume capped by need and by what the balance can pay.
    for consumer in state.agents.consumers() {
        let id = consumer.common.id;
        let Some(AgentAction::Bid { volume, limit_price }) = actions.get(&id) else {
            continue;
        };
        let volume = affordable_volume(
            (*volume).min(consumer.profile.energy_need),
            *limit_price,
            consumer.common.balance,
        );
        if volume > Decimal::ZERO {
            books.note(tick, id, Side::Buy, Segment::Local, volume, *limit_price);
            books.local_bids.push(Bid {
                buyer: id,
                volume,
                price: *limit_price,
            });
        }
    }

    // Prosumer deficit bids and surplus asks.
    for prosumer in state.agents.prosumers() {
        let id = prosumer.common.id;
        let Some(flows) = plans.prosumer_flows.get(&id) else {
            continue;
        };
        if let Some((deficit, limit_price)) = flows.deficit_bid {
            let volume = affordable_volume(deficit, limit_price, prosumer.common.balance);
            if volume > Decimal::ZERO {
                books.note(tick, id, Side::Buy, Segment::Local, volume, limit_price);
                books.local_bids.push(Bid {
                    buyer: id,
                    volume,
                    price: limit_price,
                });
            }
        }
        if flows.sell > Decimal::ZERO {
            books.note(tick, id, Side::Sell, Segment::Local, flows.sell, prosumer.ask_price);
            books.local_asks.push(Ask {
                seller: id,
                volume: flows.sell,
                price: prosumer.ask_price,
                renewable: prosumer.source.is_renewable(),
            });
            books
                .ask_prices
                .push((id, Segment::Local, prosumer.ask_price));
        }
    }

    // Utility retail asks from post-settlement inventory, and wholesale bids.
    for utility in state.agents.utilities() {
        let id = utility.common.id;
        let inflow = contract_inflow.get(&id).copied().unwrap_or(Decimal::ZERO);
        let sellable = utility
            .inventory
            .saturating_add(inflow)
            .min(utility.storage_capacity);
        if sellable > Decimal::ZERO {
            books.note(tick, id, Side::Sell, Segment::Local, sellable, utility.resale_price);
            books.local_asks.push(Ask {
                seller: id,
                volume: sellable,
                price: utility.resale_price,
                // Retail inventory is blended; the renewable tag follows
                // the utility's procurement constraint.
                renewable: utility.min_renewable_fraction > Decimal::new(5, 1),
            });
            books
                .ask_prices
                .push((id, Segment::Local, utility.resale_price));
        }

        if let Some(AgentAction::Procure(plan)) = actions.get(&id) {
            let free = utility
                .storage_capacity
                .saturating_sub(utility.inventory.saturating_add(inflow))
                .max(Decimal::ZERO);
            let volume = plan.procure_volume.min(free);
            if volume < plan.procure_volume {
                debug!(tick, utility = %id, requested = %plan.procure_volume, %volume, "Procurement capped by storage");
            }
            if volume > Decimal::ZERO {
                books.note(tick, id, Side::Buy, Segment::Wholesale, volume, plan.limit_price);
                books.wholesale_bids.push(WholesaleBid {
                    buyer: id,
                    volume,
                    price: plan.limit_price,
                    min_renewable_fraction: utility.min_renewable_fraction,
                });
            }
        }
    }

    // Producer spot asks: output net of contract deliveries.
    for producer in state.agents.producers() {
        let id = producer.common.id;
        let delivered = contract_delivered.get(&id).copied().unwrap_or(Decimal::ZERO);
        let spot = producer.output.saturating_sub(delivered);
        if spot > Decimal::ZERO {
            books.note(tick, id, Side::Sell, Segment::Wholesale, spot, producer.ask_price);
            books.wholesale_asks.push(Ask {
                seller: id,
                volume: spot,
                price: producer.ask_price,
                renewable: producer.source.is_renewable(),
            });
        }
        // Every published producer quote is subject to the gouging check,
        // spot volume or not.
        books
            .ask_prices
            .push((id, Segment::Wholesale, producer.ask_price));
    }

    books
}

/// Cap a bid volume at what the buyer's balance can pay for.
fn affordable_volume(volume: Decimal, limit_price: Decimal, balance: Decimal) -> Decimal {
    if limit_price <= Decimal::ZERO {
        return volume;
    }
    let ceiling = balance
        .max(Decimal::ZERO)
        .checked_div(limit_price)
        .unwrap_or(Decimal::ZERO);
    volume.min(ceiling).round_dp(6)
}

/// Convert a segment's fills into pending trades at the clearing price.
fn queue_fills(
    pending: &mut Vec<PendingTrade>,
    segment: Segment,
    fills: &[Fill],
    clearing_price: Option<Decimal>,
) {
    let Some(price) = clearing_price else {
        return;
    };
    for fill in fills {
        pending.push(PendingTrade {
            segment,
            buyer: fill.buyer,
            seller: fill.seller,
            volume: fill.volume,
            price,
            renewable: fill.renewable,
            contract: false,
        });
    }
}

fn seller_is_renewable(agents: &AgentTable, seller: AgentId) -> bool {
    match agents.get(seller) {
        Some(Agent::Producer(p)) => p.source.is_renewable(),
        Some(Agent::Prosumer(p)) => p.source.is_renewable(),
        _ => false,
    }
}

/// Phase 6: apply every delta in one pass and append to the ledgers.
fn commit(
    state: &mut SimulationState,
    tick: u64,
    regulator_id: AgentId,
    pending: &[PendingTrade],
    plans: &PlanOutcome,
    penalties: &[(AgentId, Decimal, String)],
) -> Result<(), TickError> {
    let levers = state
        .agents
        .regulator()
        .map(|r| r.levers)
        .ok_or(TickError::MissingRegulator)?;

    // Trades, payments, taxes, and incentives.
    for trade in pending {
        let recorded = state.trades.record(TradeParams {
            tick,
            segment: trade.segment,
            buyer: trade.buyer,
            seller: trade.seller,
            volume: trade.volume,
            price: trade.price,
            renewable: trade.renewable,
        })?;
        let trade_id = recorded.id;

        let amount = trade.volume.saturating_mul(trade.price).round_dp(4);
        if amount > Decimal::ZERO {
            if trade.contract {
                state
                    .cash
                    .record_contract_payment(tick, amount, trade.buyer, trade.seller, trade_id)?;
            } else {
                state
                    .cash
                    .record_spot_payment(tick, amount, trade.buyer, trade.seller, trade_id)?;
            }
            state.agents.add_balance(trade.buyer, -amount);
            state.agents.add_balance(trade.seller, amount);
        }

        let seller_kind = trade.seller.kind;
        // Carbon tax falls on primary generation only; resale is exempt.
        if seller_kind == AgentKind::Producer && !trade.renewable {
            let tax = levers.carbon_tax.saturating_mul(trade.volume).round_dp(4);
            if tax > Decimal::ZERO {
                state
                    .cash
                    .record_carbon_tax(tick, tax, trade.seller, regulator_id, trade_id)?;
                state.agents.add_balance(trade.seller, -tax);
                state.agents.add_balance(regulator_id, tax);
            }
        }
        if matches!(seller_kind, AgentKind::Producer | AgentKind::Prosumer) && trade.renewable {
            let incentive = levers
                .renewable_incentive
                .saturating_mul(trade.volume)
                .round_dp(4);
            if incentive > Decimal::ZERO {
                state
                    .cash
                    .record_incentive(tick, incentive, regulator_id, trade.seller, trade_id)?;
                state.agents.add_balance(regulator_id, -incentive);
                state.agents.add_balance(trade.seller, incentive);
            }
        }
    }

    // Sink-bound costs.
    for (agent, kind, amount) in &plans.costs {
        state.cash.record_cost(tick, *kind, *amount, *agent)?;
        state.agents.add_balance(*agent, -*amount);
    }

    // Contract shortfall penalties.
    for (agent, amount, _reason) in penalties {
        state.cash.record_penalty(tick, *amount, *agent, regulator_id)?;
        state.agents.add_balance(*agent, -*amount);
        state.agents.add_balance(regulator_id, *amount);
    }

    // Inventory and storage.
    apply_inventory(state, tick);
    apply_storage(state, plans);

    Ok(())
}

/// Apply utility inventory deltas: wholesale buys (contract legs and spot
/// alike) minus retail sales, clamped into `0..=capacity`.
fn apply_inventory(state: &mut SimulationState, tick: u64) {
    let ids: Vec<AgentId> = state.agents.utilities().map(|u| u.common.id).collect();
    for id in ids {
        // The trade log already carries both the contract legs and the
        // spot fills, so the total bought volume is the full inflow.
        let bought = state
            .trades
            .for_tick(tick)
            .filter(|t| t.buyer == id && t.segment == Segment::Wholesale)
            .fold(Decimal::ZERO, |acc, t| acc.saturating_add(t.volume));
        let sold = state.trades.sold_volume(tick, id);

        if let Some(Agent::Utility(u)) = state.agents.get_mut(id) {
            let unclamped = u
                .inventory
                .saturating_add(bought)
                .saturating_sub(sold);
            let next = unclamped.clamp(Decimal::ZERO, u.storage_capacity);
            if unclamped > u.storage_capacity {
                warn!(
                    tick,
                    utility = %id,
                    excess = %unclamped.saturating_sub(u.storage_capacity),
                    "Inventory overflow curtailed"
                );
            }
            u.inventory = next;
        }
    }
}

/// Apply prosumer storage flows.
fn apply_storage(state: &mut SimulationState, plans: &PlanOutcome) {
    let ids: Vec<AgentId> = state.agents.prosumers().map(|p| p.common.id).collect();
    for id in ids {
        let Some(flows) = plans.prosumer_flows.get(&id) else {
            continue;
        };
        if let Some(Agent::Prosumer(p)) = state.agents.get_mut(id) {
            p.storage = p
                .storage
                .saturating_sub(flows.draw)
                .saturating_add(flows.store)
                .clamp(Decimal::ZERO, p.storage_capacity);
        }
    }
}

/// Verify both ledgers for the tick.
fn verify_tick(state: &SimulationState, tick: u64) -> Result<(), TickError> {
    if let ConservationResult::Anomaly(anomaly) = state.trades.verify_conservation(tick) {
        return Err(TickError::Conservation { anomaly });
    }
    if let ConservationResult::Anomaly(anomaly) = state.cash.verify_conservation(tick) {
        return Err(TickError::Conservation { anomaly });
    }
    Ok(())
}

/// Phase 8: run the regulatory review and apply its outcome.
fn apply_regulation(
    state: &mut SimulationState,
    tick: u64,
    regulator_id: AgentId,
    tick_metrics: &TickMetrics,
    plans: &PlanOutcome,
    books: &OfferBooks,
) -> Result<Vec<MarketEvent>, TickError> {
    let regulator = state.agents.regulator().ok_or(TickError::MissingRegulator)?;

    let inputs = ReviewInputs {
        tick,
        metrics: tick_metrics,
        previous_penetration: state.last_penetration,
        proposal: plans.proposal,
        asks: &books.ask_prices,
        trailing_local: state.last_local_price,
        trailing_wholesale: state.last_wholesale_price,
    };
    let review = regulator::review(regulator, &inputs);

    for penalty in &review.penalties {
        state
            .cash
            .record_penalty(tick, penalty.amount, penalty.agent, regulator_id)?;
        state.agents.add_balance(penalty.agent, -penalty.amount);
        state.agents.add_balance(regulator_id, penalty.amount);
    }

    if let Some(regulator) = state.agents.regulator_mut() {
        regulator.levers = review.levers;
    }

    Ok(review.events)
}

/// Build the per-agent records for the tick.
fn build_agent_records(
    state: &SimulationState,
    tick: u64,
    snapshot: &MarketSnapshot,
    events: &[MarketEvent],
) -> Vec<AgentRecord> {
    let penalties_imposed = events
        .iter()
        .filter(|e| {
            matches!(
                e.kind,
                MarketEventKind::PenaltyImposed { .. } | MarketEventKind::ContractShortfall { .. }
            )
        })
        .count() as u32;

    state
        .agents
        .iter()
        .map(|agent| {
            let id = agent.id();
            let bought = state.trades.bought_volume(tick, id);
            let sold = state.trades.sold_volume(tick, id);
            let detail = match agent {
                Agent::Consumer(c) => AgentDetail::Consumer {
                    energy_need: c.profile.energy_need,
                    purchased: bought,
                },
                Agent::Prosumer(p) => AgentDetail::Prosumer {
                    production: p.production,
                    storage: p.storage,
                    sold,
                    purchased: bought,
                },
                Agent::Producer(p) => AgentDetail::Producer {
                    output: p.output,
                    ask_price: p.ask_price,
                    sold,
                    capacity: p.capacity,
                },
                Agent::Utility(u) => AgentDetail::Utility {
                    inventory: u.inventory,
                    resale_price: u.resale_price,
                    procured: bought,
                    renewable_procured: state
                        .trades
                        .for_tick(tick)
                        .filter(|t| t.buyer == id && t.renewable)
                        .fold(Decimal::ZERO, |acc, t| acc.saturating_add(t.volume)),
                    distributed: sold,
                },
                Agent::Regulator(_) => AgentDetail::Regulator {
                    carbon_tax: snapshot.levers.carbon_tax,
                    renewable_incentive: snapshot.levers.renewable_incentive,
                    penalties_imposed,
                },
            };
            AgentRecord {
                tick,
                agent: id,
                kind: agent.kind(),
                balance: agent.balance(),
                tick_profit: metrics::agent_profit(&state.cash, tick, id),
                cumulative_profit: metrics::agent_cumulative_profit(&state.cash, tick, id),
                detail,
            }
        })
        .collect()
}

/// Append the tick's observation to every agent's bounded history.
fn push_observations(
    state: &mut SimulationState,
    tick: u64,
    local_price: Option<Decimal>,
    wholesale_price: Option<Decimal>,
) {
    let ids: Vec<AgentId> = state.agents.ids().collect();
    for id in ids {
        let bought = state.trades.bought_volume(tick, id);
        let sold = state.trades.sold_volume(tick, id);
        if let Some(agent) = state.agents.get_mut(id) {
            let balance = agent.balance();
            agent.common_mut().history.push(Observation {
                tick,
                local_price,
                wholesale_price,
                balance,
                traded_volume: bought.saturating_add(sold),
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use gridmarket_types::{ContractRequest, EnergySource, ProducerPlan, UtilityPlan};

    use super::*;
    use crate::config::PopulationConfig;
    use crate::oracle::{HoldOracle, ScriptedOracle};

    fn test_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.run.ticks = 5;
        config.run.seed = 7;
        config.population = PopulationConfig {
            consumers: 2,
            prosumers: 1,
            producers: 2,
            utilities: 1,
        };
        config
    }

    fn fresh_state() -> SimulationState {
        SimulationState::from_config(&test_config()).unwrap()
    }

    fn producer_id(index: u32) -> AgentId {
        AgentId::new(AgentKind::Producer, index)
    }

    fn utility_id(index: u32) -> AgentId {
        AgentId::new(AgentKind::Utility, index)
    }

    fn consumer_id(index: u32) -> AgentId {
        AgentId::new(AgentKind::Consumer, index)
    }

    fn prosumer_id(index: u32) -> AgentId {
        AgentId::new(AgentKind::Prosumer, index)
    }

    fn with_producer(
        state: &mut SimulationState,
        index: u32,
        configure: impl FnOnce(&mut gridmarket_types::Producer),
    ) {
        match state.agents.get_mut(producer_id(index)) {
            Some(Agent::Producer(p)) => configure(p),
            _ => panic!("missing producer {index}"),
        }
    }

    fn with_utility(
        state: &mut SimulationState,
        index: u32,
        configure: impl FnOnce(&mut gridmarket_types::Utility),
    ) {
        match state.agents.get_mut(utility_id(index)) {
            Some(Agent::Utility(u)) => configure(u),
            _ => panic!("missing utility {index}"),
        }
    }

    fn with_prosumer(
        state: &mut SimulationState,
        index: u32,
        configure: impl FnOnce(&mut gridmarket_types::Prosumer),
    ) {
        match state.agents.get_mut(prosumer_id(index)) {
            Some(Agent::Prosumer(p)) => configure(p),
            _ => panic!("missing prosumer {index}"),
        }
    }

    fn quote(output: i64, ask: i64) -> AgentAction {
        AgentAction::Quote(ProducerPlan {
            output: Decimal::new(output, 0),
            ask_price: Decimal::new(ask, 0),
            accept_contracts: false,
            invest: None,
        })
    }

    fn procure(volume: i64, limit: i64, resale: i64) -> AgentAction {
        AgentAction::Procure(UtilityPlan {
            procure_volume: Decimal::new(volume, 0),
            limit_price: Decimal::new(limit, 0),
            resale_price: Decimal::new(resale, 0),
            contract_request: None,
        })
    }

    /// Bare wholesale stage: two producers (100 @ 10, 50 @ 20) facing a
    /// 120-unit utility demand clear 120 units at the marginal price 20.
    #[test]
    fn wholesale_clears_at_marginal_seller_price() {
        let mut state = fresh_state();
        state.contracts = ContractBook::new();
        with_producer(&mut state, 0, |p| {
            p.capacity = Decimal::new(100, 0);
            p.cost = gridmarket_types::MarginalCost {
                base: Decimal::new(10, 0),
                slope: Decimal::ZERO,
            };
            p.output = Decimal::ZERO;
        });
        with_producer(&mut state, 1, |p| {
            p.capacity = Decimal::new(50, 0);
            p.cost = gridmarket_types::MarginalCost {
                base: Decimal::new(20, 0),
                slope: Decimal::ZERO,
            };
            p.output = Decimal::ZERO;
        });
        with_utility(&mut state, 0, |u| {
            u.storage_capacity = Decimal::new(10_000, 0);
            u.inventory = Decimal::ZERO;
            u.min_renewable_fraction = Decimal::ZERO;
        });

        let mut oracle = ScriptedOracle::default();
        oracle.set(producer_id(0), quote(100, 10));
        oracle.set(producer_id(1), quote(50, 20));
        oracle.set(utility_id(0), procure(120, 100, 100));

        let summary = run_tick(&mut state, &mut oracle).unwrap();

        assert_eq!(
            summary.market.wholesale_price,
            Some(Decimal::new(20, 0))
        );
        assert_eq!(
            state.trades.segment_volume(1, Segment::Wholesale),
            Decimal::new(120, 0)
        );
        assert_eq!(
            state.trades.sold_volume(1, producer_id(0)),
            Decimal::new(100, 0)
        );
        assert_eq!(
            state.trades.sold_volume(1, producer_id(1)),
            Decimal::new(20, 0)
        );
    }

    /// A 50% renewable constraint on a 100-unit demand is satisfied before
    /// any conventional volume is allocated.
    #[test]
    fn renewable_constraint_satisfied_before_conventional_fill() {
        let mut state = fresh_state();
        state.contracts = ContractBook::new();
        with_producer(&mut state, 0, |p| {
            p.capacity = Decimal::new(60, 0);
            p.source = EnergySource::Solar;
            p.cost = gridmarket_types::MarginalCost {
                base: Decimal::new(10, 0),
                slope: Decimal::ZERO,
            };
        });
        with_producer(&mut state, 1, |p| {
            p.capacity = Decimal::new(100, 0);
            p.source = EnergySource::Gas;
            p.cost = gridmarket_types::MarginalCost {
                base: Decimal::new(5, 0),
                slope: Decimal::ZERO,
            };
        });
        with_utility(&mut state, 0, |u| {
            u.storage_capacity = Decimal::new(10_000, 0);
            u.inventory = Decimal::ZERO;
            u.min_renewable_fraction = Decimal::new(5, 1);
        });

        let mut oracle = ScriptedOracle::default();
        oracle.set(producer_id(0), quote(60, 30));
        oracle.set(producer_id(1), quote(100, 10));
        oracle.set(utility_id(0), procure(100, 100, 100));

        let _ = run_tick(&mut state, &mut oracle).unwrap();

        let renewable_bought: Decimal = state
            .trades
            .for_tick(1)
            .filter(|t| t.buyer == utility_id(0) && t.renewable)
            .map(|t| t.volume)
            .sum();
        assert!(renewable_bought >= Decimal::new(50, 0));
        assert_eq!(
            state.trades.segment_volume(1, Segment::Wholesale),
            Decimal::new(100, 0)
        );
    }

    /// Identical config, seed, and scripted oracle produce bit-identical
    /// trade histories, cash ledgers, events, and metrics.
    #[test]
    fn replays_are_bit_identical() {
        let script = {
            let mut oracle = ScriptedOracle::default();
            oracle.set(
                consumer_id(0),
                AgentAction::Bid {
                    volume: Decimal::new(60, 0),
                    limit_price: Decimal::new(120, 0),
                },
            );
            oracle.set(
                consumer_id(1),
                AgentAction::Bid {
                    volume: Decimal::new(40, 0),
                    limit_price: Decimal::new(105, 0),
                },
            );
            oracle.set(producer_id(0), quote(300, 25));
            oracle.set(producer_id(1), quote(200, 35));
            oracle.set(utility_id(0), procure(200, 60, 110));
            oracle
        };

        let mut first = fresh_state();
        let mut second = fresh_state();
        let mut oracle_a = script.clone();
        let mut oracle_b = script;

        let mut summaries_a = Vec::new();
        let mut summaries_b = Vec::new();
        for _ in 0..4 {
            summaries_a.push(run_tick(&mut first, &mut oracle_a).unwrap());
            summaries_b.push(run_tick(&mut second, &mut oracle_b).unwrap());
        }

        assert_eq!(first.trades.all(), second.trades.all());
        assert_eq!(first.cash.all(), second.cash.all());
        assert_eq!(first.events, second.events);
        for (a, b) in summaries_a.iter().zip(summaries_b.iter()) {
            assert_eq!(a.market, b.market);
            assert_eq!(a.agents, b.agents);
        }
    }

    /// A contract with one remaining period settles exactly once more and
    /// is absent from the active set the following tick.
    #[test]
    fn final_contract_period_settles_once() {
        let mut state = fresh_state();
        state.contracts = ContractBook::new();
        let request = ContractRequest {
            seller: producer_id(0),
            volume_per_tick: Decimal::new(50, 0),
            unit_price: Decimal::new(10, 0),
            periods: 1,
        };
        let _ = state.contracts.open(0, utility_id(0), &request).unwrap();
        with_producer(&mut state, 0, |p| {
            p.output = Decimal::new(50, 0);
        });
        with_producer(&mut state, 1, |p| {
            p.output = Decimal::ZERO;
        });
        with_utility(&mut state, 0, |u| {
            u.inventory = Decimal::ZERO;
            u.storage_capacity = Decimal::new(1000, 0);
        });

        let mut oracle = HoldOracle::new();
        let summary = run_tick(&mut state, &mut oracle).unwrap();

        let contract_trades: Vec<_> = state
            .trades
            .for_tick(1)
            .filter(|t| t.segment == Segment::Wholesale)
            .collect();
        assert_eq!(contract_trades.len(), 1);
        assert_eq!(contract_trades.first().unwrap().volume, Decimal::new(50, 0));
        assert_eq!(contract_trades.first().unwrap().price, Decimal::new(10, 0));
        assert!(state.contracts.is_empty());
        assert!(summary
            .events
            .iter()
            .any(|e| matches!(e.kind, MarketEventKind::ContractExpired { .. })));

        // The following tick has nothing left to settle.
        let _ = run_tick(&mut state, &mut oracle).unwrap();
        assert_eq!(state.trades.for_tick(2).count(), 0);
    }

    /// Short seller capacity settles partially and fines the seller.
    #[test]
    fn contract_shortfall_is_penalized() {
        let mut state = fresh_state();
        state.contracts = ContractBook::new();
        let request = ContractRequest {
            seller: producer_id(0),
            volume_per_tick: Decimal::new(80, 0),
            unit_price: Decimal::new(10, 0),
            periods: 2,
        };
        let _ = state.contracts.open(0, utility_id(0), &request).unwrap();
        with_producer(&mut state, 0, |p| {
            p.output = Decimal::new(30, 0);
        });
        with_producer(&mut state, 1, |p| {
            p.output = Decimal::ZERO;
        });

        let mut oracle = HoldOracle::new();
        let summary = run_tick(&mut state, &mut oracle).unwrap();

        assert!(summary.events.iter().any(|e| matches!(
            e.kind,
            MarketEventKind::ContractShortfall { .. }
        )));
        // Delivered 30 of 80; penalty = 0.5 * 50 * 10 = 250. The seller
        // also earned 300 for the delivered volume and paid operating
        // costs, so just check the penalty flowed to the regulator.
        let regulator = state.agents.regulator_id().unwrap();
        let penalty_total: Decimal = state
            .cash
            .for_tick(1)
            .filter(|e| {
                matches!(e.kind, CashEntryKind::Penalty)
                    && e.to == gridmarket_ledger::Party::Agent(regulator)
            })
            .map(|e| e.amount)
            .sum();
        assert_eq!(penalty_total, Decimal::new(250, 0));
    }

    /// An oracle failure for one consumer leaves every other agent's
    /// trades untouched and is recorded as a fallback event.
    #[test]
    fn oracle_failure_is_isolated_and_recorded() {
        struct PartiallyFailingOracle {
            script: ScriptedOracle,
            victim: AgentId,
        }
        impl DecisionOracle for PartiallyFailingOracle {
            fn collect_decisions(
                &mut self,
                tick: u64,
                snapshot: &MarketSnapshot,
                agents: &AgentTable,
            ) -> Result<BTreeMap<AgentId, OracleReply>, OracleError> {
                let mut replies = self.script.collect_decisions(tick, snapshot, agents)?;
                replies.insert(
                    self.victim,
                    OracleReply::Failed {
                        reason: "timeout".to_owned(),
                    },
                );
                Ok(replies)
            }
        }

        let bid = AgentAction::Bid {
            volume: Decimal::new(50, 0),
            limit_price: Decimal::new(120, 0),
        };

        // Baseline: both consumers bid.
        let mut baseline = fresh_state();
        let mut script = ScriptedOracle::default();
        script.set(consumer_id(0), bid.clone());
        script.set(consumer_id(1), bid.clone());
        let _ = run_tick(&mut baseline, &mut script.clone()).unwrap();

        // Failing run: consumer 1 times out.
        let mut failing_state = fresh_state();
        let mut failing = PartiallyFailingOracle {
            script,
            victim: consumer_id(1),
        };
        let summary = run_tick(&mut failing_state, &mut failing).unwrap();

        assert!(summary.events.iter().any(|e| matches!(
            &e.kind,
            MarketEventKind::OracleFallback { agent, .. } if *agent == consumer_id(1)
        )));
        // Consumer 0 bought the same volume in both runs.
        assert_eq!(
            baseline.trades.bought_volume(1, consumer_id(0)),
            failing_state.trades.bought_volume(1, consumer_id(0))
        );
        // The victim bought nothing.
        assert_eq!(
            failing_state.trades.bought_volume(1, consumer_id(1)),
            Decimal::ZERO
        );
    }

    /// A negative asking price is committed as zero, not rejected.
    #[test]
    fn negative_sell_price_clamps_to_zero() {
        let mut state = fresh_state();
        state.contracts = ContractBook::new();
        with_prosumer(&mut state, 0, |p| {
            p.profile.energy_need = Decimal::ZERO;
            p.storage = Decimal::new(50, 0);
            p.storage_capacity = Decimal::new(100, 0);
        });
        with_utility(&mut state, 0, |u| {
            // Price the utility out of the local match.
            u.resale_price = Decimal::new(500, 0);
        });

        let mut oracle = ScriptedOracle::default();
        oracle.set(
            prosumer_id(0),
            AgentAction::Dispatch(gridmarket_types::ProsumerPlan {
                draw_storage: Decimal::new(50, 0),
                store_surplus: Decimal::ZERO,
                sell_volume: Decimal::new(20, 0),
                ask_price: Decimal::new(-5, 0),
                deficit_limit_price: Decimal::ZERO,
            }),
        );
        oracle.set(
            consumer_id(0),
            AgentAction::Bid {
                volume: Decimal::new(20, 0),
                limit_price: Decimal::new(10, 0),
            },
        );

        let summary = run_tick(&mut state, &mut oracle).unwrap();

        assert!(summary.events.iter().any(|e| matches!(
            &e.kind,
            MarketEventKind::ValueClamped { agent, .. } if *agent == prosumer_id(0)
        )));
        let local: Vec<_> = state
            .trades
            .for_tick(1)
            .filter(|t| t.segment == Segment::Local)
            .collect();
        assert!(!local.is_empty());
        assert!(local.iter().all(|t| t.price >= Decimal::ZERO));
        assert_eq!(summary.market.local_price, Some(Decimal::ZERO));
    }

    /// Policy levers move by at most the configured step each tick and
    /// never go negative.
    #[test]
    fn policy_levers_are_bounded_per_tick() {
        let config = test_config();
        let max_step = config.policy.max_step;
        let mut state = SimulationState::from_config(&config).unwrap();
        let mut oracle = HoldOracle::new();

        let mut previous = state.agents.regulator().unwrap().levers;
        for _ in 0..6 {
            let _ = run_tick(&mut state, &mut oracle).unwrap();
            let current = state.agents.regulator().unwrap().levers;
            assert!(
                (current.carbon_tax.saturating_sub(previous.carbon_tax)).abs() <= max_step
            );
            assert!(
                (current
                    .renewable_incentive
                    .saturating_sub(previous.renewable_incentive))
                .abs()
                    <= max_step
            );
            assert!(current.carbon_tax >= Decimal::ZERO);
            assert!(current.renewable_incentive >= Decimal::ZERO);
            previous = current;
        }
    }

    /// Metrics stay within their documented ranges across a full run.
    #[test]
    fn metrics_stay_in_unit_ranges() {
        let mut state = fresh_state();
        let mut oracle = HoldOracle::new();
        for _ in 0..5 {
            let summary = run_tick(&mut state, &mut oracle).unwrap();
            let m = summary.market.metrics;
            assert!((0.0..=1.0).contains(&m.renewable_penetration));
            assert!((0.0..=1.0).contains(&m.renewable_stability));
            assert!((0.0..=1.0).contains(&m.wholesale_concentration));
            assert!(m.price_volatility >= 0.0);
        }
    }

    /// A fully contracted producer places no spot ask.
    #[test]
    fn contracted_volume_is_reserved_before_the_spot_market() {
        let mut state = fresh_state();
        state.contracts = ContractBook::new();
        with_producer(&mut state, 0, |p| {
            p.capacity = Decimal::new(100, 0);
            p.output = Decimal::new(100, 0);
        });
        with_producer(&mut state, 1, |p| {
            p.capacity = Decimal::new(200, 0);
            p.output = Decimal::ZERO;
        });
        let request = ContractRequest {
            seller: producer_id(0),
            volume_per_tick: Decimal::new(100, 0),
            unit_price: Decimal::new(15, 0),
            periods: 3,
        };
        let _ = state.contracts.open(0, utility_id(0), &request).unwrap();
        with_utility(&mut state, 0, |u| {
            u.storage_capacity = Decimal::new(10_000, 0);
            u.inventory = Decimal::ZERO;
            u.min_renewable_fraction = Decimal::ZERO;
        });

        // The utility also bids for 500 spot units; producer 0 has no
        // uncontracted output, so only producer 1 could serve it.
        let mut oracle = ScriptedOracle::default();
        oracle.set(producer_id(1), quote(200, 30));
        oracle.set(utility_id(0), procure(500, 100, 100));

        let _ = run_tick(&mut state, &mut oracle).unwrap();

        // Producer 0 sold exactly the contracted volume at the locked
        // price; every unit beyond that came from producer 1.
        assert_eq!(
            state.trades.sold_volume(1, producer_id(0)),
            Decimal::new(100, 0)
        );
        assert!(state
            .trades
            .for_tick(1)
            .filter(|t| t.seller == producer_id(0))
            .all(|t| t.price == Decimal::new(15, 0)));
        assert_eq!(
            state.trades.sold_volume(1, producer_id(1)),
            Decimal::new(200, 0)
        );
    }

    /// Prosumer storage stays within physical bounds across ticks.
    #[test]
    fn storage_stays_within_bounds() {
        let mut state = fresh_state();
        let mut oracle = HoldOracle::new();
        for _ in 0..6 {
            let _ = run_tick(&mut state, &mut oracle).unwrap();
            for prosumer in state.agents.prosumers() {
                assert!(prosumer.storage >= Decimal::ZERO);
                assert!(prosumer.storage <= prosumer.storage_capacity);
            }
            for utility in state.agents.utilities() {
                assert!(utility.inventory >= Decimal::ZERO);
                assert!(utility.inventory <= utility.storage_capacity);
            }
        }
    }

    /// Structural config violations abort before the run starts.
    #[test]
    fn invalid_config_never_starts() {
        let mut config = test_config();
        config.population.utilities = 0;
        assert!(SimulationState::from_config(&config).is_err());
    }
}
