//! The metrics collector.
//!
//! Every statistic here is a pure function of the committed trade and cash
//! history: no internal state, no side effects, and recomputing from the
//! same ledgers yields bit-identical results. Derived statistics use `f64`;
//! monetary aggregates stay in [`Decimal`].

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use gridmarket_ledger::{CashEntryKind, CashLedger, Party, TradeLog};
use gridmarket_types::{AgentId, Segment, TickMetrics};

/// Computes per-tick market-health metrics from committed history.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCollector {
    /// Rolling window length in ticks.
    window: usize,
}

impl MetricsCollector {
    /// Create a collector with the given rolling window.
    pub const fn new(window: usize) -> Self {
        Self { window }
    }

    /// Compute the metrics for `tick`.
    ///
    /// `total_supply` and `total_demand` are the tick's offered totals,
    /// taken from the committed market record.
    pub fn compute(
        &self,
        tick: u64,
        trades: &TradeLog,
        total_supply: Decimal,
        total_demand: Decimal,
    ) -> TickMetrics {
        TickMetrics {
            price_volatility: self.price_volatility(tick, trades),
            supply_demand_mismatch: mismatch(total_supply, total_demand),
            renewable_penetration: penetration(trades, tick),
            renewable_stability: self.renewable_stability(tick, trades),
            wholesale_concentration: concentration(trades, tick),
        }
    }

    /// Rolling standard deviation of the clearing price.
    ///
    /// The price series prefers the wholesale clearing price and falls
    /// back to the local one on ticks where wholesale did not trade;
    /// ticks with no trades at all contribute nothing.
    fn price_volatility(&self, tick: u64, trades: &TradeLog) -> f64 {
        let prices: Vec<f64> = self
            .window_ticks(tick)
            .filter_map(|t| {
                clearing_price(trades, t, Segment::Wholesale)
                    .or_else(|| clearing_price(trades, t, Segment::Local))
            })
            .filter_map(|p| p.to_f64())
            .collect();
        std_deviation(&prices)
    }

    /// `1 - cv(penetration)` over the window, clamped to `0..=1`.
    ///
    /// Defined as 0 when mean penetration is 0: an all-fossil market is
    /// not a stable renewable market.
    fn renewable_stability(&self, tick: u64, trades: &TradeLog) -> f64 {
        let series: Vec<f64> = self
            .window_ticks(tick)
            .filter(|t| trades.for_tick(*t).next().is_some())
            .map(|t| penetration(trades, t))
            .collect();
        let mean = mean(&series);
        if mean <= f64::EPSILON {
            return 0.0;
        }
        let cv = std_deviation(&series) / mean;
        (1.0 - cv).clamp(0.0, 1.0)
    }

    /// The ticks covered by the rolling window, ending at `tick`.
    fn window_ticks(&self, tick: u64) -> impl Iterator<Item = u64> {
        let span = self.window as u64;
        let start = tick.saturating_sub(span.saturating_sub(1)).max(1);
        start..=tick
    }
}

// ---------------------------------------------------------------------------
// Per-tick statistics
// ---------------------------------------------------------------------------

/// The uniform clearing price of a segment at a tick, if it traded.
///
/// All trades in a segment-tick settle at the same price, so the first
/// trade's price is the clearing price.
pub fn clearing_price(trades: &TradeLog, tick: u64, segment: Segment) -> Option<Decimal> {
    trades
        .for_tick(tick)
        .find(|t| t.segment == segment)
        .map(|t| t.price)
}

/// Signed supply-demand mismatch; 0 when demand is zero.
fn mismatch(total_supply: Decimal, total_demand: Decimal) -> f64 {
    if total_demand <= Decimal::ZERO {
        return 0.0;
    }
    total_supply
        .saturating_sub(total_demand)
        .checked_div(total_demand)
        .and_then(|d| d.to_f64())
        .unwrap_or(0.0)
}

/// Renewable-tagged traded volume over total traded volume at a tick.
fn penetration(trades: &TradeLog, tick: u64) -> f64 {
    let mut total = Decimal::ZERO;
    let mut renewable = Decimal::ZERO;
    for trade in trades.for_tick(tick) {
        total = total.saturating_add(trade.volume);
        if trade.renewable {
            renewable = renewable.saturating_add(trade.volume);
        }
    }
    if total <= Decimal::ZERO {
        return 0.0;
    }
    renewable
        .checked_div(total)
        .and_then(|d| d.to_f64())
        .unwrap_or(0.0)
        .clamp(0.0, 1.0)
}

/// Herfindahl-Hirschman index of wholesale sellers by traded volume.
fn concentration(trades: &TradeLog, tick: u64) -> f64 {
    let mut by_seller: std::collections::BTreeMap<AgentId, Decimal> =
        std::collections::BTreeMap::new();
    let mut total = Decimal::ZERO;

    for trade in trades.for_tick(tick) {
        if trade.segment != Segment::Wholesale {
            continue;
        }
        let v = by_seller.entry(trade.seller).or_insert(Decimal::ZERO);
        *v = v.saturating_add(trade.volume);
        total = total.saturating_add(trade.volume);
    }

    if total <= Decimal::ZERO {
        return 0.0;
    }

    by_seller
        .values()
        .filter_map(|v| v.checked_div(total).and_then(|share| share.to_f64()))
        .map(|share| share * share)
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Per-agent profit
// ---------------------------------------------------------------------------

/// Profit for one agent at one tick: sales revenue minus purchase cost
/// minus taxes paid plus incentives received.
///
/// Operating costs, maintenance, investments, and penalties move the
/// balance but are not part of trading profit.
pub fn agent_profit(cash: &CashLedger, tick: u64, agent: AgentId) -> Decimal {
    let party = Party::Agent(agent);
    let mut profit = Decimal::ZERO;

    for entry in cash.for_tick(tick) {
        match entry.kind {
            CashEntryKind::SpotPayment | CashEntryKind::ContractPayment => {
                if entry.to == party {
                    profit = profit.saturating_add(entry.amount);
                }
                if entry.from == party {
                    profit = profit.saturating_sub(entry.amount);
                }
            }
            CashEntryKind::CarbonTax => {
                if entry.from == party {
                    profit = profit.saturating_sub(entry.amount);
                }
            }
            CashEntryKind::Incentive => {
                if entry.to == party {
                    profit = profit.saturating_add(entry.amount);
                }
            }
            CashEntryKind::Penalty
            | CashEntryKind::OperatingCost
            | CashEntryKind::Maintenance
            | CashEntryKind::Investment => {}
        }
    }

    profit
}

/// Cumulative profit for one agent through `tick`.
pub fn agent_cumulative_profit(cash: &CashLedger, through_tick: u64, agent: AgentId) -> Decimal {
    let mut total = Decimal::ZERO;
    for tick in 1..=through_tick {
        total = total.saturating_add(agent_profit(cash, tick, agent));
    }
    total
}

// ---------------------------------------------------------------------------
// Small-sample statistics
// ---------------------------------------------------------------------------

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation; 0 for fewer than two samples.
fn std_deviation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gridmarket_ledger::TradeParams;
    use gridmarket_types::{AgentKind, TradeId};

    use super::*;

    fn utility() -> AgentId {
        AgentId::new(AgentKind::Utility, 0)
    }

    fn producer(index: u32) -> AgentId {
        AgentId::new(AgentKind::Producer, index)
    }

    fn wholesale(tick: u64, seller: u32, volume: i64, price: i64, renewable: bool) -> TradeParams {
        TradeParams {
            tick,
            segment: Segment::Wholesale,
            buyer: utility(),
            seller: producer(seller),
            volume: Decimal::new(volume, 0),
            price: Decimal::new(price, 0),
            renewable,
        }
    }

    #[test]
    fn penetration_and_concentration_stay_in_unit_interval() {
        let mut trades = TradeLog::new();
        let _ = trades.record(wholesale(1, 0, 60, 20, true));
        let _ = trades.record(wholesale(1, 1, 40, 20, false));

        let collector = MetricsCollector::new(8);
        let metrics = collector.compute(1, &trades, Decimal::new(100, 0), Decimal::new(100, 0));

        assert!((0.0..=1.0).contains(&metrics.renewable_penetration));
        assert!((0.0..=1.0).contains(&metrics.wholesale_concentration));
        assert!((metrics.renewable_penetration - 0.6).abs() < 1e-9);
        // Shares 0.6 and 0.4: HHI = 0.36 + 0.16 = 0.52.
        assert!((metrics.wholesale_concentration - 0.52).abs() < 1e-9);
    }

    #[test]
    fn empty_tick_yields_zero_metrics() {
        let trades = TradeLog::new();
        let collector = MetricsCollector::new(8);
        let metrics = collector.compute(1, &trades, Decimal::ZERO, Decimal::ZERO);
        assert!((metrics.renewable_penetration).abs() < f64::EPSILON);
        assert!((metrics.wholesale_concentration).abs() < f64::EPSILON);
        assert!((metrics.supply_demand_mismatch).abs() < f64::EPSILON);
        assert!((metrics.renewable_stability).abs() < f64::EPSILON);
    }

    #[test]
    fn mismatch_is_signed() {
        let trades = TradeLog::new();
        let collector = MetricsCollector::new(8);
        let short = collector.compute(1, &trades, Decimal::new(80, 0), Decimal::new(100, 0));
        assert!((short.supply_demand_mismatch + 0.2).abs() < 1e-9);
        let long = collector.compute(1, &trades, Decimal::new(150, 0), Decimal::new(100, 0));
        assert!((long.supply_demand_mismatch - 0.5).abs() < 1e-9);
    }

    #[test]
    fn volatility_reflects_price_swings_within_window() {
        let mut trades = TradeLog::new();
        let _ = trades.record(wholesale(1, 0, 10, 10, false));
        let _ = trades.record(wholesale(2, 0, 10, 30, false));

        let collector = MetricsCollector::new(8);
        let metrics = collector.compute(2, &trades, Decimal::ZERO, Decimal::ONE);
        // Prices 10 and 30: population std dev is 10.
        assert!((metrics.price_volatility - 10.0).abs() < 1e-9);

        // A flat price series has zero volatility.
        let mut flat = TradeLog::new();
        let _ = flat.record(wholesale(1, 0, 10, 20, false));
        let _ = flat.record(wholesale(2, 0, 10, 20, false));
        let flat_metrics = collector.compute(2, &flat, Decimal::ZERO, Decimal::ONE);
        assert!(flat_metrics.price_volatility.abs() < f64::EPSILON);
    }

    #[test]
    fn stability_is_one_for_constant_nonzero_penetration() {
        let mut trades = TradeLog::new();
        for tick in 1..=4 {
            let _ = trades.record(wholesale(tick, 0, 50, 20, true));
            let _ = trades.record(wholesale(tick, 1, 50, 20, false));
        }
        let collector = MetricsCollector::new(8);
        let metrics = collector.compute(4, &trades, Decimal::ZERO, Decimal::ONE);
        assert!((metrics.renewable_stability - 1.0).abs() < 1e-9);
    }

    #[test]
    fn old_prices_fall_out_of_the_window() {
        let mut trades = TradeLog::new();
        let _ = trades.record(wholesale(1, 0, 10, 500, false));
        for tick in 2..=10 {
            let _ = trades.record(wholesale(tick, 0, 10, 20, false));
        }
        // Window of 4 covers ticks 7..=10 only: flat at 20.
        let collector = MetricsCollector::new(4);
        let metrics = collector.compute(10, &trades, Decimal::ZERO, Decimal::ONE);
        assert!(metrics.price_volatility.abs() < f64::EPSILON);
    }

    #[test]
    fn profit_is_revenue_minus_cost_minus_tax_plus_incentive() {
        let mut trades = TradeLog::new();
        let trade = trades.record(wholesale(1, 0, 100, 20, false)).unwrap().id;

        let mut cash = CashLedger::new();
        let regulator = AgentId::new(AgentKind::Regulator, 0);
        let _ = cash
            .record_spot_payment(1, Decimal::new(2000, 0), utility(), producer(0), trade)
            .unwrap();
        let _ = cash
            .record_carbon_tax(1, Decimal::new(1000, 0), producer(0), regulator, trade)
            .unwrap();
        let _ = cash
            .record_cost(1, CashEntryKind::OperatingCost, Decimal::new(500, 0), producer(0))
            .unwrap();

        // Producer: +2000 revenue, -1000 tax; operating cost excluded.
        assert_eq!(
            agent_profit(&cash, 1, producer(0)),
            Decimal::new(1000, 0)
        );
        // Utility: -2000 purchase cost.
        assert_eq!(agent_profit(&cash, 1, utility()), Decimal::new(-2000, 0));
        // Regulator: taxes are transfers, not trading profit.
        assert_eq!(agent_profit(&cash, 1, regulator), Decimal::ZERO);
    }

    #[test]
    fn cumulative_profit_sums_ticks() {
        let mut trades = TradeLog::new();
        let first = trades.record(wholesale(1, 0, 10, 20, false)).unwrap().id;
        let second = trades.record(wholesale(2, 0, 10, 20, false)).unwrap().id;

        let mut cash = CashLedger::new();
        let _ = cash
            .record_spot_payment(1, Decimal::new(200, 0), utility(), producer(0), first)
            .unwrap();
        let _ = cash
            .record_spot_payment(2, Decimal::new(200, 0), utility(), producer(0), second)
            .unwrap();

        assert_eq!(
            agent_cumulative_profit(&cash, 2, producer(0)),
            Decimal::new(400, 0)
        );
    }
}
