//! The trade log: an append-only record of every committed trade.
//!
//! # Design
//!
//! - **Append-only**: trades are never modified or deleted.
//! - **Deterministic ids**: sequence numbers assigned in commit order.
//! - **Conservation**: per tick and segment, bought volume equals sold
//!   volume. Each trade carries one buyer and one seller for the same
//!   volume, so the check passes by construction -- it exists as
//!   defense-in-depth against corruption or future bugs.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use gridmarket_types::{AgentId, Segment, Trade, TradeId};

use crate::{ConservationResult, LedgerAnomaly, LedgerError};

/// Parameters for recording a trade.
#[derive(Debug, Clone)]
pub struct TradeParams {
    /// The tick the trade settles at.
    pub tick: u64,
    /// The segment the trade cleared in.
    pub segment: Segment,
    /// The buying agent.
    pub buyer: AgentId,
    /// The selling agent.
    pub seller: AgentId,
    /// Traded volume; must be strictly positive.
    pub volume: Decimal,
    /// Unit price; must not be negative.
    pub price: Decimal,
    /// Whether the energy is renewable-tagged.
    pub renewable: bool,
}

/// The append-only log of committed trades.
#[derive(Debug, Default)]
pub struct TradeLog {
    /// All trades, in commit order.
    trades: Vec<Trade>,
    /// Next sequence number to assign.
    next_id: u64,
}

impl TradeLog {
    /// Create a new empty trade log.
    pub const fn new() -> Self {
        Self {
            trades: Vec::new(),
            next_id: 0,
        }
    }

    /// Number of recorded trades.
    pub const fn len(&self) -> usize {
        self.trades.len()
    }

    /// Whether the log has no trades.
    pub const fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Validate and append a trade, assigning its sequence id.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the volume is not positive, the price is
    /// negative, or buyer and seller are the same agent.
    pub fn record(&mut self, params: TradeParams) -> Result<&Trade, LedgerError> {
        if params.volume <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveVolume {
                volume: params.volume,
            });
        }
        if params.price < Decimal::ZERO {
            return Err(LedgerError::NegativePrice {
                price: params.price,
            });
        }
        if params.buyer == params.seller {
            return Err(LedgerError::SelfDealing);
        }

        let id = TradeId::new(self.next_id);
        self.next_id = self.next_id.saturating_add(1);

        self.trades.push(Trade {
            id,
            tick: params.tick,
            segment: params.segment,
            buyer: params.buyer,
            seller: params.seller,
            volume: params.volume,
            price: params.price,
            renewable: params.renewable,
        });

        self.trades
            .last()
            .ok_or(LedgerError::Internal("failed to retrieve trade after append"))
    }

    /// All trades, in commit order.
    pub fn all(&self) -> &[Trade] {
        &self.trades
    }

    /// Trades committed at the given tick.
    pub fn for_tick(&self, tick: u64) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(move |t| t.tick == tick)
    }

    /// Total traded volume for a tick and segment.
    pub fn segment_volume(&self, tick: u64, segment: Segment) -> Decimal {
        self.for_tick(tick)
            .filter(|t| t.segment == segment)
            .fold(Decimal::ZERO, |acc, t| acc.saturating_add(t.volume))
    }

    /// Volume an agent bought at the given tick, across segments.
    pub fn bought_volume(&self, tick: u64, agent: AgentId) -> Decimal {
        self.for_tick(tick)
            .filter(|t| t.buyer == agent)
            .fold(Decimal::ZERO, |acc, t| acc.saturating_add(t.volume))
    }

    /// Volume an agent sold at the given tick, across segments.
    pub fn sold_volume(&self, tick: u64, agent: AgentId) -> Decimal {
        self.for_tick(tick)
            .filter(|t| t.seller == agent)
            .fold(Decimal::ZERO, |acc, t| acc.saturating_add(t.volume))
    }

    /// Verify per-segment volume conservation for a tick.
    ///
    /// Tallies the buyer side and the seller side independently (per-agent
    /// accumulators summed per segment) and checks they agree.
    pub fn verify_conservation(&self, tick: u64) -> ConservationResult {
        let mut bought: BTreeMap<Segment, Decimal> = BTreeMap::new();
        let mut sold: BTreeMap<Segment, Decimal> = BTreeMap::new();

        // Independent per-agent tallies; collapsed per segment afterwards.
        let mut buyer_side: BTreeMap<(Segment, AgentId), Decimal> = BTreeMap::new();
        let mut seller_side: BTreeMap<(Segment, AgentId), Decimal> = BTreeMap::new();

        for trade in self.for_tick(tick) {
            let b = buyer_side
                .entry((trade.segment, trade.buyer))
                .or_insert(Decimal::ZERO);
            *b = b.saturating_add(trade.volume);

            let s = seller_side
                .entry((trade.segment, trade.seller))
                .or_insert(Decimal::ZERO);
            *s = s.saturating_add(trade.volume);
        }

        for ((segment, _), volume) in &buyer_side {
            let v = bought.entry(*segment).or_insert(Decimal::ZERO);
            *v = v.saturating_add(*volume);
        }
        for ((segment, _), volume) in &seller_side {
            let v = sold.entry(*segment).or_insert(Decimal::ZERO);
            *v = v.saturating_add(*volume);
        }

        let mut imbalances: BTreeMap<Segment, (Decimal, Decimal)> = BTreeMap::new();
        for segment in [Segment::Local, Segment::Wholesale] {
            let b = bought.get(&segment).copied().unwrap_or(Decimal::ZERO);
            let s = sold.get(&segment).copied().unwrap_or(Decimal::ZERO);
            if b != s {
                imbalances.insert(segment, (b, s));
            }
        }

        if imbalances.is_empty() {
            ConservationResult::Balanced
        } else {
            let count = imbalances.len();
            ConservationResult::Anomaly(LedgerAnomaly {
                tick,
                imbalances,
                message: format!(
                    "LEDGER_ANOMALY at tick {tick}: volume conservation violated for {count} segment(s)",
                ),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gridmarket_types::AgentKind;

    use super::*;

    fn consumer(index: u32) -> AgentId {
        AgentId::new(AgentKind::Consumer, index)
    }

    fn prosumer(index: u32) -> AgentId {
        AgentId::new(AgentKind::Prosumer, index)
    }

    fn trade(tick: u64, volume: i64, price: i64) -> TradeParams {
        TradeParams {
            tick,
            segment: Segment::Local,
            buyer: consumer(0),
            seller: prosumer(0),
            volume: Decimal::new(volume, 0),
            price: Decimal::new(price, 0),
            renewable: true,
        }
    }

    #[test]
    fn new_log_is_empty() {
        let log = TradeLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn record_assigns_sequential_ids() {
        let mut log = TradeLog::new();
        let first = log.record(trade(1, 5, 10)).unwrap().id;
        let second = log.record(trade(1, 3, 10)).unwrap().id;
        assert_eq!(first, TradeId::new(0));
        assert_eq!(second, TradeId::new(1));
    }

    #[test]
    fn zero_volume_rejected() {
        let mut log = TradeLog::new();
        let result = log.record(trade(1, 0, 10));
        assert!(result.is_err());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn negative_price_rejected() {
        let mut log = TradeLog::new();
        let result = log.record(trade(1, 5, -1));
        assert!(result.is_err());
    }

    #[test]
    fn self_dealing_rejected() {
        let mut log = TradeLog::new();
        let mut params = trade(1, 5, 10);
        params.seller = params.buyer;
        assert!(log.record(params).is_err());
    }

    #[test]
    fn segment_volume_sums_per_tick() {
        let mut log = TradeLog::new();
        let _ = log.record(trade(1, 5, 10));
        let _ = log.record(trade(1, 3, 10));
        let _ = log.record(trade(2, 7, 10));
        assert_eq!(log.segment_volume(1, Segment::Local), Decimal::new(8, 0));
        assert_eq!(log.segment_volume(2, Segment::Local), Decimal::new(7, 0));
        assert_eq!(log.segment_volume(1, Segment::Wholesale), Decimal::ZERO);
    }

    #[test]
    fn conservation_holds_for_recorded_trades() {
        let mut log = TradeLog::new();
        let _ = log.record(trade(1, 5, 10));
        let _ = log.record(TradeParams {
            tick: 1,
            segment: Segment::Wholesale,
            buyer: AgentId::new(AgentKind::Utility, 0),
            seller: AgentId::new(AgentKind::Producer, 0),
            volume: Decimal::new(120, 0),
            price: Decimal::new(20, 0),
            renewable: false,
        });
        assert_eq!(log.verify_conservation(1), ConservationResult::Balanced);
    }

    #[test]
    fn per_agent_volumes_track_directions() {
        let mut log = TradeLog::new();
        let _ = log.record(trade(1, 5, 10));
        let _ = log.record(trade(1, 3, 12));
        assert_eq!(log.bought_volume(1, consumer(0)), Decimal::new(8, 0));
        assert_eq!(log.sold_volume(1, prosumer(0)), Decimal::new(8, 0));
        assert_eq!(log.sold_volume(1, consumer(0)), Decimal::ZERO);
    }
}
