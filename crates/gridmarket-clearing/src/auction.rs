//! Uniform-price double auction.
//!
//! Asks sort ascending by price, bids descending; volume matches while the
//! lowest remaining ask is at or below the highest remaining bid. The
//! clearing price is the price of the last accepted ask (marginal-seller
//! pricing) and every fill settles at it. Partial fills are allowed;
//! unmatched remainders are discarded by the caller when the tick ends.
//! Offers at the same price rank by agent id.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use tracing::debug;

use gridmarket_types::AgentId;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// A sell offer presented to the clearing engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ask {
    /// The selling agent.
    pub seller: AgentId,
    /// Volume offered.
    pub volume: Decimal,
    /// Asking price per unit.
    pub price: Decimal,
    /// Whether the energy is renewable-tagged.
    pub renewable: bool,
}

/// A buy offer presented to the clearing engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bid {
    /// The buying agent.
    pub buyer: AgentId,
    /// Volume wanted.
    pub volume: Decimal,
    /// Maximum acceptable price per unit.
    pub price: Decimal,
}

/// One matched volume between a buyer and a seller.
///
/// Fills carry no price of their own: every fill in an outcome settles at
/// the outcome's single clearing price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    /// The buying agent.
    pub buyer: AgentId,
    /// The selling agent.
    pub seller: AgentId,
    /// Matched volume; strictly positive.
    pub volume: Decimal,
    /// Renewable tag inherited from the ask.
    pub renewable: bool,
}

/// The result of clearing one segment for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClearingOutcome {
    /// Matched volumes, in match order.
    pub fills: Vec<Fill>,
    /// The uniform clearing price; `None` when nothing matched.
    pub clearing_price: Option<Decimal>,
}

impl ClearingOutcome {
    /// Total matched volume.
    pub fn total_volume(&self) -> Decimal {
        self.fills
            .iter()
            .fold(Decimal::ZERO, |acc, f| acc.saturating_add(f.volume))
    }
}

// ---------------------------------------------------------------------------
// Clearing
// ---------------------------------------------------------------------------

/// Order asks ascending by price, ties by seller id.
pub(crate) fn sort_asks(asks: &mut [Ask]) {
    asks.sort_by(|a, b| a.price.cmp(&b.price).then(a.seller.cmp(&b.seller)));
}

/// Order bids descending by price, ties by buyer id.
pub(crate) fn sort_bids(bids: &mut [Bid]) {
    bids.sort_by(|a, b| b.price.cmp(&a.price).then(a.buyer.cmp(&b.buyer)));
}

/// Drop non-positive volumes; the scheduler clamps negative values before
/// offers reach the engine, so this only filters empty offers.
fn sanitize_asks(asks: &[Ask]) -> Vec<Ask> {
    asks.iter()
        .filter(|a| a.volume > Decimal::ZERO)
        .cloned()
        .collect()
}

fn sanitize_bids(bids: &[Bid]) -> Vec<Bid> {
    bids.iter()
        .filter(|b| b.volume > Decimal::ZERO)
        .cloned()
        .collect()
}

/// Match sorted books until they cross, accumulating fills and tracking the
/// marginal (highest accepted) ask price.
pub(crate) fn match_books(
    asks: Vec<Ask>,
    bids: Vec<Bid>,
    fills: &mut Vec<Fill>,
    marginal: &mut Option<Decimal>,
) {
    let mut asks: VecDeque<Ask> = asks.into();
    let mut bids: VecDeque<Bid> = bids.into();

    while let (Some(ask), Some(bid)) = (asks.front().cloned(), bids.front().cloned()) {
        if ask.price > bid.price {
            break;
        }

        let volume = ask.volume.min(bid.volume);
        fills.push(Fill {
            buyer: bid.buyer,
            seller: ask.seller,
            volume,
            renewable: ask.renewable,
        });
        if marginal.is_none_or(|m| ask.price > m) {
            *marginal = Some(ask.price);
        }

        let ask_left = ask.volume.saturating_sub(volume);
        if ask_left > Decimal::ZERO {
            if let Some(front) = asks.front_mut() {
                front.volume = ask_left;
            }
        } else {
            asks.pop_front();
        }

        let bid_left = bid.volume.saturating_sub(volume);
        if bid_left > Decimal::ZERO {
            if let Some(front) = bids.front_mut() {
                front.volume = bid_left;
            }
        } else {
            bids.pop_front();
        }
    }
}

/// Clear one segment with a plain uniform-price double auction.
///
/// Returns zero fills and no clearing price when the books never cross --
/// an illiquid tick, not an error.
pub fn clear_uniform(bids: &[Bid], asks: &[Ask]) -> ClearingOutcome {
    let mut asks = sanitize_asks(asks);
    let mut bids = sanitize_bids(bids);
    sort_asks(&mut asks);
    sort_bids(&mut bids);

    let mut fills = Vec::new();
    let mut marginal = None;
    match_books(asks, bids, &mut fills, &mut marginal);

    debug!(
        fills = fills.len(),
        clearing_price = ?marginal,
        "Uniform auction cleared"
    );

    ClearingOutcome {
        fills,
        clearing_price: marginal,
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

    fn ask(index: u32, volume: i64, price: i64) -> Ask {
        Ask {
            seller: prosumer(index),
            volume: Decimal::new(volume, 0),
            price: Decimal::new(price, 0),
            renewable: true,
        }
    }

    fn bid(index: u32, volume: i64, price: i64) -> Bid {
        Bid {
            buyer: consumer(index),
            volume: Decimal::new(volume, 0),
            price: Decimal::new(price, 0),
        }
    }

    #[test]
    fn crossing_books_trade_at_marginal_ask_price() {
        let outcome = clear_uniform(
            &[bid(0, 50, 30), bid(1, 50, 25)],
            &[ask(0, 60, 10), ask(1, 60, 20)],
        );
        // 100 demanded above 20, 120 supplied; both asks partially accepted.
        assert_eq!(outcome.clearing_price, Some(Decimal::new(20, 0)));
        assert_eq!(outcome.total_volume(), Decimal::new(100, 0));
    }

    #[test]
    fn no_cross_means_no_trades() {
        let outcome = clear_uniform(&[bid(0, 50, 5)], &[ask(0, 60, 10)]);
        assert!(outcome.fills.is_empty());
        assert_eq!(outcome.clearing_price, None);
    }

    #[test]
    fn empty_books_are_an_illiquid_tick() {
        let outcome = clear_uniform(&[], &[]);
        assert!(outcome.fills.is_empty());
        assert_eq!(outcome.clearing_price, None);
    }

    #[test]
    fn partial_fill_leaves_remainder_unmatched() {
        let outcome = clear_uniform(&[bid(0, 30, 15)], &[ask(0, 100, 10)]);
        assert_eq!(outcome.total_volume(), Decimal::new(30, 0));
        assert_eq!(outcome.clearing_price, Some(Decimal::new(10, 0)));
    }

    #[test]
    fn equal_price_asks_rank_by_agent_id() {
        // Only 10 units demanded; both asks price 10 -- the lower id sells.
        let outcome = clear_uniform(
            &[bid(0, 10, 15)],
            &[ask(1, 50, 10), ask(0, 50, 10)],
        );
        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.fills.first().unwrap().seller, prosumer(0));
    }

    #[test]
    fn equal_price_bids_rank_by_agent_id() {
        let outcome = clear_uniform(
            &[bid(1, 50, 15), bid(0, 50, 15)],
            &[ask(0, 10, 10)],
        );
        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.fills.first().unwrap().buyer, consumer(0));
    }

    #[test]
    fn buyer_volume_equals_seller_volume() {
        let outcome = clear_uniform(
            &[bid(0, 37, 30), bid(1, 13, 28), bid(2, 55, 22)],
            &[ask(0, 40, 12), ask(1, 25, 18), ask(2, 80, 21)],
        );
        let bought: Decimal = outcome
            .fills
            .iter()
            .map(|f| f.volume)
            .fold(Decimal::ZERO, |a, v| a.saturating_add(v));
        assert_eq!(bought, outcome.total_volume());
        assert!(outcome.fills.iter().all(|f| f.volume > Decimal::ZERO));
    }

    #[test]
    fn zero_volume_offers_are_ignored() {
        let outcome = clear_uniform(&[bid(0, 0, 30)], &[ask(0, 50, 10)]);
        assert!(outcome.fills.is_empty());
    }
}
