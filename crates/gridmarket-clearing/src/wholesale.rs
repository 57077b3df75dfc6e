//! Wholesale clearing with renewable purchase constraints.
//!
//! Utilities carry a minimum renewable-purchase fraction. Clearing runs in
//! two passes:
//!
//! 1. **Renewable pre-allocation** -- each utility's requirement is its
//!    fraction times its bid volume. Renewable asks are walked cheapest
//!    first; each ask's volume is split across the price-feasible utilities
//!    in proportion to their unmet requirements. When renewable supply is
//!    short this yields exactly the proportional rationing required: every
//!    split preserves the ratio of unmet requirements, so final allocations
//!    are proportional to initial requirements. No utility ever receives
//!    more than it requested.
//! 2. **General pass** -- remaining demand is filled from all remaining
//!    asks, cheapest first, regardless of type, with the same double
//!    auction mechanics as the local segment.
//!
//! The clearing price is the price of the highest accepted ask across both
//! passes, and every fill settles at it.

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use gridmarket_types::AgentId;

use crate::auction::{match_books, sort_asks, sort_bids, Ask, Bid, ClearingOutcome, Fill};

/// Decimal places kept when splitting an ask proportionally.
const SPLIT_PRECISION: u32 = 6;

/// A utility's wholesale bid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WholesaleBid {
    /// The buying utility.
    pub buyer: AgentId,
    /// Volume wanted.
    pub volume: Decimal,
    /// Maximum acceptable price per unit.
    pub price: Decimal,
    /// Minimum renewable fraction of the received volume, in `0..=1`.
    pub min_renewable_fraction: Decimal,
}

/// Per-bid allocation state during the renewable pass.
#[derive(Debug)]
struct BidState {
    buyer: AgentId,
    price: Decimal,
    /// Unfilled bid volume.
    remaining: Decimal,
    /// Renewable volume still owed to satisfy the constraint.
    unmet_requirement: Decimal,
}

/// Clear the wholesale segment.
///
/// Returns zero fills and no clearing price when nothing matches.
pub fn clear_wholesale(bids: &[WholesaleBid], asks: &[Ask]) -> ClearingOutcome {
    let mut states: Vec<BidState> = bids
        .iter()
        .filter(|b| b.volume > Decimal::ZERO)
        .map(|b| {
            let fraction = b
                .min_renewable_fraction
                .clamp(Decimal::ZERO, Decimal::ONE);
            BidState {
                buyer: b.buyer,
                price: b.price,
                remaining: b.volume,
                unmet_requirement: fraction.saturating_mul(b.volume),
            }
        })
        .collect();
    // Deterministic split order.
    states.sort_by(|a, b| a.buyer.cmp(&b.buyer));

    let mut renewable: Vec<Ask> = asks
        .iter()
        .filter(|a| a.renewable && a.volume > Decimal::ZERO)
        .cloned()
        .collect();
    let mut conventional: Vec<Ask> = asks
        .iter()
        .filter(|a| !a.renewable && a.volume > Decimal::ZERO)
        .cloned()
        .collect();
    sort_asks(&mut renewable);

    let mut fills = Vec::new();
    let mut marginal: Option<Decimal> = None;

    // --- Pass 1: renewable pre-allocation ---
    for ask in &mut renewable {
        allocate_renewable_ask(ask, &mut states, &mut fills, &mut marginal);
    }

    // --- Pass 2: cheapest-first fill of the remaining demand ---
    let mut remaining_asks: Vec<Ask> = renewable
        .into_iter()
        .chain(conventional.drain(..))
        .filter(|a| a.volume > Decimal::ZERO)
        .collect();
    sort_asks(&mut remaining_asks);

    let mut remaining_bids: Vec<Bid> = states
        .iter()
        .filter(|s| s.remaining > Decimal::ZERO)
        .map(|s| Bid {
            buyer: s.buyer,
            volume: s.remaining,
            price: s.price,
        })
        .collect();
    sort_bids(&mut remaining_bids);

    match_books(remaining_asks, remaining_bids, &mut fills, &mut marginal);

    debug!(
        fills = fills.len(),
        clearing_price = ?marginal,
        "Wholesale segment cleared"
    );

    ClearingOutcome {
        fills,
        clearing_price: marginal,
    }
}

/// Split one renewable ask across the price-feasible bids in proportion to
/// their unmet requirements.
fn allocate_renewable_ask(
    ask: &mut Ask,
    states: &mut [BidState],
    fills: &mut Vec<Fill>,
    marginal: &mut Option<Decimal>,
) {
    let feasible =
        |s: &BidState| s.unmet_requirement > Decimal::ZERO && s.price >= ask.price;

    let total_unmet = states
        .iter()
        .filter(|s| feasible(s))
        .fold(Decimal::ZERO, |acc, s| acc.saturating_add(s.unmet_requirement));
    if total_unmet <= Decimal::ZERO {
        return;
    }

    let grant = ask.volume.min(total_unmet);
    let mut pool = grant;
    let feasible_count = states.iter().filter(|s| feasible(s)).count();
    let mut seen = 0usize;

    for state in states.iter_mut() {
        if !(state.unmet_requirement > Decimal::ZERO && state.price >= ask.price) {
            continue;
        }
        seen = seen.saturating_add(1);

        let share = if grant == total_unmet {
            // Enough supply on this ask: requirements fill outright.
            state.unmet_requirement
        } else if seen == feasible_count {
            // Last feasible bid absorbs the rounding remainder.
            pool.min(state.unmet_requirement)
        } else {
            grant
                .checked_mul(state.unmet_requirement)
                .and_then(|v| v.checked_div(total_unmet))
                .unwrap_or(Decimal::ZERO)
                .round_dp_with_strategy(SPLIT_PRECISION, RoundingStrategy::ToZero)
                .min(state.unmet_requirement)
                .min(pool)
        };

        if share <= Decimal::ZERO {
            continue;
        }

        fills.push(Fill {
            buyer: state.buyer,
            seller: ask.seller,
            volume: share,
            renewable: true,
        });
        if marginal.is_none_or(|m| ask.price > m) {
            *marginal = Some(ask.price);
        }

        state.unmet_requirement = state.unmet_requirement.saturating_sub(share);
        state.remaining = state.remaining.saturating_sub(share);
        pool = pool.saturating_sub(share);
        ask.volume = ask.volume.saturating_sub(share);

        if pool <= Decimal::ZERO {
            break;
        }
    }
}
