//! The market-clearing engine.
//!
//! Two independent segments clear each tick:
//!
//! - The **local** segment (prosumer and utility sellers, consumer buyers)
//!   is a plain uniform-price double auction: [`auction::clear_uniform`].
//! - The **wholesale** segment (producer sellers, utility buyers) uses the
//!   same mechanics constrained by each utility's minimum renewable
//!   purchase fraction: [`wholesale::clear_wholesale`].
//!
//! Both produce a list of fills plus a single clearing price -- the price
//! of the marginal (last accepted) ask -- and guarantee conservation: each
//! fill pairs one buyer and one seller over the same volume, so bought and
//! sold totals agree exactly. Finding no match is a valid outcome (an
//! illiquid tick), not an error.
//!
//! The engine operates on an immutable snapshot of the tick's offers; it
//! never touches agent state. Tie-breaks are deterministic: offers at the
//! same price rank by agent id, which the scheduler derives from the
//! canonical agent ordering.

pub mod auction;
pub mod wholesale;

pub use auction::{clear_uniform, Ask, Bid, ClearingOutcome, Fill};
pub use wholesale::{clear_wholesale, WholesaleBid};
