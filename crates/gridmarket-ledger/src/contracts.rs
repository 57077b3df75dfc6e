//! The contract book: the active set of multi-period agreements.
//!
//! Contracted volume is settled before the spot market opens each tick:
//! the locked volume is deducted from the seller's available capacity and
//! the buyer's demand, and a delivery leg is emitted at the locked price.
//! Periods decrement after settlement, so a contract with one remaining
//! period still settles that tick and leaves the active set afterwards.
//!
//! Contracts form only from an explicit buyer request matched by the named
//! seller's same-tick acceptance; unmatched requests expire with the tick.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::debug;

use gridmarket_types::{AgentId, Contract, ContractId, ContractRequest};

use crate::LedgerError;

/// One contract delivery produced by settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledLeg {
    /// The contract that settled.
    pub contract: ContractId,
    /// The buying agent.
    pub buyer: AgentId,
    /// The selling agent.
    pub seller: AgentId,
    /// Volume actually delivered; may be below the locked volume.
    pub volume: Decimal,
    /// The locked unit price.
    pub unit_price: Decimal,
    /// Whether the delivery is renewable-tagged (taken from the seller's
    /// source by the caller).
    pub renewable: bool,
}

/// A seller's failure to deliver a contract's full locked volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortfall {
    /// The affected contract.
    pub contract: ContractId,
    /// The defaulting seller.
    pub seller: AgentId,
    /// Volume actually delivered.
    pub delivered: Decimal,
    /// Volume the contract locked.
    pub contracted: Decimal,
    /// The locked unit price, for penalty computation.
    pub unit_price: Decimal,
}

/// The outcome of settling all active contracts for one tick.
#[derive(Debug, Clone, Default)]
pub struct Settlement {
    /// Delivery legs, in contract-id order.
    pub legs: Vec<SettledLeg>,
    /// Shortfalls, in contract-id order.
    pub shortfalls: Vec<Shortfall>,
    /// Contracts that settled their final period and were removed.
    pub expired: Vec<ContractId>,
}

/// The active contract set.
#[derive(Debug, Default)]
pub struct ContractBook {
    /// Active contracts, in formation order.
    active: Vec<Contract>,
    /// Next sequence number to assign.
    next_id: u64,
}

impl ContractBook {
    /// Create a new empty contract book.
    pub const fn new() -> Self {
        Self {
            active: Vec::new(),
            next_id: 0,
        }
    }

    /// Number of active contracts.
    pub const fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether the book has no active contracts.
    pub const fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// The active contracts, in formation order.
    pub fn active(&self) -> &[Contract] {
        &self.active
    }

    /// Total volume per tick the given seller has committed to deliver.
    pub fn reserved_sale(&self, seller: AgentId) -> Decimal {
        self.active
            .iter()
            .filter(|c| c.seller == seller)
            .fold(Decimal::ZERO, |acc, c| acc.saturating_add(c.volume_per_tick))
    }

    /// Total volume per tick the given buyer has committed to receive.
    pub fn reserved_purchase(&self, buyer: AgentId) -> Decimal {
        self.active
            .iter()
            .filter(|c| c.buyer == buyer)
            .fold(Decimal::ZERO, |acc, c| acc.saturating_add(c.volume_per_tick))
    }

    /// Open a new contract from an accepted request.
    ///
    /// The caller is responsible for the acceptance check (the named seller
    /// consented this tick and has uncommitted capacity). The contract is
    /// active from the next tick: settlement always runs before formation
    /// within the tick.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the request's volume is not positive, the
    /// price is negative, the period count is zero, or buyer and seller
    /// are the same agent.
    pub fn open(
        &mut self,
        tick: u64,
        buyer: AgentId,
        request: &ContractRequest,
    ) -> Result<&Contract, LedgerError> {
        if request.volume_per_tick <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveVolume {
                volume: request.volume_per_tick,
            });
        }
        if request.unit_price < Decimal::ZERO {
            return Err(LedgerError::NegativePrice {
                price: request.unit_price,
            });
        }
        if request.periods == 0 {
            return Err(LedgerError::ZeroPeriods);
        }
        if buyer == request.seller {
            return Err(LedgerError::SelfDealing);
        }

        let id = ContractId::new(self.next_id);
        self.next_id = self.next_id.saturating_add(1);

        debug!(
            %buyer,
            seller = %request.seller,
            volume = %request.volume_per_tick,
            price = %request.unit_price,
            periods = request.periods,
            "Contract formed"
        );

        self.active.push(Contract {
            id,
            buyer,
            seller: request.seller,
            unit_price: request.unit_price,
            volume_per_tick: request.volume_per_tick,
            remaining_periods: request.periods,
            origin_tick: tick,
        });

        self.active
            .last()
            .ok_or(LedgerError::Internal("failed to retrieve contract after append"))
    }

    /// Settle every active contract for one tick.
    ///
    /// `seller_available` maps each seller to the volume it can deliver
    /// this tick; deliveries are deducted from it in contract-id order, so
    /// earlier contracts have priority over later ones when a seller is
    /// short. Each contract delivers `min(locked volume, remaining
    /// availability)`; anything less than the locked volume is a
    /// [`Shortfall`]. Periods decrement after settlement and exhausted
    /// contracts are removed.
    pub fn settle(
        &mut self,
        tick: u64,
        seller_available: &BTreeMap<AgentId, Decimal>,
    ) -> Settlement {
        let mut remaining = seller_available.clone();
        let mut outcome = Settlement::default();

        for contract in &mut self.active {
            let available = remaining
                .get(&contract.seller)
                .copied()
                .unwrap_or(Decimal::ZERO);
            let delivered = contract.volume_per_tick.min(available);

            if delivered > Decimal::ZERO {
                if let Some(slot) = remaining.get_mut(&contract.seller) {
                    *slot = slot.saturating_sub(delivered);
                }
                outcome.legs.push(SettledLeg {
                    contract: contract.id,
                    buyer: contract.buyer,
                    seller: contract.seller,
                    volume: delivered,
                    unit_price: contract.unit_price,
                    renewable: false,
                });
            }

            if delivered < contract.volume_per_tick {
                debug!(
                    tick,
                    contract = %contract.id,
                    seller = %contract.seller,
                    %delivered,
                    contracted = %contract.volume_per_tick,
                    "Contract shortfall"
                );
                outcome.shortfalls.push(Shortfall {
                    contract: contract.id,
                    seller: contract.seller,
                    delivered,
                    contracted: contract.volume_per_tick,
                    unit_price: contract.unit_price,
                });
            }

            contract.remaining_periods = contract.remaining_periods.saturating_sub(1);
            if contract.remaining_periods == 0 {
                outcome.expired.push(contract.id);
            }
        }

        self.active.retain(|c| c.remaining_periods > 0);
        outcome
    }
}
