//! The cash ledger: an append-only, double-entry log of monetary movements.
//!
//! Every payment, tax, incentive, penalty, and cost in a tick produces one
//! entry with a debit party and a credit party. Money moves between agents
//! or leaves the economy through the explicit [`Party::Sink`] (operating
//! costs, maintenance, investment outlays). Nothing is ever minted: taxes
//! and penalties credit the regulator, incentives debit it.
//!
//! Expected flow directions per entry kind:
//!
//! | Kind | From (debit) | To (credit) |
//! |------|-------------|-------------|
//! | `SpotPayment` | Agent (buyer) | Agent (seller) |
//! | `ContractPayment` | Agent (buyer) | Agent (seller) |
//! | `CarbonTax` | Agent (seller) | Agent (regulator) |
//! | `Incentive` | Agent (regulator) | Agent (seller) |
//! | `Penalty` | Agent | Agent (regulator) |
//! | `OperatingCost` | Agent | Sink |
//! | `Maintenance` | Agent | Sink |
//! | `Investment` | Agent | Sink |

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gridmarket_types::{AgentId, TradeId};

use crate::{ConservationResult, LedgerAnomaly, LedgerError};

// ---------------------------------------------------------------------------
// Entry types
// ---------------------------------------------------------------------------

/// A party to a monetary movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Party {
    /// A simulation agent.
    Agent(AgentId),
    /// The explicit cost sink; money sent here leaves the economy.
    Sink,
}

/// The category of a monetary movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashEntryKind {
    /// Payment for a spot trade.
    SpotPayment,
    /// Payment for a contract delivery.
    ContractPayment,
    /// Carbon tax on non-renewable energy sold.
    CarbonTax,
    /// Renewable incentive paid by the regulator.
    Incentive,
    /// Regulatory penalty.
    Penalty,
    /// Production operating cost.
    OperatingCost,
    /// Facility maintenance cost.
    Maintenance,
    /// Capacity investment outlay.
    Investment,
}

impl CashEntryKind {
    /// Whether this kind must terminate at the sink.
    const fn is_sink_flow(self) -> bool {
        matches!(
            self,
            Self::OperatingCost | Self::Maintenance | Self::Investment
        )
    }
}

/// One monetary movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashEntry {
    /// The tick the movement occurred at.
    pub tick: u64,
    /// The movement category.
    pub kind: CashEntryKind,
    /// Amount moved; strictly positive.
    pub amount: Decimal,
    /// The debit party.
    pub from: Party,
    /// The credit party.
    pub to: Party,
    /// Trade this movement settles, if any.
    pub reference: Option<TradeId>,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// The append-only cash ledger.
#[derive(Debug, Default)]
pub struct CashLedger {
    /// All entries, in commit order.
    entries: Vec<CashEntry>,
}

impl CashLedger {
    /// Create a new empty cash ledger.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Number of recorded entries.
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger has no entries.
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate and append an entry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the amount is not positive, a sink-flow
    /// kind does not terminate at the sink, or an agent-to-agent kind
    /// involves the sink.
    pub fn record(&mut self, entry: CashEntry) -> Result<&CashEntry, LedgerError> {
        if entry.amount <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveAmount {
                amount: entry.amount,
            });
        }
        if !matches!(entry.from, Party::Agent(_)) {
            return Err(LedgerError::Internal("debit party must be an agent"));
        }
        let to_is_sink = matches!(entry.to, Party::Sink);
        if entry.kind.is_sink_flow() != to_is_sink {
            return Err(LedgerError::Internal(
                "entry kind does not match its credit party",
            ));
        }
        if entry.from == entry.to {
            return Err(LedgerError::SelfDealing);
        }

        self.entries.push(entry);
        self.entries
            .last()
            .ok_or(LedgerError::Internal("failed to retrieve entry after append"))
    }

    /// Record a spot-trade payment from buyer to seller.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the entry fails validation.
    pub fn record_spot_payment(
        &mut self,
        tick: u64,
        amount: Decimal,
        buyer: AgentId,
        seller: AgentId,
        trade: TradeId,
    ) -> Result<&CashEntry, LedgerError> {
        self.record(CashEntry {
            tick,
            kind: CashEntryKind::SpotPayment,
            amount,
            from: Party::Agent(buyer),
            to: Party::Agent(seller),
            reference: Some(trade),
        })
    }

    /// Record a contract-delivery payment from buyer to seller.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the entry fails validation.
    pub fn record_contract_payment(
        &mut self,
        tick: u64,
        amount: Decimal,
        buyer: AgentId,
        seller: AgentId,
        trade: TradeId,
    ) -> Result<&CashEntry, LedgerError> {
        self.record(CashEntry {
            tick,
            kind: CashEntryKind::ContractPayment,
            amount,
            from: Party::Agent(buyer),
            to: Party::Agent(seller),
            reference: Some(trade),
        })
    }

    /// Record a carbon tax payment from a seller to the regulator.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the entry fails validation.
    pub fn record_carbon_tax(
        &mut self,
        tick: u64,
        amount: Decimal,
        seller: AgentId,
        regulator: AgentId,
        trade: TradeId,
    ) -> Result<&CashEntry, LedgerError> {
        self.record(CashEntry {
            tick,
            kind: CashEntryKind::CarbonTax,
            amount,
            from: Party::Agent(seller),
            to: Party::Agent(regulator),
            reference: Some(trade),
        })
    }

    /// Record a renewable incentive payment from the regulator to a seller.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the entry fails validation.
    pub fn record_incentive(
        &mut self,
        tick: u64,
        amount: Decimal,
        regulator: AgentId,
        seller: AgentId,
        trade: TradeId,
    ) -> Result<&CashEntry, LedgerError> {
        self.record(CashEntry {
            tick,
            kind: CashEntryKind::Incentive,
            amount,
            from: Party::Agent(regulator),
            to: Party::Agent(seller),
            reference: Some(trade),
        })
    }

    /// Record a penalty from an agent to the regulator.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the entry fails validation.
    pub fn record_penalty(
        &mut self,
        tick: u64,
        amount: Decimal,
        agent: AgentId,
        regulator: AgentId,
    ) -> Result<&CashEntry, LedgerError> {
        self.record(CashEntry {
            tick,
            kind: CashEntryKind::Penalty,
            amount,
            from: Party::Agent(agent),
            to: Party::Agent(regulator),
            reference: None,
        })
    }

    /// Record a sink-bound cost (operating, maintenance, or investment).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the entry fails validation.
    pub fn record_cost(
        &mut self,
        tick: u64,
        kind: CashEntryKind,
        amount: Decimal,
        agent: AgentId,
    ) -> Result<&CashEntry, LedgerError> {
        self.record(CashEntry {
            tick,
            kind,
            amount,
            from: Party::Agent(agent),
            to: Party::Sink,
            reference: None,
        })
    }

    /// All entries, in commit order.
    pub fn all(&self) -> &[CashEntry] {
        &self.entries
    }

    /// Entries recorded at the given tick.
    pub fn for_tick(&self, tick: u64) -> impl Iterator<Item = &CashEntry> {
        self.entries.iter().filter(move |e| e.tick == tick)
    }

    /// Net monetary flow for an agent at a tick: credits minus debits.
    pub fn agent_net(&self, tick: u64, agent: AgentId) -> Decimal {
        let party = Party::Agent(agent);
        let mut net = Decimal::ZERO;
        for entry in self.for_tick(tick) {
            if entry.to == party {
                net = net.saturating_add(entry.amount);
            }
            if entry.from == party {
                net = net.saturating_sub(entry.amount);
            }
        }
        net
    }

    /// Verify monetary conservation for a tick.
    ///
    /// Checks that every debit is matched -- total debits equal total
    /// agent-side credits plus sink outflow -- and that flow directions
    /// match the entry-kind table. Violations never occur for entries that
    /// passed [`record`](Self::record); the check is defense-in-depth.
    pub fn verify_conservation(&self, tick: u64) -> ConservationResult {
        let mut debits = Decimal::ZERO;
        let mut agent_credits = Decimal::ZERO;
        let mut sink_outflow = Decimal::ZERO;

        for entry in self.for_tick(tick) {
            debits = debits.saturating_add(entry.amount);
            match entry.to {
                Party::Agent(_) => {
                    agent_credits = agent_credits.saturating_add(entry.amount);
                }
                Party::Sink => {
                    sink_outflow = sink_outflow.saturating_add(entry.amount);
                }
            }
        }

        if debits == agent_credits.saturating_add(sink_outflow) && sink_outflow >= Decimal::ZERO {
            ConservationResult::Balanced
        } else {
            ConservationResult::Anomaly(LedgerAnomaly {
                tick,
                imbalances: std::collections::BTreeMap::new(),
                message: format!(
                    "LEDGER_ANOMALY at tick {tick}: cash debits {debits} != credits {agent_credits} + sink {sink_outflow}",
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

    fn utility() -> AgentId {
        AgentId::new(AgentKind::Utility, 0)
    }

    fn producer() -> AgentId {
        AgentId::new(AgentKind::Producer, 0)
    }

    fn regulator() -> AgentId {
        AgentId::new(AgentKind::Regulator, 0)
    }

    #[test]
    fn new_ledger_is_empty() {
        let ledger = CashLedger::new();
        assert!(ledger.is_empty());
    }

    #[test]
    fn payment_balances() {
        let mut ledger = CashLedger::new();
        let _ = ledger
            .record_spot_payment(1, Decimal::new(2400, 0), utility(), producer(), TradeId::new(0))
            .unwrap();
        assert_eq!(ledger.verify_conservation(1), ConservationResult::Balanced);
    }

    #[test]
    fn zero_amount_rejected() {
        let mut ledger = CashLedger::new();
        let result =
            ledger.record_spot_payment(1, Decimal::ZERO, utility(), producer(), TradeId::new(0));
        assert!(result.is_err());
        assert_eq!(ledger.len(), 0);
    }

    #[test]
    fn sink_flow_must_target_sink() {
        let mut ledger = CashLedger::new();
        let result = ledger.record(CashEntry {
            tick: 1,
            kind: CashEntryKind::OperatingCost,
            amount: Decimal::new(10, 0),
            from: Party::Agent(producer()),
            to: Party::Agent(utility()),
            reference: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn agent_net_tracks_both_directions() {
        let mut ledger = CashLedger::new();
        let _ = ledger
            .record_spot_payment(1, Decimal::new(100, 0), utility(), producer(), TradeId::new(0))
            .unwrap();
        let _ = ledger
            .record_carbon_tax(1, Decimal::new(12, 0), producer(), regulator(), TradeId::new(0))
            .unwrap();
        let _ = ledger
            .record_cost(1, CashEntryKind::OperatingCost, Decimal::new(30, 0), producer())
            .unwrap();

        // Producer: +100 payment, -12 tax, -30 operating.
        assert_eq!(ledger.agent_net(1, producer()), Decimal::new(58, 0));
        // Regulator: +12 tax.
        assert_eq!(ledger.agent_net(1, regulator()), Decimal::new(12, 0));
        // Utility: -100 payment.
        assert_eq!(ledger.agent_net(1, utility()), Decimal::new(-100, 0));

        assert_eq!(ledger.verify_conservation(1), ConservationResult::Balanced);
    }

    #[test]
    fn incentive_debits_regulator() {
        let mut ledger = CashLedger::new();
        let _ = ledger
            .record_incentive(1, Decimal::new(50, 0), regulator(), producer(), TradeId::new(3))
            .unwrap();
        assert_eq!(ledger.agent_net(1, regulator()), Decimal::new(-50, 0));
        assert_eq!(ledger.agent_net(1, producer()), Decimal::new(50, 0));
    }
}
