//! Type-safe identifier wrappers.
//!
//! Every entity in the simulation has a strongly-typed ID to prevent
//! accidental mixing of identifiers at compile time. All IDs are
//! deterministic: agents are identified by `(kind, index)` assigned at
//! population creation, and trades/contracts carry sequence numbers
//! assigned by their owning ledger. Two runs with the same configuration
//! and seed therefore produce byte-identical identifier streams, which is
//! what makes trade histories replayable.

use serde::{Deserialize, Serialize};

use crate::enums::AgentKind;

/// Unique identifier for an agent, stable for the whole run.
///
/// Ordering is derived from `(kind, index)`; iterating agents in `AgentId`
/// order is the canonical stable ordering used for every order-sensitive
/// tie-break in the pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AgentId {
    /// The agent variant this identifier belongs to.
    pub kind: AgentKind,
    /// Zero-based index within the variant's population.
    pub index: u32,
}

impl AgentId {
    /// Create an identifier for the `index`-th agent of `kind`.
    pub const fn new(kind: AgentKind, index: u32) -> Self {
        Self { kind, index }
    }
}

impl core::fmt::Display for AgentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}", self.kind, self.index)
    }
}

/// Generates a newtype wrapper around a `u64` sequence number.
macro_rules! define_seq_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl $name {
            /// Wrap a raw sequence number.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// Return the inner sequence number.
            pub const fn into_inner(self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_seq_id! {
    /// Unique identifier for a committed trade, assigned by the trade log.
    TradeId
}

define_seq_id! {
    /// Unique identifier for a contract, assigned by the contract book.
    ContractId
}
