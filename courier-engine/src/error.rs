//! Engine error types.

use courier_domain::{DomainError, LedgerEntryId, OrderId};
use thiserror::Error;

/// Errors raised while computing settlement decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Domain invariant violated (e.g. amount overflow)
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// An entry handed to the planner belongs to another order
    #[error("Ledger entry {entry_id} does not belong to order {order_id}")]
    ForeignEntry {
        /// Offending entry
        entry_id: LedgerEntryId,
        /// Order being planned
        order_id: OrderId,
    },
}
