//! Courier Execution Layer
//!
//! Runs order lifecycle operations and ledger mutations against a store.
//!
//! # Architecture
//!
//! ```text
//! Request → Service → lock(entity) → Domain check → Engine plan → Changeset → Store
//!                                                                          ↓
//!                                                                   Notifier (after commit)
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the pricing oracle and the notifier
//! - **OrderService**: Transitions with settlement, assignment, acceptance
//! - **LedgerService**: Accounts, manual entries, reversals, balance checks
//! - **KeyedLocks**: Per-order and per-account serialization
//! - **Stub**: In-process adapters (static pricing, log/recording notifiers)
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_exec::{KeyedLocks, LedgerService, LogNotifier, OrderService, StaticPricing};
//! use courier_store::MemoryStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let locks = Arc::new(KeyedLocks::new());
//! let pricing = Arc::new(StaticPricing::load("pricing.json")?);
//!
//! let ledger = LedgerService::new(store.clone(), locks.clone());
//! let orders = OrderService::new(store, pricing, Arc::new(LogNotifier), locks);
//!
//! let report = orders.update_status(&tracking, OrderStatus::Delivered, Some("office")).await?;
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod ledger;
pub mod locks;
pub mod orders;
pub mod ports;
pub mod stub;

// Re-exports for convenience
pub use error::{BatchItemError, ExecError, ExecResult};
pub use ledger::{
    stage_reversal, stage_settlement, BalanceCheck, LedgerService, NewAccount, PostOutcome,
    PostRequest, Reversal, StagedSettlement,
};
pub use locks::{KeyGuard, KeyedLocks};
pub use orders::{AssignmentConfirmation, OrderChanges, OrderService, TransitionReport};
pub use ports::{Notification, Notifier, PricingOracle};
pub use stub::{LogNotifier, PricingTable, RecordingNotifier, StaticPricing, TraderPrice, ZonePrice};
