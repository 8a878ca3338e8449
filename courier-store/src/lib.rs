//! Courier Storage Layer
//!
//! Provides persistence for accounts, orders, ledger entries and audit events.
//!
//! # Architecture
//!
//! - **Repository traits**: Define the read interface (ports)
//! - **Changeset**: The unit of work every mutation commits atomically
//! - **In-memory store**: Fast implementation for testing
//! - **PostgreSQL store**: Production implementation (feature `postgres`)
//!
//! # Usage
//!
//! ```rust
//! use courier_domain::Account;
//! use courier_store::{Changeset, MemoryStore, Store};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!
//!     let trader = Account::trader("Acme", None);
//!     let mut changeset = Changeset::new();
//!     changeset.insert_account(&trader);
//!     store.commit(changeset).await.unwrap();
//!
//!     let stored = store.accounts().find_by_id(trader.id).await.unwrap();
//!     assert!(stored.is_some());
//! }
//! ```

#![warn(clippy::all)]

// Modules
mod changeset;
mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

// Re-exports
pub use changeset::{AccountWrite, BalanceGuard, Changeset, CommitReceipt, OrderWrite};
pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use repository::{
    AccountRepository, EventRepository, LedgerRepository, OrderFilter, OrderRepository, Store,
};
