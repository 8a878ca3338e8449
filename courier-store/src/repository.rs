//! Repository trait definitions (Ports)
//!
//! These traits define the read side of the storage interface.
//! All writes go through `Store::commit` with a `Changeset`.

use crate::changeset::{Changeset, CommitReceipt};
use crate::error::StoreError;
use async_trait::async_trait;
use courier_domain::{
    Account, AccountId, Event, LedgerEntry, LedgerEntryId, Order, OrderId, OrderStatus, Role,
    TrackingNumber,
};

/// Filter for order listings (reporting/export collaborators)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderFilter {
    /// Only orders of this trader
    pub trader: Option<AccountId>,
    /// Only orders of this driver
    pub driver: Option<AccountId>,
    /// Only orders in this status
    pub status: Option<OrderStatus>,
    /// Include soft-deleted orders
    pub include_deleted: bool,
}

impl OrderFilter {
    /// Check whether an order passes the filter
    pub fn matches(&self, order: &Order) -> bool {
        (self.include_deleted || !order.is_deleted())
            && self.trader.map_or(true, |t| order.trader == Some(t))
            && self.driver.map_or(true, |d| order.driver == Some(d))
            && self.status.map_or(true, |s| order.status == s)
    }
}

/// Repository for Account entities
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Find an account by ID (deleted accounts included)
    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// List live accounts, optionally by role
    async fn list(&self, role: Option<Role>) -> Result<Vec<Account>, StoreError>;
}

/// Repository for Order entities
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Find an order by ID (deleted orders included)
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Find a live order by tracking number
    async fn find_by_tracking(
        &self,
        tracking_number: &TrackingNumber,
    ) -> Result<Option<Order>, StoreError>;

    /// Find live orders carrying a reference code
    async fn find_by_reference(&self, reference_code: &str) -> Result<Vec<Order>, StoreError>;

    /// Check if a tracking number was ever issued (deleted orders included)
    async fn tracking_exists(&self, tracking_number: &TrackingNumber) -> Result<bool, StoreError>;

    /// List orders matching a filter, oldest first
    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError>;
}

/// Repository for LedgerEntry entities (append-only)
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Find an entry by ID
    async fn find_by_id(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError>;

    /// All entries of an account, oldest first
    async fn find_by_account(&self, account_id: AccountId) -> Result<Vec<LedgerEntry>, StoreError>;

    /// All entries linked to an order, oldest first
    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<LedgerEntry>, StoreError>;
}

/// Repository for audit events (append-only, written by commit)
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Load all events for an order (in order)
    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<Event>, StoreError>;

    /// Load events after a given sequence number
    async fn find_after(&self, after_seq: i64) -> Result<Vec<(i64, Event)>, StoreError>;
}

/// Combined store interface
#[async_trait]
pub trait Store: Send + Sync {
    /// Get account repository
    fn accounts(&self) -> &dyn AccountRepository;

    /// Get order repository
    fn orders(&self) -> &dyn OrderRepository;

    /// Get ledger repository
    fn ledger(&self) -> &dyn LedgerRepository;

    /// Get event repository
    fn events(&self) -> &dyn EventRepository;

    /// Apply a changeset atomically.
    ///
    /// Checks, in one critical section / transaction:
    /// - order version expectations (`Conflict`) and tracking number
    ///   uniqueness (`Duplicate`)
    /// - referenced accounts and entries exist (`NotFound`)
    /// - entries to roll back are still active (`Conflict`)
    /// - balance guards against pre-commit balances (`BalanceGuard`)
    ///
    /// then writes orders, accounts, entries, rollback flags, balance
    /// deltas and events. On error nothing is written.
    async fn commit(&self, changeset: Changeset) -> Result<CommitReceipt, StoreError>;
}
