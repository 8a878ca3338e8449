//! In-memory store implementation
//!
//! Used for testing and development without a database.
//! All state lives behind one `RwLock`, so a commit validates and applies
//! its changeset in a single critical section.

use crate::changeset::{Changeset, CommitReceipt};
use crate::error::StoreError;
use crate::repository::{
    AccountRepository, EventRepository, LedgerRepository, OrderFilter, OrderRepository, Store,
};
use async_trait::async_trait;
use courier_domain::{
    Account, AccountId, Event, LedgerEntry, LedgerEntryId, Order, OrderId, Role, TrackingNumber,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory store for testing
pub struct MemoryStore {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    orders: HashMap<OrderId, Order>,
    entries: Vec<LedgerEntry>,
    entry_index: HashMap<LedgerEntryId, usize>,
    events: Vec<StoredEvent>,
    event_seq: i64,
}

/// Event with sequence number
struct StoredEvent {
    seq: i64,
    event: Event,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Database("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Database("memory store lock poisoned".to_string()))
    }

    /// Get the number of accounts
    pub fn account_count(&self) -> usize {
        self.read().map(|s| s.accounts.len()).unwrap_or(0)
    }

    /// Get the number of orders
    pub fn order_count(&self) -> usize {
        self.read().map(|s| s.orders.len()).unwrap_or(0)
    }

    /// Get the number of ledger entries
    pub fn entry_count(&self) -> usize {
        self.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Get the number of events
    pub fn event_count(&self) -> usize {
        self.read().map(|s| s.events.len()).unwrap_or(0)
    }

    /// Clear all data (useful for test setup)
    pub fn clear(&self) {
        if let Ok(mut state) = self.write() {
            *state = State::default();
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Commit
// =============================================================================

impl State {
    fn entry(&self, id: &LedgerEntryId) -> Option<&LedgerEntry> {
        self.entry_index.get(id).map(|&i| &self.entries[i])
    }

    fn validate(&self, changeset: &Changeset) -> Result<(), StoreError> {
        for write in &changeset.orders {
            let order = &write.order;
            match write.expected_version {
                None => {
                    if self.orders.contains_key(&order.id) {
                        return Err(StoreError::duplicate("order", order.id.to_string()));
                    }
                    if self.orders.values().any(|o| o.tracking_number == order.tracking_number) {
                        return Err(StoreError::duplicate(
                            "tracking_number",
                            order.tracking_number.to_string(),
                        ));
                    }
                }
                Some(expected) => {
                    let stored = self
                        .orders
                        .get(&order.id)
                        .ok_or_else(|| StoreError::not_found("order", order.id.to_string()))?;
                    if stored.version != expected {
                        return Err(StoreError::conflict(
                            "order",
                            order.id.to_string(),
                            format!("expected version {}, found {}", expected, stored.version),
                        ));
                    }
                }
            }
        }

        let inserted_accounts: HashSet<AccountId> =
            changeset.accounts.iter().filter(|w| w.insert).map(|w| w.account.id).collect();
        for write in &changeset.accounts {
            let exists = self.accounts.contains_key(&write.account.id);
            if write.insert && exists {
                return Err(StoreError::duplicate("account", write.account.id.to_string()));
            }
            if !write.insert && !exists {
                return Err(StoreError::not_found("account", write.account.id.to_string()));
            }
        }

        let known_account =
            |id: &AccountId| self.accounts.contains_key(id) || inserted_accounts.contains(id);

        for entry in &changeset.entries {
            if self.entry_index.contains_key(&entry.id) {
                return Err(StoreError::duplicate("ledger_entry", entry.id.to_string()));
            }
            if !known_account(&entry.account_id) {
                return Err(StoreError::not_found("account", entry.account_id.to_string()));
            }
        }

        let mut seen = HashSet::new();
        for id in &changeset.rollbacks {
            let entry = self
                .entry(id)
                .ok_or_else(|| StoreError::not_found("ledger_entry", id.to_string()))?;
            if entry.is_rolled_back || !seen.insert(*id) {
                return Err(StoreError::conflict(
                    "ledger_entry",
                    id.to_string(),
                    "entry is already rolled back",
                ));
            }
        }

        for guard in &changeset.guards {
            let balance = match self.accounts.get(&guard.account_id()) {
                Some(account) => account.balance,
                None if inserted_accounts.contains(&guard.account_id()) => Decimal::ZERO,
                None => {
                    return Err(StoreError::not_found("account", guard.account_id().to_string()))
                }
            };
            if !guard.holds(balance) {
                return Err(StoreError::BalanceGuard {
                    guard: *guard,
                    balance,
                });
            }
        }

        Ok(())
    }

    fn apply(&mut self, changeset: Changeset) -> CommitReceipt {
        let deltas = changeset.balance_deltas();
        let mut touched: HashSet<AccountId> = deltas.keys().copied().collect();
        touched.extend(changeset.guards.iter().map(|g| g.account_id()));

        for write in changeset.orders {
            self.orders.insert(write.order.id, write.order);
        }

        for write in changeset.accounts {
            let mut account = write.account;
            if let Some(stored) = self.accounts.get(&account.id) {
                account.balance = stored.balance;
            }
            touched.insert(account.id);
            self.accounts.insert(account.id, account);
        }

        for id in changeset.rollbacks {
            if let Some(&i) = self.entry_index.get(&id) {
                self.entries[i].is_rolled_back = true;
            }
        }

        for entry in changeset.entries {
            self.entry_index.insert(entry.id, self.entries.len());
            self.entries.push(entry);
        }

        for (account_id, delta) in deltas {
            if let Some(account) = self.accounts.get_mut(&account_id) {
                account.balance += delta;
            }
        }

        let mut last_event_seq = None;
        for event in changeset.events {
            self.event_seq += 1;
            self.events.push(StoredEvent {
                seq: self.event_seq,
                event,
            });
            last_event_seq = Some(self.event_seq);
        }

        let balances = touched
            .into_iter()
            .filter_map(|id| self.accounts.get(&id).map(|a| (id, a.balance)))
            .collect();

        CommitReceipt {
            balances,
            last_event_seq,
        }
    }
}

// =============================================================================
// Account Repository Implementation
// =============================================================================

#[async_trait]
impl AccountRepository for MemoryStore {
    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    async fn list(&self, role: Option<Role>) -> Result<Vec<Account>, StoreError> {
        let state = self.read()?;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| !a.is_deleted() && role.map_or(true, |r| a.role() == r))
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }
}

// =============================================================================
// Order Repository Implementation
// =============================================================================

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.read()?.orders.get(&id).cloned())
    }

    async fn find_by_tracking(
        &self,
        tracking_number: &TrackingNumber,
    ) -> Result<Option<Order>, StoreError> {
        let state = self.read()?;
        Ok(state
            .orders
            .values()
            .find(|o| !o.is_deleted() && &o.tracking_number == tracking_number)
            .cloned())
    }

    async fn find_by_reference(&self, reference_code: &str) -> Result<Vec<Order>, StoreError> {
        let state = self.read()?;
        Ok(state
            .orders
            .values()
            .filter(|o| !o.is_deleted() && o.reference_code == reference_code)
            .cloned()
            .collect())
    }

    async fn tracking_exists(&self, tracking_number: &TrackingNumber) -> Result<bool, StoreError> {
        let state = self.read()?;
        Ok(state.orders.values().any(|o| &o.tracking_number == tracking_number))
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let state = self.read()?;
        let mut orders: Vec<Order> =
            state.orders.values().filter(|o| filter.matches(o)).cloned().collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }
}

// =============================================================================
// Ledger Repository Implementation
// =============================================================================

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn find_by_id(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.read()?.entry(&id).cloned())
    }

    async fn find_by_account(&self, account_id: AccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.read()?;
        Ok(state.entries.iter().filter(|e| e.account_id == account_id).cloned().collect())
    }

    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.read()?;
        Ok(state.entries.iter().filter(|e| e.order_id == Some(order_id)).cloned().collect())
    }
}

// =============================================================================
// Event Repository Implementation
// =============================================================================

#[async_trait]
impl EventRepository for MemoryStore {
    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<Event>, StoreError> {
        let state = self.read()?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.event.order_id() == Some(order_id))
            .map(|e| e.event.clone())
            .collect())
    }

    async fn find_after(&self, after_seq: i64) -> Result<Vec<(i64, Event)>, StoreError> {
        let state = self.read()?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.seq > after_seq)
            .map(|e| (e.seq, e.event.clone()))
            .collect())
    }
}

// =============================================================================
// Store Implementation
// =============================================================================

#[async_trait]
impl Store for MemoryStore {
    fn accounts(&self) -> &dyn AccountRepository {
        self
    }

    fn orders(&self) -> &dyn OrderRepository {
        self
    }

    fn ledger(&self) -> &dyn LedgerRepository {
        self
    }

    fn events(&self) -> &dyn EventRepository {
        self
    }

    async fn commit(&self, changeset: Changeset) -> Result<CommitReceipt, StoreError> {
        let mut state = self.write()?;
        state.validate(&changeset)?;
        Ok(state.apply(changeset))
    }
}

// =============================================================================
// Tests
// =============================================================================
