//! Ledger service: postings, reversals, manual entries, account lifecycle.
//!
//! Every write is one `Changeset`. Balances move only through inserted
//! entries; a reversal flags the original, appends a compensating entry in
//! the opposite direction (itself flagged) and so nets the balance back.
//!
//! # Sign convention
//!
//! ```text
//! DEPOSIT  → balance -= amount   (office pays out against the account)
//! WITHDRAW → balance += amount   (office takes from the account)
//! ```

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use courier_domain::{
    Account, AccountId, Direction, DomainError, Event, LedgerEntry, LedgerEntryId, Money, OrderId,
    Role, RoleProfile,
};
use courier_engine::SettlementPlan;
use courier_store::{BalanceGuard, Changeset, OrderFilter, Store};

use crate::error::{ExecError, ExecResult};
use crate::locks::KeyedLocks;

// =============================================================================
// Requests & Outcomes
// =============================================================================

/// A single ledger movement requested by a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostRequest {
    /// Account to move
    pub account_id: AccountId,
    /// Amount
    pub amount: Money,
    /// Direction
    pub direction: Direction,
    /// Order link and the role the account plays on it
    pub order: Option<(OrderId, Role)>,
    /// Free text
    pub notes: String,
}

/// Result of an idempotent post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PostOutcome {
    /// Entry written
    Posted {
        /// New entry
        entry: LedgerEntry,
    },
    /// An active entry already covers the movement; nothing written
    Skipped {
        /// Entry that covers it
        existing: LedgerEntryId,
    },
}

impl PostOutcome {
    /// Check if the post was skipped by the idempotency guard
    pub fn is_skipped(&self) -> bool {
        matches!(self, PostOutcome::Skipped { .. })
    }
}

/// A reversed entry and its compensation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reversal {
    /// Original entry, now flagged rolled back
    pub original: LedgerEntry,
    /// Compensating entry (opposite direction, flagged rolled back)
    pub compensation: LedgerEntry,
}

/// Account registration data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAccount {
    /// Display name
    pub name: String,
    /// Contact phone
    #[serde(default)]
    pub phone: Option<String>,
    /// Role and role-specific data
    pub profile: RoleProfile,
}

/// Outcome of a balance recomputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceCheck {
    /// Account checked
    pub account_id: AccountId,
    /// Cached balance
    pub stored: Decimal,
    /// Sum of active entries
    pub recomputed: Decimal,
    /// Number of active entries summed
    pub active_entries: usize,
}

impl BalanceCheck {
    /// Cached balance matches the ledger
    pub fn is_consistent(&self) -> bool {
        self.stored == self.recomputed
    }
}

/// Ledger writes staged into an order changeset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagedSettlement {
    /// New settlement entries
    pub posted: Vec<LedgerEntry>,
    /// Reversed entries with their compensations
    pub reversed: Vec<Reversal>,
}

// =============================================================================
// Staging helpers (shared with the order service)
// =============================================================================

pub(crate) fn posted_event(entry: &LedgerEntry) -> Event {
    Event::EntryPosted {
        entry_id: entry.id,
        account_id: entry.account_id,
        order_id: entry.order_id,
        role: entry.role,
        direction: entry.direction,
        amount: entry.amount,
        timestamp: entry.created_at,
    }
}

/// Stage the reversal of one active entry.
pub fn stage_reversal(changeset: &mut Changeset, entry: &LedgerEntry) -> ExecResult<Reversal> {
    let compensation = entry.compensation()?;
    let mut original = entry.clone();
    original.is_rolled_back = true;

    changeset.roll_back(entry.id).insert_entry(compensation.clone()).emit(Event::EntryReversed {
        entry_id: entry.id,
        compensation_id: compensation.id,
        account_id: entry.account_id,
        timestamp: compensation.created_at,
    });

    Ok(Reversal {
        original,
        compensation,
    })
}

/// Stage a settlement plan: reversals first, then new postings.
pub fn stage_settlement(
    changeset: &mut Changeset,
    plan: &SettlementPlan,
) -> ExecResult<StagedSettlement> {
    let mut staged = StagedSettlement::default();

    for entry in &plan.reversals {
        staged.reversed.push(stage_reversal(changeset, entry)?);
    }

    for posting in &plan.postings {
        let entry = posting.to_entry();
        changeset.emit(posted_event(&entry)).insert_entry(entry.clone());
        staged.posted.push(entry);
    }

    Ok(staged)
}

// =============================================================================
// Ledger Service
// =============================================================================

/// Ledger operations on accounts and entries.
pub struct LedgerService<S: Store> {
    store: Arc<S>,
    locks: Arc<KeyedLocks>,
}

impl<S: Store> LedgerService<S> {
    /// Create a new ledger service.
    pub fn new(store: Arc<S>, locks: Arc<KeyedLocks>) -> Self {
        Self { store, locks }
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    /// Register a trader or driver account with zero balance.
    pub async fn create_account(&self, request: NewAccount) -> ExecResult<Account> {
        if request.name.trim().is_empty() {
            let message = "account name must not be empty".to_string();
            return Err(DomainError::InvalidValue(message).into());
        }

        let account = Account::new(request.name, request.phone, request.profile);
        let mut changeset = Changeset::new();
        changeset.insert_account(&account);
        self.store.commit(changeset).await.map_err(ExecError::from_commit)?;

        info!(account_id = %account.id, role = %account.role(), "Account created");
        Ok(account)
    }

    /// Look up a live account.
    pub async fn get_account(&self, account_id: AccountId) -> ExecResult<Account> {
        match self.store.accounts().find_by_id(account_id).await? {
            Some(account) if !account.is_deleted() => Ok(account),
            _ => Err(ExecError::not_found("account", account_id)),
        }
    }

    /// List live accounts, optionally by role.
    pub async fn list_accounts(&self, role: Option<Role>) -> ExecResult<Vec<Account>> {
        Ok(self.store.accounts().list(role).await?)
    }

    /// Soft-delete an account whose balance is zero and detach it from
    /// every order that references it.
    ///
    /// # Errors
    /// - `NonZeroBalanceDeletion` while the balance is not zero (checked
    ///   again atomically at commit)
    pub async fn delete_account(&self, account_id: AccountId) -> ExecResult<Account> {
        let _account_guard = self.locks.lock(account_id).await;

        let mut account = self.get_account(account_id).await?;
        if !account.balance.is_zero() {
            return Err(ExecError::NonZeroBalanceDeletion {
                entity_type: "account",
                id: account_id.to_string(),
                reason: format!("balance is {}", account.balance),
            });
        }

        let filter = match account.role() {
            Role::Trader => OrderFilter {
                trader: Some(account_id),
                ..OrderFilter::default()
            },
            Role::Driver => OrderFilter {
                driver: Some(account_id),
                ..OrderFilter::default()
            },
        };
        let order_ids: Vec<OrderId> =
            self.store.orders().list(&filter).await?.into_iter().map(|o| o.id).collect();
        let _order_guards = self.locks.lock_many(order_ids.iter().copied()).await;

        let mut changeset = Changeset::new();
        let mut detached = Vec::new();
        for order_id in &order_ids {
            // Re-read under the lock
            let Some(mut order) = self.store.orders().find_by_id(*order_id).await? else {
                continue;
            };
            if order.detach_account(account_id) {
                changeset.update_order(&mut order);
                detached.push(order.id);
            }
        }

        account.mark_deleted();
        changeset
            .update_account(&account)
            .guard(BalanceGuard::Zero { account_id })
            .emit(Event::AccountDeleted {
                account_id,
                detached_orders: detached.clone(),
                timestamp: Utc::now(),
            });
        self.store.commit(changeset).await.map_err(ExecError::from_commit)?;

        info!(%account_id, detached = detached.len(), "Account deleted");
        Ok(account)
    }

    /// Recompute an account balance from its active entries.
    pub async fn verify_balance(&self, account_id: AccountId) -> ExecResult<BalanceCheck> {
        let account = self
            .store
            .accounts()
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| ExecError::not_found("account", account_id))?;
        let entries = self.store.ledger().find_by_account(account_id).await?;

        let active: Vec<&LedgerEntry> = entries.iter().filter(|e| e.is_active()).collect();
        let recomputed = active.iter().map(|e| e.balance_delta()).sum::<Decimal>();

        let check = BalanceCheck {
            account_id,
            stored: account.balance,
            recomputed,
            active_entries: active.len(),
        };
        if !check.is_consistent() {
            warn!(
                %account_id,
                stored = %check.stored,
                recomputed = %check.recomputed,
                "Account balance drift detected"
            );
        }
        Ok(check)
    }

    // -------------------------------------------------------------------------
    // Entries
    // -------------------------------------------------------------------------

    /// Post one entry unconditionally.
    pub async fn post(&self, request: PostRequest) -> ExecResult<LedgerEntry> {
        let _guard = self.locks.lock(Self::lock_key(&request)).await;
        self.post_locked(request).await
    }

    /// Post one entry unless an active entry with the same
    /// (order, role, direction) already exists.
    ///
    /// Entries without an order link are always posted.
    pub async fn post_if_absent(&self, request: PostRequest) -> ExecResult<PostOutcome> {
        let _guard = self.locks.lock(Self::lock_key(&request)).await;

        if let Some((order_id, role)) = request.order {
            let existing = self.store.ledger().find_by_order(order_id).await?;
            if let Some(entry) =
                existing.iter().find(|e| e.covers(order_id, role, request.direction))
            {
                debug!(
                    %order_id,
                    %role,
                    direction = %request.direction,
                    existing = %entry.id,
                    "Posting already present, skipping"
                );
                return Ok(PostOutcome::Skipped { existing: entry.id });
            }
        }

        let entry = self.post_locked(request).await?;
        Ok(PostOutcome::Posted { entry })
    }

    /// Roll back an active entry with a compensating entry.
    ///
    /// # Errors
    /// - `AlreadyRolledBack` if the entry is not active
    pub async fn reverse(&self, entry_id: LedgerEntryId) -> ExecResult<Reversal> {
        let entry = self.get_entry(entry_id).await?;
        let _guard = self.locks.lock(entry.order_id.unwrap_or(entry.account_id)).await;

        // Re-read under the lock
        let entry = self.get_entry(entry_id).await?;
        let mut changeset = Changeset::new();
        let reversal = stage_reversal(&mut changeset, &entry)?;
        let receipt = self.store.commit(changeset).await.map_err(ExecError::from_commit)?;

        info!(
            %entry_id,
            compensation = %reversal.compensation.id,
            account_id = %entry.account_id,
            balance = ?receipt.balance(entry.account_id),
            "Ledger entry reversed"
        );
        Ok(reversal)
    }

    /// Administrative entry without an order link.
    ///
    /// # Errors
    /// - `InsufficientBalance` if a WITHDRAW exceeds the current balance
    ///   (checked again atomically at commit)
    pub async fn create_manual(
        &self,
        account_id: AccountId,
        amount: Money,
        direction: Direction,
        notes: impl Into<String>,
    ) -> ExecResult<LedgerEntry> {
        let _guard = self.locks.lock(account_id).await;

        let account = self.get_account(account_id).await?;
        if direction == Direction::Withdraw && amount.as_decimal() > account.balance {
            return Err(ExecError::InsufficientBalance {
                account_id,
                balance: account.balance,
                requested: amount.as_decimal(),
            });
        }

        let entry = LedgerEntry::manual(account_id, direction, amount, notes);
        let mut changeset = Changeset::new();
        changeset.insert_entry(entry.clone()).emit(posted_event(&entry));
        if direction == Direction::Withdraw {
            changeset.guard(BalanceGuard::AtLeast {
                account_id,
                minimum: amount.as_decimal(),
            });
        }
        let receipt = self.store.commit(changeset).await.map_err(ExecError::from_commit)?;

        info!(
            entry_id = %entry.id,
            %account_id,
            %direction,
            %amount,
            balance = ?receipt.balance(account_id),
            "Manual ledger entry created"
        );
        Ok(entry)
    }

    /// Look up an entry.
    pub async fn get_entry(&self, entry_id: LedgerEntryId) -> ExecResult<LedgerEntry> {
        self.store
            .ledger()
            .find_by_id(entry_id)
            .await?
            .ok_or_else(|| ExecError::not_found("ledger entry", entry_id))
    }

    /// All entries of an account, oldest first.
    pub async fn entries_for_account(&self, account_id: AccountId) -> ExecResult<Vec<LedgerEntry>> {
        Ok(self.store.ledger().find_by_account(account_id).await?)
    }

    /// All entries of an order, oldest first.
    pub async fn entries_for_order(&self, order_id: OrderId) -> ExecResult<Vec<LedgerEntry>> {
        Ok(self.store.ledger().find_by_order(order_id).await?)
    }

    fn lock_key(request: &PostRequest) -> uuid::Uuid {
        request.order.map(|(order_id, _)| order_id).unwrap_or(request.account_id)
    }

    async fn post_locked(&self, request: PostRequest) -> ExecResult<LedgerEntry> {
        let account = self.get_account(request.account_id).await?;

        let entry = match request.order {
            Some((order_id, role)) => {
                account.ensure_active_role(role)?;
                if self.store.orders().find_by_id(order_id).await?.is_none() {
                    return Err(ExecError::not_found("order", order_id));
                }
                LedgerEntry::settlement(
                    account.id,
                    order_id,
                    role,
                    request.direction,
                    request.amount,
                    request.notes,
                )
            }
            None => {
                LedgerEntry::manual(account.id, request.direction, request.amount, request.notes)
            }
        };

        let mut changeset = Changeset::new();
        changeset.insert_entry(entry.clone()).emit(posted_event(&entry));
        let receipt = self.store.commit(changeset).await.map_err(ExecError::from_commit)?;

        info!(
            entry_id = %entry.id,
            account_id = %entry.account_id,
            direction = %entry.direction,
            amount = %entry.amount,
            balance = ?receipt.balance(entry.account_id),
            "Ledger entry posted"
        );
        Ok(entry)
    }
}
