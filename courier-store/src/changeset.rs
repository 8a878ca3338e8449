//! Atomic unit of work
//!
//! Every mutation is collected into a `Changeset` and handed to
//! `Store::commit`, which applies all of it or none of it.
//!
//! Balances are never written directly: the store derives the delta of
//! each account from the ledger entries inserted by the changeset and adds
//! it to the stored balance. Account writes carry profile data only.

use std::collections::BTreeMap;

use courier_domain::{Account, AccountId, Event, LedgerEntry, LedgerEntryId, Order};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order write with its optimistic concurrency expectation
#[derive(Debug, Clone)]
pub struct OrderWrite {
    /// Order as it must be stored
    pub order: Order,
    /// Version the stored row must have; `None` for an insert
    pub expected_version: Option<u64>,
}

/// Account write (profile data only; balance is derived)
#[derive(Debug, Clone)]
pub struct AccountWrite {
    /// Account as it must be stored
    pub account: Account,
    /// New row
    pub insert: bool,
}

/// Precondition on a stored balance, checked against the balance before
/// the changeset's own deltas are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BalanceGuard {
    /// Stored balance must be >= `minimum`
    AtLeast {
        /// Guarded account
        account_id: AccountId,
        /// Lower bound (inclusive)
        minimum: Decimal,
    },
    /// Stored balance must be exactly zero
    Zero {
        /// Guarded account
        account_id: AccountId,
    },
}

impl BalanceGuard {
    /// Guarded account
    pub fn account_id(&self) -> AccountId {
        match self {
            BalanceGuard::AtLeast { account_id, .. } | BalanceGuard::Zero { account_id } => {
                *account_id
            }
        }
    }

    /// Check the guard against a stored balance
    pub fn holds(&self, balance: Decimal) -> bool {
        match self {
            BalanceGuard::AtLeast { minimum, .. } => balance >= *minimum,
            BalanceGuard::Zero { .. } => balance.is_zero(),
        }
    }
}

/// Everything one operation writes
#[derive(Debug, Clone, Default)]
pub struct Changeset {
    /// Order inserts and updates
    pub orders: Vec<OrderWrite>,
    /// Account inserts and updates
    pub accounts: Vec<AccountWrite>,
    /// New ledger entries (settlement, manual and compensating)
    pub entries: Vec<LedgerEntry>,
    /// Existing entries to flag as rolled back
    pub rollbacks: Vec<LedgerEntryId>,
    /// Balance preconditions
    pub guards: Vec<BalanceGuard>,
    /// Audit events
    pub events: Vec<Event>,
}

impl Changeset {
    /// Create an empty changeset
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new order
    pub fn insert_order(&mut self, order: &Order) -> &mut Self {
        self.orders.push(OrderWrite {
            order: order.clone(),
            expected_version: None,
        });
        self
    }

    /// Update an existing order, bumping its version in place
    pub fn update_order(&mut self, order: &mut Order) -> &mut Self {
        let expected = order.version;
        order.version += 1;
        self.orders.push(OrderWrite {
            order: order.clone(),
            expected_version: Some(expected),
        });
        self
    }

    /// Insert a new account
    pub fn insert_account(&mut self, account: &Account) -> &mut Self {
        self.accounts.push(AccountWrite {
            account: account.clone(),
            insert: true,
        });
        self
    }

    /// Update an account's profile data
    pub fn update_account(&mut self, account: &Account) -> &mut Self {
        self.accounts.push(AccountWrite {
            account: account.clone(),
            insert: false,
        });
        self
    }

    /// Append a ledger entry
    pub fn insert_entry(&mut self, entry: LedgerEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    /// Flag an existing entry as rolled back
    pub fn roll_back(&mut self, entry_id: LedgerEntryId) -> &mut Self {
        self.rollbacks.push(entry_id);
        self
    }

    /// Add a balance precondition
    pub fn guard(&mut self, guard: BalanceGuard) -> &mut Self {
        self.guards.push(guard);
        self
    }

    /// Record an audit event
    pub fn emit(&mut self, event: Event) -> &mut Self {
        self.events.push(event);
        self
    }

    /// Nothing to write
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
            && self.accounts.is_empty()
            && self.entries.is_empty()
            && self.rollbacks.is_empty()
    }

    /// Net balance delta per account implied by the inserted entries
    ///
    /// Compensating entries are inserted already rolled back but still
    /// move the balance: that is what cancels the original's effect.
    pub fn balance_deltas(&self) -> BTreeMap<AccountId, Decimal> {
        let mut deltas = BTreeMap::new();
        for entry in &self.entries {
            *deltas.entry(entry.account_id).or_insert(Decimal::ZERO) += entry.balance_delta();
        }
        deltas
    }
}

/// Result of a successful commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReceipt {
    /// Balance of every account touched by the changeset, after commit
    pub balances: BTreeMap<AccountId, Decimal>,
    /// Sequence number of the last event appended, if any
    pub last_event_seq: Option<i64>,
}

impl CommitReceipt {
    /// Post-commit balance of an account touched by the changeset
    pub fn balance(&self, account_id: AccountId) -> Option<Decimal> {
        self.balances.get(&account_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_domain::{Direction, Money, Role};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_balance_deltas_cancel_for_reversal() {
        let account = Uuid::now_v7();
        let entry = LedgerEntry::settlement(
            account,
            Uuid::now_v7(),
            Role::Driver,
            Direction::Deposit,
            Money::new(dec!(15)).unwrap(),
            "fee",
        );
        let compensation = entry.compensation().unwrap();

        let mut changeset = Changeset::new();
        changeset.insert_entry(entry).insert_entry(compensation);
        assert_eq!(changeset.balance_deltas()[&account], Decimal::ZERO);
    }

    #[test]
    fn test_guards() {
        let account_id = Uuid::now_v7();
        let at_least = BalanceGuard::AtLeast {
            account_id,
            minimum: dec!(50),
        };
        assert!(at_least.holds(dec!(50)));
        assert!(!at_least.holds(dec!(49.99)));

        let zero = BalanceGuard::Zero { account_id };
        assert!(zero.holds(dec!(0)));
        assert!(!zero.holds(dec!(-1)));
        assert_eq!(zero.account_id(), account_id);
    }

    #[test]
    fn test_update_order_bumps_version() {
        let mut order = courier_domain::Order::new(
            courier_domain::OrderDraft {
                trader: Uuid::now_v7(),
                customer: Uuid::now_v7(),
                delivery_zone: Uuid::now_v7(),
                payment_method: courier_domain::PaymentMethod::Paid,
                product_cost: Money::ZERO,
                extra_delivery_cost: Money::ZERO,
                reference_code: "R".to_string(),
                driver: None,
                notes: None,
            },
            courier_domain::TrackingNumber::generate(),
            Money::ZERO,
            Money::ZERO,
        );

        let mut changeset = Changeset::new();
        changeset.update_order(&mut order);
        assert_eq!(order.version, 1);
        assert_eq!(changeset.orders[0].expected_version, Some(0));
        assert_eq!(changeset.orders[0].order.version, 1);
    }
}
