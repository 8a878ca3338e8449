//! Settlement Rules Engine
//!
//! Pure decision table mapping an order's transition to the ledger
//! postings it requires. No I/O: callers hand in the order and its
//! existing entries, the engine hands back what to write.
//!
//! | → status  | payment method | Trader                   | Driver                       |
//! |-----------|----------------|--------------------------|------------------------------|
//! | CANCELLED | any            | DEPOSIT tmc              | DEPOSIT fee                  |
//! | DELIVERED | PAID           | WITHDRAW tmc             | DEPOSIT fee                  |
//! | DELIVERED | COD            | WITHDRAW tmc, DEPOSIT pc | WITHDRAW (pc + tmc), DEPOSIT fee |
//! | DELIVERED | REMAINING_FEES | none                     | DEPOSIT fee, WITHDRAW tmc    |
//! | POSTPONED | any            | DEPOSIT tmc              | none                         |
//!
//! `tmc` is the order's trader merchant cost, `pc` its product cost and
//! `fee` the driver fee (delivery cost + extra delivery cost).

use std::collections::BTreeMap;

use courier_domain::{
    AccountId, Direction, LedgerEntry, LedgerEntryId, Money, Order, OrderId, OrderStatus,
    PaymentMethod, Role, Transition,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;

// =============================================================================
// Postings
// =============================================================================

/// Idempotency key of a settlement posting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SettlementKey {
    /// Order being settled
    pub order_id: OrderId,
    /// Role of the account on the order
    pub role: Role,
    /// Movement direction
    pub direction: Direction,
}

/// One ledger movement the engine requires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerPosting {
    /// Idempotency key
    pub key: SettlementKey,
    /// Account to move
    pub account_id: AccountId,
    /// Amount (never zero)
    pub amount: Money,
    /// Human-readable reason
    pub notes: String,
}

impl LedgerPosting {
    /// Direction of the movement
    pub fn direction(&self) -> Direction {
        self.key.direction
    }

    /// Signed balance change this posting applies
    pub fn balance_delta(&self) -> Decimal {
        self.key.direction.balance_delta(self.amount)
    }

    /// Materialize as a settlement ledger entry
    pub fn to_entry(&self) -> LedgerEntry {
        LedgerEntry::settlement(
            self.account_id,
            self.key.order_id,
            self.key.role,
            self.key.direction,
            self.amount,
            self.notes.clone(),
        )
    }
}

/// Collects postings for one order, dropping zero amounts and absent roles
struct PostingSet<'a> {
    order: &'a Order,
    target: OrderStatus,
    postings: Vec<LedgerPosting>,
}

impl<'a> PostingSet<'a> {
    fn new(order: &'a Order, target: OrderStatus) -> Self {
        Self {
            order,
            target,
            postings: Vec::new(),
        }
    }

    fn push(&mut self, role: Role, direction: Direction, amount: Money, what: &str) {
        let account = match role {
            Role::Trader => self.order.trader,
            Role::Driver => self.order.driver,
        };
        let Some(account_id) = account else {
            return;
        };
        if amount.is_zero() {
            return;
        }

        self.postings.push(LedgerPosting {
            key: SettlementKey {
                order_id: self.order.id,
                role,
                direction,
            },
            account_id,
            amount,
            notes: format!(
                "{} {} ({}): {}",
                self.order.tracking_number, self.target, self.order.payment_method, what
            ),
        });
    }
}

/// Compute the postings required by an order entering `new`.
///
/// `old` is accepted for symmetry with the transition hook; the table only
/// depends on the target status and the payment method. Postings are only
/// produced for roles present on the order and zero amounts are omitted.
///
/// # Errors
/// Returns `EngineError::Domain` if a composite amount overflows.
pub fn settle(
    order: &Order,
    _old: OrderStatus,
    new: OrderStatus,
) -> Result<Vec<LedgerPosting>, EngineError> {
    let mut set = PostingSet::new(order, new);
    let tmc = order.trader_merchant_cost;

    match new {
        OrderStatus::Cancelled => {
            set.push(Role::Trader, Direction::Deposit, tmc, "trader merchant cost");
            set.push(Role::Driver, Direction::Deposit, order.driver_fee()?, "delivery fee");
        }
        OrderStatus::Delivered => match order.payment_method {
            PaymentMethod::Paid => {
                set.push(Role::Trader, Direction::Withdraw, tmc, "trader merchant cost");
                set.push(Role::Driver, Direction::Deposit, order.driver_fee()?, "delivery fee");
            }
            PaymentMethod::Cod => {
                set.push(Role::Trader, Direction::Withdraw, tmc, "trader merchant cost");
                set.push(Role::Trader, Direction::Deposit, order.product_cost, "product cost");
                set.push(
                    Role::Driver,
                    Direction::Withdraw,
                    order.cod_collection()?,
                    "cash collected",
                );
                set.push(Role::Driver, Direction::Deposit, order.driver_fee()?, "delivery fee");
            }
            PaymentMethod::RemainingFees => {
                set.push(Role::Driver, Direction::Deposit, order.driver_fee()?, "delivery fee");
                set.push(Role::Driver, Direction::Withdraw, tmc, "trader merchant cost");
            }
        },
        OrderStatus::Postponed => {
            set.push(Role::Trader, Direction::Deposit, tmc, "postponement charge");
        }
        OrderStatus::Created | OrderStatus::Assigned | OrderStatus::InProgress => {}
    }

    Ok(set.postings)
}

/// Net balance delta per account for a set of postings
pub fn settlement_effect(postings: &[LedgerPosting]) -> BTreeMap<AccountId, Decimal> {
    let mut effect = BTreeMap::new();
    for posting in postings {
        *effect.entry(posting.account_id).or_insert(Decimal::ZERO) += posting.balance_delta();
    }
    effect
}

// =============================================================================
// Transition planning
// =============================================================================

/// A required posting that is already present in the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedPosting {
    /// Idempotency key of the skipped posting
    pub key: SettlementKey,
    /// Active entry that already covers it
    pub existing: LedgerEntryId,
}

/// Everything the ledger must do for one order transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementPlan {
    /// Transition being settled
    pub transition: Transition,
    /// Active order entries to roll back (reopen only)
    pub reversals: Vec<LedgerEntry>,
    /// New postings to write
    pub postings: Vec<LedgerPosting>,
    /// Postings skipped by the idempotency guard
    pub skipped: Vec<SkippedPosting>,
}

impl SettlementPlan {
    /// Nothing to write
    pub fn is_empty(&self) -> bool {
        self.reversals.is_empty() && self.postings.is_empty()
    }

    /// Net balance delta per account, reversals included
    pub fn balance_effect(&self) -> BTreeMap<AccountId, Decimal> {
        let mut effect = settlement_effect(&self.postings);
        for entry in &self.reversals {
            *effect.entry(entry.account_id).or_insert(Decimal::ZERO) -= entry.balance_delta();
        }
        effect
    }
}

/// Plan the ledger work for `transition` on `order`.
///
/// `existing` must be the order's ledger entries. On a reopen every active
/// entry is scheduled for reversal and the guard then sees an empty
/// ledger. Otherwise each required posting already covered by an active
/// entry with the same key is reported as skipped.
///
/// `order` must already carry the post-transition relations (driver set
/// by an assignment, for instance).
pub fn plan_transition(
    order: &Order,
    transition: Transition,
    existing: &[LedgerEntry],
) -> Result<SettlementPlan, EngineError> {
    if let Some(foreign) = existing.iter().find(|e| e.order_id != Some(order.id)) {
        return Err(EngineError::ForeignEntry {
            entry_id: foreign.id,
            order_id: order.id,
        });
    }

    let reversals: Vec<LedgerEntry> = if transition.reopens() {
        existing.iter().filter(|e| e.is_active()).cloned().collect()
    } else {
        Vec::new()
    };

    let required = settle(order, transition.from, transition.to)?;

    let mut postings = Vec::with_capacity(required.len());
    let mut skipped = Vec::new();
    for posting in required {
        let key = posting.key;
        let covered = existing.iter().find(|e| {
            !reversals.iter().any(|r| r.id == e.id)
                && e.covers(key.order_id, key.role, key.direction)
        });

        match covered {
            Some(entry) => {
                debug!(
                    order_id = %key.order_id,
                    role = %key.role,
                    direction = %key.direction,
                    existing = %entry.id,
                    "Settlement posting already present, skipping"
                );
                skipped.push(SkippedPosting {
                    key,
                    existing: entry.id,
                });
            }
            None => postings.push(posting),
        }
    }

    Ok(SettlementPlan {
        transition,
        reversals,
        postings,
        skipped,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use courier_domain::{OrderDraft, TrackingNumber};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn money(value: Decimal) -> Money {
        Money::new(value).unwrap()
    }

    /// product 100, delivery 10, extra 5, tmc 15
    fn order(method: PaymentMethod) -> Order {
        let draft = OrderDraft {
            trader: Uuid::now_v7(),
            customer: Uuid::now_v7(),
            delivery_zone: Uuid::now_v7(),
            payment_method: method,
            product_cost: money(dec!(100)),
            extra_delivery_cost: money(dec!(5)),
            reference_code: "REF".to_string(),
            driver: Some(Uuid::now_v7()),
            notes: None,
        };
        Order::new(draft, TrackingNumber::generate(), money(dec!(10)), money(dec!(15)))
    }

    fn transition(from: OrderStatus, to: OrderStatus) -> Transition {
        Transition::validate(from, to).unwrap()
    }

    /// Entries as if `settle(order, from, to)` had been committed
    fn entries(order: &Order, from: OrderStatus, to: OrderStatus) -> Vec<LedgerEntry> {
        settle(order, from, to).unwrap().iter().map(LedgerPosting::to_entry).collect()
    }

    fn shape(postings: &[LedgerPosting]) -> Vec<(Role, Direction, Decimal)> {
        postings.iter().map(|p| (p.key.role, p.key.direction, p.amount.as_decimal())).collect()
    }

    #[test]
    fn test_delivered_cod_postings() {
        let order = order(PaymentMethod::Cod);
        let postings = settle(&order, OrderStatus::InProgress, OrderStatus::Delivered).unwrap();

        assert_eq!(
            shape(&postings),
            vec![
                (Role::Trader, Direction::Withdraw, dec!(15)),
                (Role::Trader, Direction::Deposit, dec!(100)),
                (Role::Driver, Direction::Withdraw, dec!(115)),
                (Role::Driver, Direction::Deposit, dec!(15)),
            ]
        );

        let effect = settlement_effect(&postings);
        assert_eq!(effect[&order.trader.unwrap()], dec!(-85));
        assert_eq!(effect[&order.driver.unwrap()], dec!(100));
    }

    #[test]
    fn test_delivered_paid_postings() {
        let order = order(PaymentMethod::Paid);
        let postings = settle(&order, OrderStatus::Assigned, OrderStatus::Delivered).unwrap();
        assert_eq!(
            shape(&postings),
            vec![
                (Role::Trader, Direction::Withdraw, dec!(15)),
                (Role::Driver, Direction::Deposit, dec!(15)),
            ]
        );
    }

    #[test]
    fn test_delivered_remaining_fees_postings() {
        let order = order(PaymentMethod::RemainingFees);
        let postings = settle(&order, OrderStatus::Assigned, OrderStatus::Delivered).unwrap();
        assert_eq!(
            shape(&postings),
            vec![
                (Role::Driver, Direction::Deposit, dec!(15)),
                (Role::Driver, Direction::Withdraw, dec!(15)),
            ]
        );
        assert!(postings.iter().all(|p| p.key.role == Role::Driver));
    }

    #[test]
    fn test_cancelled_postings_any_method() {
        for method in [PaymentMethod::Paid, PaymentMethod::Cod, PaymentMethod::RemainingFees] {
            let order = order(method);
            let postings = settle(&order, OrderStatus::Assigned, OrderStatus::Cancelled).unwrap();
            assert_eq!(
                shape(&postings),
                vec![
                    (Role::Trader, Direction::Deposit, dec!(15)),
                    (Role::Driver, Direction::Deposit, dec!(15)),
                ]
            );
        }
    }

    #[test]
    fn test_postponed_charges_trader_only() {
        let order = order(PaymentMethod::Cod);
        let postings = settle(&order, OrderStatus::Assigned, OrderStatus::Postponed).unwrap();
        assert_eq!(shape(&postings), vec![(Role::Trader, Direction::Deposit, dec!(15))]);
    }

    #[test]
    fn test_active_states_post_nothing() {
        let order = order(PaymentMethod::Cod);
        for status in [OrderStatus::Created, OrderStatus::Assigned, OrderStatus::InProgress] {
            assert!(settle(&order, OrderStatus::Created, status).unwrap().is_empty());
        }
    }

    #[test]
    fn test_absent_roles_and_zero_amounts_are_omitted() {
        let mut order = order(PaymentMethod::Paid);
        order.driver = None;
        order.trader_merchant_cost = Money::ZERO;

        let postings = settle(&order, OrderStatus::Created, OrderStatus::Cancelled).unwrap();
        assert!(postings.is_empty());
    }

    #[test]
    fn test_cancelled_only_trader_when_no_driver() {
        let mut order = order(PaymentMethod::Paid);
        order.driver = None;
        order.trader_merchant_cost = money(dec!(20));

        let postings = settle(&order, OrderStatus::Created, OrderStatus::Cancelled).unwrap();
        assert_eq!(shape(&postings), vec![(Role::Trader, Direction::Deposit, dec!(20))]);
        assert_eq!(settlement_effect(&postings)[&order.trader.unwrap()], dec!(-20));
    }

    #[test]
    fn test_plan_skips_existing_postings() {
        let order = order(PaymentMethod::Cod);
        let transition = transition(OrderStatus::Delivered, OrderStatus::Delivered);
        let first = settle(&order, OrderStatus::InProgress, OrderStatus::Delivered).unwrap();
        let existing: Vec<LedgerEntry> = first.iter().map(LedgerPosting::to_entry).collect();

        let plan = plan_transition(&order, transition, &existing).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.skipped.len(), 4);
    }

    #[test]
    fn test_plan_ignores_rolled_back_entries() {
        let order = order(PaymentMethod::Paid);
        let transition = transition(OrderStatus::InProgress, OrderStatus::Delivered);
        let mut existing = entries(&order, transition.from, transition.to);
        for entry in &mut existing {
            entry.is_rolled_back = true;
        }

        let plan = plan_transition(&order, transition, &existing).unwrap();
        assert_eq!(plan.postings.len(), 2);
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_plan_reopen_reverses_active_entries() {
        let order = order(PaymentMethod::Cod);
        let delivered = entries(&order, OrderStatus::InProgress, OrderStatus::Delivered);

        let reopen = transition(OrderStatus::Delivered, OrderStatus::InProgress);
        let plan = plan_transition(&order, reopen, &delivered).unwrap();

        assert_eq!(plan.reversals.len(), 4);
        assert!(plan.postings.is_empty());
        assert_eq!(plan.balance_effect()[&order.trader.unwrap()], dec!(85));
        assert_eq!(plan.balance_effect()[&order.driver.unwrap()], dec!(-100));
    }

    #[test]
    fn test_plan_postponed_to_cancelled_keeps_trader_charge() {
        let order = order(PaymentMethod::Paid);
        let postponed = entries(&order, OrderStatus::Assigned, OrderStatus::Postponed);

        let transition = transition(OrderStatus::Postponed, OrderStatus::Cancelled);
        let plan = plan_transition(&order, transition, &postponed).unwrap();

        assert!(plan.reversals.is_empty());
        assert_eq!(shape(&plan.postings), vec![(Role::Driver, Direction::Deposit, dec!(15))]);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].key.role, Role::Trader);
    }

    #[test]
    fn test_plan_rejects_foreign_entries() {
        let order = order(PaymentMethod::Paid);
        let other = LedgerEntry::settlement(
            Uuid::now_v7(),
            Uuid::now_v7(),
            Role::Trader,
            Direction::Deposit,
            money(dec!(1)),
            "other order",
        );
        let transition = transition(OrderStatus::Assigned, OrderStatus::Delivered);
        assert!(matches!(
            plan_transition(&order, transition, &[other]),
            Err(EngineError::ForeignEntry { .. })
        ));
    }
}
