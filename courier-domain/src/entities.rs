//! Domain Entities for Courier
//!
//! Core business entities with lifecycle management.
//! All entities have identity; orders carry the status state machine.

use crate::status::{OrderStatus, Transition};
use crate::value_objects::{Direction, DomainError, Money, PaymentMethod, Role, TrackingNumber};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identifiers
// =============================================================================

/// Unique identifier for an Order
pub type OrderId = Uuid;

/// Unique identifier for an Account (trader or driver)
pub type AccountId = Uuid;

/// Unique identifier for a ledger entry
pub type LedgerEntryId = Uuid;

/// Customer reference (owned by the customer directory, not this core)
pub type CustomerId = Uuid;

/// Delivery zone reference (owned by the pricing oracle)
pub type ZoneId = Uuid;

// =============================================================================
// Order
// =============================================================================

/// Caller-supplied fields for a new order
///
/// Prices are not part of the draft: `delivery_cost` and
/// `trader_merchant_cost` are snapshotted from the pricing oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDraft {
    pub trader: AccountId,
    pub customer: CustomerId,
    pub delivery_zone: ZoneId,
    pub payment_method: PaymentMethod,
    pub product_cost: Money,
    #[serde(default)]
    pub extra_delivery_cost: Money,
    pub reference_code: String,
    #[serde(default)]
    pub driver: Option<AccountId>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A single delivery job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub tracking_number: TrackingNumber,
    pub reference_code: String,
    pub status: OrderStatus,

    // Costs (snapshotted at creation)
    pub product_cost: Money,
    pub delivery_cost: Money,
    pub extra_delivery_cost: Money,
    pub trader_merchant_cost: Money,
    pub payment_method: PaymentMethod,

    // Relations
    pub trader: Option<AccountId>,
    pub driver: Option<AccountId>,
    pub customer: CustomerId,
    pub delivery_zone: ZoneId,

    pub postpone_count: u32,
    pub notes: Option<String>,

    /// Optimistic concurrency counter, bumped on every committed write
    pub version: u64,

    // Audit
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Create a new order from a draft and the snapshotted prices
    ///
    /// Starts in CREATED, or ASSIGNED when the draft carries a driver.
    pub fn new(
        draft: OrderDraft,
        tracking_number: TrackingNumber,
        delivery_cost: Money,
        trader_merchant_cost: Money,
    ) -> Self {
        let now = Utc::now();
        let status = if draft.driver.is_some() {
            OrderStatus::Assigned
        } else {
            OrderStatus::Created
        };

        Self {
            id: Uuid::now_v7(),
            tracking_number,
            reference_code: draft.reference_code,
            status,
            product_cost: draft.product_cost,
            delivery_cost,
            extra_delivery_cost: draft.extra_delivery_cost,
            trader_merchant_cost,
            payment_method: draft.payment_method,
            trader: Some(draft.trader),
            driver: draft.driver,
            customer: draft.customer,
            delivery_zone: draft.delivery_zone,
            postpone_count: 0,
            notes: draft.notes,
            version: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Move the order to `to`, enforcing the transition table and the
    /// relations the target status needs.
    ///
    /// A same-status save is accepted and changes nothing but `updated_at`.
    ///
    /// # Errors
    /// - `InvalidTransition` if `to` is not reachable
    /// - `MissingTrader` when entering ASSIGNED or DELIVERED without a trader
    /// - `DriverRequired` when entering ASSIGNED without a driver
    pub fn transition_to(&mut self, to: OrderStatus) -> Result<Transition, DomainError> {
        let transition = Transition::validate(self.status, to)?;

        if !transition.is_resave() {
            self.check_relations_for(to)?;
        }

        if transition.enters_postponed() {
            self.postpone_count += 1;
        }

        self.status = to;
        self.updated_at = Utc::now();
        Ok(transition)
    }

    fn check_relations_for(&self, to: OrderStatus) -> Result<(), DomainError> {
        if matches!(to, OrderStatus::Assigned | OrderStatus::Delivered) && self.trader.is_none() {
            return Err(DomainError::MissingTrader { status: to });
        }
        if to == OrderStatus::Assigned && self.driver.is_none() {
            return Err(DomainError::DriverRequired);
        }
        Ok(())
    }

    /// Check whether the office may assign a driver to this order
    pub fn check_assignable(&self) -> Result<(), DomainError> {
        if let Some(existing) = self.driver {
            return Err(DomainError::AlreadyAssigned {
                tracking_number: self.tracking_number.to_string(),
                reason: format!("driver {} is already assigned", existing),
            });
        }
        if matches!(
            self.status,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Assigned
        ) {
            return Err(DomainError::AlreadyAssigned {
                tracking_number: self.tracking_number.to_string(),
                reason: format!("order is {}", self.status),
            });
        }
        Ok(())
    }

    /// Assign a driver (office-initiated): sets driver and ASSIGNED together
    pub fn assign_driver(&mut self, driver: AccountId) -> Result<Transition, DomainError> {
        self.check_assignable()?;
        if self.trader.is_none() {
            return Err(DomainError::MissingTrader {
                status: OrderStatus::Assigned,
            });
        }

        let transition = Transition {
            from: self.status,
            to: OrderStatus::Assigned,
        };
        self.driver = Some(driver);
        self.status = OrderStatus::Assigned;
        self.updated_at = Utc::now();
        Ok(transition)
    }

    /// Check whether `driver` may self-assign this order
    ///
    /// Only CREATED and IN_PROGRESS orders are open for acceptance, and
    /// only if no other driver holds them.
    pub fn check_acceptable(&self, driver: AccountId) -> Result<(), DomainError> {
        if let Some(existing) = self.driver {
            if existing != driver {
                return Err(DomainError::AlreadyAssigned {
                    tracking_number: self.tracking_number.to_string(),
                    reason: "order belongs to another driver".to_string(),
                });
            }
        }
        if !matches!(self.status, OrderStatus::Created | OrderStatus::InProgress) {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to: OrderStatus::Assigned,
            });
        }
        if self.trader.is_none() {
            return Err(DomainError::MissingTrader {
                status: OrderStatus::Assigned,
            });
        }
        Ok(())
    }

    /// Driver self-assignment
    pub fn accept_by(&mut self, driver: AccountId) -> Result<Transition, DomainError> {
        self.check_acceptable(driver)?;

        let transition = Transition {
            from: self.status,
            to: OrderStatus::Assigned,
        };
        self.driver = Some(driver);
        self.status = OrderStatus::Assigned;
        self.updated_at = Utc::now();
        Ok(transition)
    }

    /// Refuse edits to settled orders
    pub fn ensure_editable(&self) -> Result<(), DomainError> {
        if self.status.is_settled() {
            return Err(DomainError::OrderSettled {
                tracking_number: self.tracking_number.to_string(),
                status: self.status,
            });
        }
        Ok(())
    }

    /// Fee credited to the driver: delivery_cost + extra_delivery_cost
    pub fn driver_fee(&self) -> Result<Money, DomainError> {
        self.delivery_cost.checked_add(self.extra_delivery_cost)
    }

    /// Cash a COD driver owes the office: product_cost + trader_merchant_cost
    pub fn cod_collection(&self) -> Result<Money, DomainError> {
        self.product_cost.checked_add(self.trader_merchant_cost)
    }

    /// Role an account plays on this order, if any
    pub fn role_of(&self, account_id: AccountId) -> Option<Role> {
        if self.trader == Some(account_id) {
            Some(Role::Trader)
        } else if self.driver == Some(account_id) {
            Some(Role::Driver)
        } else {
            None
        }
    }

    /// Clear references to a deleted account. Returns true if anything changed.
    pub fn detach_account(&mut self, account_id: AccountId) -> bool {
        let mut changed = false;
        if self.trader == Some(account_id) {
            self.trader = None;
            changed = true;
        }
        if self.driver == Some(account_id) {
            self.driver = None;
            changed = true;
        }
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    /// Check if the order was soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Soft delete
    pub fn mark_deleted(&mut self) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }
}

// =============================================================================
// Account
// =============================================================================

/// Role-specific profile data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleProfile {
    /// Merchant profile
    Trader {
        #[serde(default)]
        store_name: Option<String>,
    },
    /// Courier profile
    Driver {
        #[serde(default)]
        vehicle: Option<String>,
    },
}

impl RoleProfile {
    /// Role discriminant
    pub fn role(&self) -> Role {
        match self {
            RoleProfile::Trader { .. } => Role::Trader,
            RoleProfile::Driver { .. } => Role::Driver,
        }
    }
}

/// Trader or driver account with a running balance
///
/// `balance` is a cache of the net effect of every ledger entry ever
/// applied to the account; only the store mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub phone: Option<String>,
    pub profile: RoleProfile,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Create an account with zero balance
    pub fn new(name: impl Into<String>, phone: Option<String>, profile: RoleProfile) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            phone,
            profile,
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Shorthand for a trader account
    pub fn trader(name: impl Into<String>, store_name: Option<String>) -> Self {
        Self::new(name, None, RoleProfile::Trader { store_name })
    }

    /// Shorthand for a driver account
    pub fn driver(name: impl Into<String>, vehicle: Option<String>) -> Self {
        Self::new(name, None, RoleProfile::Driver { vehicle })
    }

    /// Role discriminant
    pub fn role(&self) -> Role {
        self.profile.role()
    }

    /// Check the account is live and has the expected role
    pub fn ensure_active_role(&self, expected: Role) -> Result<(), DomainError> {
        if self.is_deleted() {
            return Err(DomainError::AccountDeleted(self.id));
        }
        if self.role() != expected {
            return Err(DomainError::RoleMismatch {
                account_id: self.id,
                expected,
                actual: self.role(),
            });
        }
        Ok(())
    }

    /// Check if the account was soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Soft delete
    pub fn mark_deleted(&mut self) {
        let now = Utc::now();
        self.deleted_at = Some(now);
        self.updated_at = now;
    }
}

// =============================================================================
// Ledger Entry
// =============================================================================

/// Origin of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    /// Posted by the settlement hook of an order transition
    Settlement,
    /// Administrative entry (no order)
    Manual,
    /// Compensating entry written by a reversal
    Reversal,
}

impl EntryKind {
    /// Canonical uppercase name
    pub fn name(&self) -> &'static str {
        match self {
            EntryKind::Settlement => "SETTLEMENT",
            EntryKind::Manual => "MANUAL",
            EntryKind::Reversal => "REVERSAL",
        }
    }
}

impl std::str::FromStr for EntryKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SETTLEMENT" => Ok(EntryKind::Settlement),
            "MANUAL" => Ok(EntryKind::Manual),
            "REVERSAL" => Ok(EntryKind::Reversal),
            other => Err(DomainError::InvalidValue(format!("entry kind {}", other))),
        }
    }
}

/// One monetary movement against an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub account_id: AccountId,
    pub order_id: Option<OrderId>,
    /// Role the account played on the order (settlement entries only)
    pub role: Option<Role>,
    pub amount: Money,
    pub direction: Direction,
    pub kind: EntryKind,
    pub notes: String,
    pub is_rolled_back: bool,
    /// Entry this one compensates
    pub reverses: Option<LedgerEntryId>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn build(
        account_id: AccountId,
        order_id: Option<OrderId>,
        role: Option<Role>,
        direction: Direction,
        amount: Money,
        kind: EntryKind,
        notes: String,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            account_id,
            order_id,
            role,
            amount,
            direction,
            kind,
            notes,
            is_rolled_back: false,
            reverses: None,
            created_at: Utc::now(),
        }
    }

    /// Entry posted for an order
    pub fn settlement(
        account_id: AccountId,
        order_id: OrderId,
        role: Role,
        direction: Direction,
        amount: Money,
        notes: impl Into<String>,
    ) -> Self {
        Self::build(
            account_id,
            Some(order_id),
            Some(role),
            direction,
            amount,
            EntryKind::Settlement,
            notes.into(),
        )
    }

    /// Administrative entry without an order
    pub fn manual(
        account_id: AccountId,
        direction: Direction,
        amount: Money,
        notes: impl Into<String>,
    ) -> Self {
        Self::build(account_id, None, None, direction, amount, EntryKind::Manual, notes.into())
    }

    /// Signed balance change this entry applies
    pub fn balance_delta(&self) -> Decimal {
        self.direction.balance_delta(self.amount)
    }

    /// Not rolled back
    pub fn is_active(&self) -> bool {
        !self.is_rolled_back
    }

    /// Check if this active entry already covers a settlement event
    pub fn covers(&self, order_id: OrderId, role: Role, direction: Direction) -> bool {
        self.is_active()
            && self.order_id == Some(order_id)
            && self.role == Some(role)
            && self.direction == direction
    }

    /// Build the compensating entry for a reversal
    ///
    /// The compensation is born rolled back so neither it nor the entry it
    /// reverses count in "already posted" checks or balance recomputation.
    ///
    /// # Errors
    /// Returns `DomainError::AlreadyRolledBack` if this entry is not active.
    pub fn compensation(&self) -> Result<LedgerEntry, DomainError> {
        if self.is_rolled_back {
            return Err(DomainError::AlreadyRolledBack(self.id));
        }

        let mut entry = Self::build(
            self.account_id,
            self.order_id,
            self.role,
            self.direction.opposite(),
            self.amount,
            EntryKind::Reversal,
            format!("Reversal of {}", self.id),
        );
        entry.is_rolled_back = true;
        entry.reverses = Some(self.id);
        Ok(entry)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn money(value: Decimal) -> Money {
        Money::new(value).unwrap()
    }

    fn draft(driver: Option<AccountId>) -> OrderDraft {
        OrderDraft {
            trader: Uuid::now_v7(),
            customer: Uuid::now_v7(),
            delivery_zone: Uuid::now_v7(),
            payment_method: PaymentMethod::Cod,
            product_cost: money(dec!(100)),
            extra_delivery_cost: money(dec!(5)),
            reference_code: "REF-1".to_string(),
            driver,
            notes: None,
        }
    }

    fn order(driver: Option<AccountId>) -> Order {
        Order::new(draft(driver), TrackingNumber::generate(), money(dec!(10)), money(dec!(15)))
    }

    #[test]
    fn test_order_creation_without_driver() {
        let order = order(None);
        assert_eq!(order.status, OrderStatus::Created);
        assert_eq!(order.delivery_cost.as_decimal(), dec!(10));
        assert_eq!(order.trader_merchant_cost.as_decimal(), dec!(15));
        assert_eq!(order.version, 0);
    }

    #[test]
    fn test_order_creation_with_driver_is_assigned() {
        let order = order(Some(Uuid::now_v7()));
        assert_eq!(order.status, OrderStatus::Assigned);
    }

    #[test]
    fn test_assigned_requires_driver() {
        let mut order = order(None);
        assert_eq!(order.transition_to(OrderStatus::Assigned), Err(DomainError::DriverRequired));
        assert_eq!(order.status, OrderStatus::Created);
    }

    #[test]
    fn test_delivered_requires_trader() {
        let mut order = order(Some(Uuid::now_v7()));
        order.trader = None;
        let err = order.transition_to(OrderStatus::Delivered).unwrap_err();
        assert_eq!(
            err,
            DomainError::MissingTrader {
                status: OrderStatus::Delivered
            }
        );
    }

    #[test]
    fn test_postpone_increments_counter_once_per_entry() {
        let mut order = order(Some(Uuid::now_v7()));
        order.transition_to(OrderStatus::Postponed).unwrap();
        order.transition_to(OrderStatus::Postponed).unwrap();
        assert_eq!(order.postpone_count, 1);

        order.transition_to(OrderStatus::InProgress).unwrap();
        order.transition_to(OrderStatus::Postponed).unwrap();
        assert_eq!(order.postpone_count, 2);
    }

    #[test]
    fn test_assign_driver_rejects_delivered() {
        let mut order = order(Some(Uuid::now_v7()));
        order.transition_to(OrderStatus::Delivered).unwrap();
        order.driver = None;

        let before = order.clone();
        let err = order.assign_driver(Uuid::now_v7()).unwrap_err();
        assert_eq!(err.code(), "already_assigned");
        assert_eq!(order, before);
    }

    #[test]
    fn test_assign_driver_rejects_existing_driver() {
        let mut order = order(None);
        order.assign_driver(Uuid::now_v7()).unwrap();
        assert!(order.assign_driver(Uuid::now_v7()).is_err());
    }

    #[test]
    fn test_accept_by_other_driver_rejected() {
        let first = Uuid::now_v7();
        let mut order = order(None);
        order.accept_by(first).unwrap();
        order.transition_to(OrderStatus::InProgress).unwrap();

        assert!(order.check_acceptable(Uuid::now_v7()).is_err());
        // Same driver may re-accept an in-progress order
        assert!(order.check_acceptable(first).is_ok());
    }

    #[test]
    fn test_accept_requires_open_status() {
        let driver = Uuid::now_v7();
        let mut order = order(None);
        order.transition_to(OrderStatus::Cancelled).unwrap();
        assert_eq!(
            order.check_acceptable(driver),
            Err(DomainError::InvalidTransition {
                from: OrderStatus::Cancelled,
                to: OrderStatus::Assigned
            })
        );
    }

    #[test]
    fn test_detach_account() {
        let driver = Uuid::now_v7();
        let mut order = order(Some(driver));
        let trader = order.trader.unwrap();

        assert_eq!(order.role_of(trader), Some(Role::Trader));
        assert!(order.detach_account(trader));
        assert!(order.trader.is_none());
        assert!(!order.detach_account(trader));
        assert_eq!(order.role_of(driver), Some(Role::Driver));
    }

    #[test]
    fn test_order_fee_helpers() {
        let order = order(None);
        assert_eq!(order.driver_fee().unwrap().as_decimal(), dec!(15));
        assert_eq!(order.cod_collection().unwrap().as_decimal(), dec!(115));
    }

    #[test]
    fn test_account_role_checks() {
        let mut driver = Account::driver("Sam", Some("motorbike".to_string()));
        assert!(driver.ensure_active_role(Role::Driver).is_ok());
        assert!(matches!(
            driver.ensure_active_role(Role::Trader),
            Err(DomainError::RoleMismatch { .. })
        ));

        driver.mark_deleted();
        assert_eq!(
            driver.ensure_active_role(Role::Driver),
            Err(DomainError::AccountDeleted(driver.id))
        );
    }

    #[test]
    fn test_role_profile_serde_tag() {
        let profile = RoleProfile::Trader {
            store_name: Some("Shop".to_string()),
        };
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["role"], "TRADER");
        assert_eq!(json["store_name"], "Shop");
    }

    #[test]
    fn test_compensation_entry() {
        let entry = LedgerEntry::settlement(
            Uuid::now_v7(),
            Uuid::now_v7(),
            Role::Trader,
            Direction::Deposit,
            money(dec!(20)),
            "cancelled",
        );
        let comp = entry.compensation().unwrap();

        assert_eq!(comp.direction, Direction::Withdraw);
        assert_eq!(comp.amount, entry.amount);
        assert!(comp.is_rolled_back);
        assert_eq!(comp.reverses, Some(entry.id));
        assert_eq!(comp.balance_delta() + entry.balance_delta(), Decimal::ZERO);
    }

    #[test]
    fn test_compensation_of_rolled_back_entry_fails() {
        let mut entry =
            LedgerEntry::manual(Uuid::now_v7(), Direction::Withdraw, money(dec!(5)), "fee");
        entry.is_rolled_back = true;
        assert_eq!(entry.compensation(), Err(DomainError::AlreadyRolledBack(entry.id)));
    }

    #[test]
    fn test_covers_ignores_rolled_back() {
        let order_id = Uuid::now_v7();
        let mut entry = LedgerEntry::settlement(
            Uuid::now_v7(),
            order_id,
            Role::Driver,
            Direction::Deposit,
            money(dec!(15)),
            "delivered",
        );
        assert!(entry.covers(order_id, Role::Driver, Direction::Deposit));
        assert!(!entry.covers(order_id, Role::Driver, Direction::Withdraw));

        entry.is_rolled_back = true;
        assert!(!entry.covers(order_id, Role::Driver, Direction::Deposit));
    }
}
