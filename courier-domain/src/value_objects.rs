//! Value Objects for the Courier domain
//!
//! Immutable, validated domain primitives.
//! All value objects enforce invariants at construction time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::status::OrderStatus;

/// Domain errors for invariant violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Target status is not reachable from the current one
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: OrderStatus,
        /// Requested status
        to: OrderStatus,
    },

    /// Target status needs a trader on the order
    #[error("Order has no trader; cannot move to {status}")]
    MissingTrader {
        /// Requested status
        status: OrderStatus,
    },

    /// ASSIGNED needs a driver on the order
    #[error("Order has no driver; a driver is required for ASSIGNED")]
    DriverRequired,

    /// Driver assignment conflict
    #[error("Order {tracking_number} cannot be assigned: {reason}")]
    AlreadyAssigned {
        /// Tracking number of the order
        tracking_number: String,
        /// Why the assignment is refused
        reason: String,
    },

    /// Settled orders (DELIVERED, CANCELLED) cannot be edited
    #[error("Order {tracking_number} is {status} and cannot be edited")]
    OrderSettled {
        /// Tracking number of the order
        tracking_number: String,
        /// Current status
        status: OrderStatus,
    },

    /// Monetary amount is negative or overflowed
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Tracking number has the wrong format
    #[error("Invalid tracking number: {0}")]
    InvalidTrackingNumber(String),

    /// Unknown status / payment method / direction literal
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Account has the wrong role for the operation
    #[error("Account {account_id} is a {actual}, expected a {expected}")]
    RoleMismatch {
        /// Account identifier
        account_id: Uuid,
        /// Role required by the operation
        expected: Role,
        /// Role the account actually has
        actual: Role,
    },

    /// Account was soft-deleted
    #[error("Account {0} has been deleted")]
    AccountDeleted(Uuid),

    /// Ledger entry was already reversed
    #[error("Ledger entry {0} is already rolled back")]
    AlreadyRolledBack(Uuid),
}

impl DomainError {
    /// Stable machine-readable code for callers.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::InvalidTransition { .. } => "invalid_transition",
            DomainError::MissingTrader { .. } => "missing_trader",
            DomainError::DriverRequired => "driver_required",
            DomainError::AlreadyAssigned { .. } => "already_assigned",
            DomainError::OrderSettled { .. } => "order_settled",
            DomainError::InvalidAmount(_) => "invalid_amount",
            DomainError::InvalidTrackingNumber(_) => "invalid_tracking_number",
            DomainError::InvalidValue(_) => "invalid_value",
            DomainError::RoleMismatch { .. } => "role_mismatch",
            DomainError::AccountDeleted(_) => "account_deleted",
            DomainError::AlreadyRolledBack(_) => "already_rolled_back",
        }
    }
}

// =============================================================================
// Money
// =============================================================================

/// Money is a non-negative fixed-precision amount
///
/// # Invariants
/// - Must be >= 0
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Zero amount
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Create a new amount with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidAmount` if value < 0
    pub fn new(value: Decimal) -> Result<Self, DomainError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(DomainError::InvalidAmount(format!(
                "Amount must not be negative: {}",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Get the underlying Decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Check if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Add two amounts, failing on overflow
    pub fn checked_add(self, other: Money) -> Result<Money, DomainError> {
        self.0
            .checked_add(other.0)
            .map(Money)
            .ok_or_else(|| {
                DomainError::InvalidAmount(format!("Overflow adding {} + {}", self, other))
            })
    }
}

impl TryFrom<Decimal> for Money {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Money::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// TrackingNumber
// =============================================================================

/// System-generated tracking number (e.g., `TRK3F9A01C2B7D4`)
///
/// # Invariants
/// - `TRK` prefix followed by 12 uppercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrackingNumber(String);

impl TrackingNumber {
    const PREFIX: &'static str = "TRK";
    const BODY_LEN: usize = 12;

    /// Generate a fresh random tracking number
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string().to_uppercase();
        Self(format!("{}{}", Self::PREFIX, &raw[..Self::BODY_LEN]))
    }

    /// Parse and validate a tracking number
    ///
    /// # Examples
    /// ```
    /// # use courier_domain::value_objects::TrackingNumber;
    /// let tn = TrackingNumber::parse("TRK0123456789AB").unwrap();
    /// assert_eq!(tn.as_str(), "TRK0123456789AB");
    /// assert!(TrackingNumber::parse("XYZ").is_err());
    /// ```
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        let body = value
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| DomainError::InvalidTrackingNumber(value.to_string()))?;

        let valid = body.len() == Self::BODY_LEN
            && body.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c));
        if !valid {
            return Err(DomainError::InvalidTrackingNumber(value.to_string()));
        }

        Ok(Self(value.to_string()))
    }

    /// Get the tracking number as string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TrackingNumber {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TrackingNumber::parse(&value)
    }
}

impl From<TrackingNumber> for String {
    fn from(value: TrackingNumber) -> Self {
        value.0
    }
}

impl FromStr for TrackingNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrackingNumber::parse(s)
    }
}

impl fmt::Display for TrackingNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// PaymentMethod
// =============================================================================

/// Who absorbs which cost component when the order settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Customer already paid the trader
    Paid,
    /// Cash on delivery: driver collects the product cost
    Cod,
    /// Only the remaining fees are collected
    RemainingFees,
}

impl PaymentMethod {
    /// Canonical uppercase name
    pub fn name(&self) -> &'static str {
        match self {
            PaymentMethod::Paid => "PAID",
            PaymentMethod::Cod => "COD",
            PaymentMethod::RemainingFees => "REMAINING_FEES",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PAID" => Ok(PaymentMethod::Paid),
            "COD" => Ok(PaymentMethod::Cod),
            "REMAINING_FEES" => Ok(PaymentMethod::RemainingFees),
            other => Err(DomainError::InvalidValue(format!("payment method {}", other))),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Direction
// =============================================================================

/// Direction of a ledger movement, named from the office's perspective
///
/// - `Deposit` decreases the account's stored balance
/// - `Withdraw` increases it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    /// Office pays out against the account; balance -= amount
    Deposit,
    /// Office takes from the account; balance += amount
    Withdraw,
}

impl Direction {
    /// Signed balance change caused by `amount` in this direction
    ///
    /// ```
    /// # use courier_domain::value_objects::{Direction, Money};
    /// # use rust_decimal_macros::dec;
    /// let amount = Money::new(dec!(20)).unwrap();
    /// assert_eq!(Direction::Deposit.balance_delta(amount), dec!(-20));
    /// assert_eq!(Direction::Withdraw.balance_delta(amount), dec!(20));
    /// ```
    pub fn balance_delta(&self, amount: Money) -> Decimal {
        match self {
            Direction::Deposit => -amount.as_decimal(),
            Direction::Withdraw => amount.as_decimal(),
        }
    }

    /// The compensating direction
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Deposit => Direction::Withdraw,
            Direction::Withdraw => Direction::Deposit,
        }
    }

    /// Canonical uppercase name
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Deposit => "DEPOSIT",
            Direction::Withdraw => "WITHDRAW",
        }
    }
}

impl FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DEPOSIT" => Ok(Direction::Deposit),
            "WITHDRAW" => Ok(Direction::Withdraw),
            other => Err(DomainError::InvalidValue(format!("direction {}", other))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Role
// =============================================================================

/// Account role discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Merchant whose products are delivered
    Trader,
    /// Courier fulfilling deliveries
    Driver,
}

impl Role {
    /// Canonical uppercase name
    pub fn name(&self) -> &'static str {
        match self {
            Role::Trader => "TRADER",
            Role::Driver => "DRIVER",
        }
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TRADER" => Ok(Role::Trader),
            "DRIVER" => Ok(Role::Driver),
            other => Err(DomainError::InvalidValue(format!("role {}", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Tests
// =============================================================================
