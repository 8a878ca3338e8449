//! Execution layer error types.

use courier_domain::{AccountId, DomainError, ZoneId};
use courier_engine::EngineError;
use courier_store::{BalanceGuard, StoreError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why one item of a batch was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemError {
    /// Tracking number or reference code as supplied by the caller
    pub item: String,
    /// Machine-readable code
    pub code: String,
    /// Human-readable reason
    pub message: String,
}

impl BatchItemError {
    /// Build an item error from any execution error
    pub fn new(item: impl Into<String>, err: &ExecError) -> Self {
        Self {
            item: item.into(),
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors that can occur during execution operations.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Domain invariant violated
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Referenced entity does not exist (or was deleted)
    #[error("{entity_type} not found: {id}")]
    NotFound {
        /// Type of entity
        entity_type: &'static str,
        /// Identifier as supplied
        id: String,
    },

    /// Trader does not serve the zone, or the zone has no delivery cost
    #[error("No pricing for trader {trader} in zone {zone}")]
    PricingNotFound {
        /// Trader account
        trader: AccountId,
        /// Delivery zone
        zone: ZoneId,
    },

    /// Pricing oracle failure
    #[error("Pricing error: {0}")]
    Pricing(String),

    /// One or more items of a batch were refused; nothing was written
    #[error("Batch rejected: {} item(s) failed validation", .0.len())]
    BatchValidation(Vec<BatchItemError>),

    /// Deletion refused while money is still attached
    #[error("Cannot delete {entity_type} {id}: {reason}")]
    NonZeroBalanceDeletion {
        /// Type of entity
        entity_type: &'static str,
        /// Entity ID
        id: String,
        /// What is still attached
        reason: String,
    },

    /// Manual withdrawal larger than the current balance
    #[error("Insufficient balance on {account_id}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        /// Account
        account_id: AccountId,
        /// Current balance
        balance: Decimal,
        /// Requested amount
        requested: Decimal,
    },

    /// Notification delivery failure (never propagated out of services)
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExecError {
    /// Create a not found error
    pub fn not_found(entity_type: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity_type,
            id: id.to_string(),
        }
    }

    /// Map a commit failure, turning balance guard violations into their
    /// business errors.
    pub fn from_commit(err: StoreError) -> Self {
        match err {
            StoreError::BalanceGuard {
                guard: BalanceGuard::AtLeast {
                    account_id,
                    minimum,
                },
                balance,
            } => {
                ExecError::InsufficientBalance {
                    account_id,
                    balance,
                    requested: minimum,
                }
            }
            StoreError::BalanceGuard {
                guard: BalanceGuard::Zero { account_id },
                balance,
            } => {
                ExecError::NonZeroBalanceDeletion {
                    entity_type: "account",
                    id: account_id.to_string(),
                    reason: format!("balance is {}", balance),
                }
            }
            other => ExecError::Store(other),
        }
    }

    /// Stable machine-readable code for API callers.
    pub fn code(&self) -> &'static str {
        match self {
            ExecError::Domain(e) => e.code(),
            ExecError::Engine(EngineError::Domain(e)) => e.code(),
            ExecError::Engine(_) => "engine_error",
            ExecError::Store(StoreError::NotFound { .. }) => "not_found",
            ExecError::Store(StoreError::Duplicate { .. }) => "duplicate",
            ExecError::Store(StoreError::Conflict { .. }) => "conflict",
            ExecError::Store(StoreError::BalanceGuard { .. }) => "balance_guard",
            ExecError::Store(StoreError::Domain(e)) => e.code(),
            ExecError::Store(_) => "store_error",
            ExecError::NotFound { .. } => "not_found",
            ExecError::PricingNotFound { .. } => "pricing_not_found",
            ExecError::Pricing(_) => "pricing_error",
            ExecError::BatchValidation(_) => "batch_validation",
            ExecError::NonZeroBalanceDeletion { .. } => "non_zero_balance_deletion",
            ExecError::InsufficientBalance { .. } => "insufficient_balance",
            ExecError::Notification(_) => "notification_error",
            ExecError::Config(_) => "config_error",
        }
    }

    /// Per-item failures of a rejected batch (empty otherwise)
    pub fn items(&self) -> &[BatchItemError] {
        match self {
            ExecError::BatchValidation(items) => items,
            _ => &[],
        }
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
