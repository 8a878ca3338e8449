//! Execution layer port definitions.
//!
//! Ports define the interfaces for external collaborators (pricing,
//! notifications). Adapters implement these ports (static table, log,
//! event bus, recording stub for tests).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use courier_domain::{AccountId, Money, ZoneId};

use crate::error::ExecError;

// =============================================================================
// Pricing Oracle Port
// =============================================================================

/// Port for zone and trader pricing (consumed read-only).
///
/// Implementations:
/// - `StaticPricing` - In-memory table, loadable from JSON
#[async_trait]
pub trait PricingOracle: Send + Sync {
    /// Delivery cost for a zone, `None` if the zone has no price.
    async fn delivery_cost(&self, zone: ZoneId) -> Result<Option<Money>, ExecError>;

    /// Price agreed between a trader and a zone, `None` if the trader
    /// does not serve the zone.
    async fn trader_price(&self, trader: AccountId, zone: ZoneId)
        -> Result<Option<Money>, ExecError>;
}

// =============================================================================
// Notifier Port
// =============================================================================

/// A message for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Recipient account
    pub account_id: AccountId,
    /// Short title
    pub title: String,
    /// Body
    pub description: String,
}

impl Notification {
    /// Create a notification
    pub fn new(
        account_id: AccountId,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Port for user notifications.
///
/// Called only after a successful commit. Failures are logged by the
/// caller and never roll anything back.
///
/// Implementations:
/// - `LogNotifier` - Writes to the tracing log
/// - `RecordingNotifier` - Keeps notifications in memory (tests)
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification.
    async fn notify(&self, notification: Notification) -> Result<(), ExecError>;
}
