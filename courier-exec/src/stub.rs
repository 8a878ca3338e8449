//! In-process adapters for the ports.
//!
//! `StaticPricing` serves a fixed price table, `LogNotifier` writes
//! notifications to the log and `RecordingNotifier` keeps them for tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock};
use tracing::info;

use courier_domain::{AccountId, Money, ZoneId};

use crate::error::ExecError;
use crate::ports::{Notification, Notifier, PricingOracle};

// =============================================================================
// Static Pricing
// =============================================================================

/// Serialized form of a pricing table
///
/// ```json
/// {
///   "zones": [{ "zone": "0190...", "delivery_cost": "10" }],
///   "trader_prices": [{ "trader": "0190...", "zone": "0190...", "price": "15" }]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingTable {
    /// Delivery cost per zone
    #[serde(default)]
    pub zones: Vec<ZonePrice>,
    /// Agreed price per (trader, zone)
    #[serde(default)]
    pub trader_prices: Vec<TraderPrice>,
}

/// Delivery cost of one zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZonePrice {
    /// Zone
    pub zone: ZoneId,
    /// Delivery cost
    pub delivery_cost: Money,
}

/// Price agreed between a trader and a zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraderPrice {
    /// Trader account
    pub trader: AccountId,
    /// Zone
    pub zone: ZoneId,
    /// Trader merchant cost
    pub price: Money,
}

/// In-memory pricing oracle.
pub struct StaticPricing {
    zones: RwLock<HashMap<ZoneId, Money>>,
    trader_prices: RwLock<HashMap<(AccountId, ZoneId), Money>>,
}

impl StaticPricing {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            zones: RwLock::new(HashMap::new()),
            trader_prices: RwLock::new(HashMap::new()),
        }
    }

    /// Build from a serialized table.
    pub fn from_table(table: PricingTable) -> Self {
        let pricing = Self::new();
        for zone in table.zones {
            pricing.set_delivery_cost(zone.zone, zone.delivery_cost);
        }
        for price in table.trader_prices {
            pricing.set_trader_price(price.trader, price.zone, price.price);
        }
        pricing
    }

    /// Parse a JSON pricing table.
    pub fn from_json(json: &str) -> Result<Self, ExecError> {
        let table: PricingTable = serde_json::from_str(json)
            .map_err(|e| ExecError::Config(format!("invalid pricing table: {}", e)))?;
        Ok(Self::from_table(table))
    }

    /// Load a JSON pricing table from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ExecError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ExecError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Set the delivery cost of a zone.
    pub fn set_delivery_cost(&self, zone: ZoneId, cost: Money) {
        self.zones.write().unwrap_or_else(PoisonError::into_inner).insert(zone, cost);
    }

    /// Set the price a trader pays for a zone.
    pub fn set_trader_price(&self, trader: AccountId, zone: ZoneId, price: Money) {
        self.trader_prices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((trader, zone), price);
    }
}

impl Default for StaticPricing {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PricingOracle for StaticPricing {
    async fn delivery_cost(&self, zone: ZoneId) -> Result<Option<Money>, ExecError> {
        Ok(self.zones.read().unwrap_or_else(PoisonError::into_inner).get(&zone).copied())
    }

    async fn trader_price(
        &self,
        trader: AccountId,
        zone: ZoneId,
    ) -> Result<Option<Money>, ExecError> {
        Ok(self
            .trader_prices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(trader, zone))
            .copied())
    }
}

// =============================================================================
// Notifiers
// =============================================================================

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), ExecError> {
        info!(
            account_id = %notification.account_id,
            title = %notification.title,
            description = %notification.description,
            "Notification"
        );
        Ok(())
    }
}

/// Notifier that records everything it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: Mutex<bool>,
}

impl RecordingNotifier {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following delivery fail (nothing is recorded).
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    /// Notifications delivered so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Notifications delivered to one account.
    pub fn sent_to(&self, account_id: AccountId) -> Vec<Notification> {
        self.sent().into_iter().filter(|n| n.account_id == account_id).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), ExecError> {
        if *self.fail.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(ExecError::Notification("recording notifier set to fail".to_string()));
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(notification);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_static_pricing_lookup() {
        let pricing = StaticPricing::new();
        let zone = Uuid::now_v7();
        let trader = Uuid::now_v7();
        pricing.set_delivery_cost(zone, Money::new(dec!(10)).unwrap());
        pricing.set_trader_price(trader, zone, Money::new(dec!(15)).unwrap());

        assert_eq!(pricing.delivery_cost(zone).await.unwrap().unwrap().as_decimal(), dec!(10));
        assert_eq!(
            pricing.trader_price(trader, zone).await.unwrap().unwrap().as_decimal(),
            dec!(15)
        );
        assert!(pricing.trader_price(Uuid::now_v7(), zone).await.unwrap().is_none());
        assert!(pricing.delivery_cost(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_static_pricing_from_json() {
        let zone = Uuid::now_v7();
        let trader = Uuid::now_v7();
        let json = format!(
            r#"{{
                "zones": [{{ "zone": "{zone}", "delivery_cost": "12.5" }}],
                "trader_prices": [{{ "trader": "{trader}", "zone": "{zone}", "price": 20 }}]
            }}"#
        );

        let pricing = StaticPricing::from_json(&json).unwrap();
        assert_eq!(pricing.delivery_cost(zone).await.unwrap().unwrap().as_decimal(), dec!(12.5));
        assert_eq!(
            pricing.trader_price(trader, zone).await.unwrap().unwrap().as_decimal(),
            dec!(20)
        );
    }

    #[test]
    fn test_static_pricing_rejects_negative_price() {
        let json = format!(
            r#"{{ "zones": [{{ "zone": "{}", "delivery_cost": "-1" }}] }}"#,
            Uuid::now_v7()
        );
        assert!(matches!(StaticPricing::from_json(&json), Err(ExecError::Config(_))));
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        let account = Uuid::now_v7();

        notifier.notify(Notification::new(account, "t", "d")).await.unwrap();
        notifier.set_failing(true);
        assert!(notifier.notify(Notification::new(account, "t2", "d2")).await.is_err());

        assert_eq!(notifier.sent_to(account).len(), 1);
    }
}
