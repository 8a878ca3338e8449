//! Seeding helpers and the service harness.

use std::sync::Arc;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use uuid::Uuid;

use courier_domain::{
    Account, AccountId, Money, Order, OrderDraft, PaymentMethod, RoleProfile, ZoneId,
};
use courier_exec::{
    KeyedLocks, LedgerService, NewAccount, OrderService, RecordingNotifier, StaticPricing,
};
use courier_store::{MemoryStore, Store};

/// Build a `Money` from a decimal literal.
pub fn money(value: Decimal) -> Result<Money> {
    Money::new(value).context("negative amount in test fixture")
}

/// Install a test-friendly tracing subscriber (idempotent).
///
/// Honors `RUST_LOG`; silent by default.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

// =============================================================================
// Harness
// =============================================================================

/// Services wired over one store, with a static price table and a
/// recording notifier.
pub struct Harness<S: Store = MemoryStore> {
    pub store: Arc<S>,
    pub pricing: Arc<StaticPricing>,
    pub notifier: Arc<RecordingNotifier>,
    pub locks: Arc<KeyedLocks>,
    pub orders: OrderService<S>,
    pub ledger: LedgerService<S>,
}

impl Harness<MemoryStore> {
    /// Harness over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }
}

impl Default for Harness<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store> Harness<S> {
    /// Harness over an existing store.
    pub fn with_store(store: Arc<S>) -> Self {
        let pricing = Arc::new(StaticPricing::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let locks = Arc::new(KeyedLocks::new());

        let orders =
            OrderService::new(store.clone(), pricing.clone(), notifier.clone(), locks.clone());
        let ledger = LedgerService::new(store.clone(), locks.clone());

        Self {
            store,
            pricing,
            notifier,
            locks,
            orders,
            ledger,
        }
    }

    /// Create a trader account.
    pub async fn trader(&self, name: &str) -> Result<Account> {
        let account = self
            .ledger
            .create_account(NewAccount {
                name: name.to_string(),
                phone: None,
                profile: RoleProfile::Trader {
                    store_name: Some(format!("{} Store", name)),
                },
            })
            .await?;
        Ok(account)
    }

    /// Create a driver account.
    pub async fn driver(&self, name: &str) -> Result<Account> {
        let account = self
            .ledger
            .create_account(NewAccount {
                name: name.to_string(),
                phone: None,
                profile: RoleProfile::Driver {
                    vehicle: Some("motorbike".to_string()),
                },
            })
            .await?;
        Ok(account)
    }

    /// Register a zone with its delivery cost.
    pub fn zone(&self, delivery_cost: Decimal) -> Result<ZoneId> {
        let zone = Uuid::now_v7();
        self.pricing.set_delivery_cost(zone, money(delivery_cost)?);
        Ok(zone)
    }

    /// Set the price a trader pays for a zone.
    pub fn price(&self, trader: AccountId, zone: ZoneId, price: Decimal) -> Result<()> {
        self.pricing.set_trader_price(trader, zone, money(price)?);
        Ok(())
    }

    /// Current stored balance of an account (deleted accounts included).
    pub async fn balance(&self, account_id: AccountId) -> Result<Decimal> {
        let account = self
            .store
            .accounts()
            .find_by_id(account_id)
            .await?
            .with_context(|| format!("account {} not found", account_id))?;
        Ok(account.balance)
    }

    /// Draft an order for an existing trader and zone.
    pub fn draft(
        &self,
        trader: AccountId,
        zone: ZoneId,
        payment_method: PaymentMethod,
        product_cost: Decimal,
    ) -> Result<OrderDraft> {
        Ok(OrderDraft {
            trader,
            customer: Uuid::now_v7(),
            delivery_zone: zone,
            payment_method,
            product_cost: money(product_cost)?,
            extra_delivery_cost: Money::ZERO,
            reference_code: format!("REF-{}", Uuid::now_v7().simple()),
            driver: None,
            notes: None,
        })
    }

    /// Seed a trader, a driver, a priced zone and one order.
    pub async fn seed_order(&self, seed: OrderSeed) -> Result<OrderFixture> {
        let trader = self.trader("Trader").await?;
        let driver = self.driver("Driver").await?;
        let zone = self.zone(seed.delivery_cost)?;
        self.price(trader.id, zone, seed.trader_merchant_cost)?;

        let mut draft =
            self.draft(trader.id, zone, seed.payment_method, seed.product_cost)?;
        draft.extra_delivery_cost = money(seed.extra_delivery_cost)?;
        if seed.with_driver {
            draft.driver = Some(driver.id);
        }

        let order = self.orders.create(draft, Some("testkit")).await?;
        Ok(OrderFixture {
            trader,
            driver,
            zone,
            order,
        })
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Prices and options for `Harness::seed_order`
#[derive(Debug, Clone)]
pub struct OrderSeed {
    pub payment_method: PaymentMethod,
    pub product_cost: Decimal,
    pub delivery_cost: Decimal,
    pub extra_delivery_cost: Decimal,
    pub trader_merchant_cost: Decimal,
    /// Create the order already ASSIGNED to the seeded driver
    pub with_driver: bool,
}

impl Default for OrderSeed {
    fn default() -> Self {
        Self {
            payment_method: PaymentMethod::Paid,
            product_cost: Decimal::from(100),
            delivery_cost: Decimal::from(10),
            extra_delivery_cost: Decimal::ZERO,
            trader_merchant_cost: Decimal::from(15),
            with_driver: true,
        }
    }
}

impl OrderSeed {
    /// Cash-on-delivery order with the default prices
    pub fn cod() -> Self {
        Self {
            payment_method: PaymentMethod::Cod,
            ..Self::default()
        }
    }

    /// Order with remaining fees to collect
    pub fn remaining_fees() -> Self {
        Self {
            payment_method: PaymentMethod::RemainingFees,
            ..Self::default()
        }
    }
}

/// What `Harness::seed_order` created
#[derive(Debug, Clone)]
pub struct OrderFixture {
    pub trader: Account,
    pub driver: Account,
    pub zone: ZoneId,
    pub order: Order,
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_domain::OrderStatus;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_seed_order_snapshots_prices() {
        let harness = Harness::new();
        let fixture = harness.seed_order(OrderSeed::cod()).await.unwrap();

        assert_eq!(fixture.order.status, OrderStatus::Assigned);
        assert_eq!(fixture.order.driver, Some(fixture.driver.id));
        assert_eq!(fixture.order.delivery_cost.as_decimal(), dec!(10));
        assert_eq!(fixture.order.trader_merchant_cost.as_decimal(), dec!(15));
        assert_eq!(harness.balance(fixture.trader.id).await.unwrap(), dec!(0));
    }

    #[tokio::test]
    async fn test_seed_without_driver_starts_created() {
        let harness = Harness::new();
        let seed = OrderSeed {
            with_driver: false,
            ..OrderSeed::default()
        };
        let fixture = harness.seed_order(seed).await.unwrap();
        assert_eq!(fixture.order.status, OrderStatus::Created);
        assert!(fixture.order.driver.is_none());
    }
}
