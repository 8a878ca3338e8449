//! PostgreSQL store.
//!
//! One `Changeset` maps to one transaction. Account rows touched by the
//! changeset are locked with `SELECT ... FOR UPDATE` (in id order) before
//! guards are checked, order rows are updated with a `version` predicate.
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::changeset::{Changeset, CommitReceipt};
use crate::error::StoreError;
use crate::repository::{
    AccountRepository, EventRepository, LedgerRepository, OrderFilter, OrderRepository, Store,
};
use async_trait::async_trait;
use courier_domain::{
    Account, AccountId, Event, LedgerEntry, LedgerEntryId, Money, Order, OrderId, Role,
    TrackingNumber,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

/// PostgreSQL-backed store
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Apply pending migrations from `migrations/`
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Get a reference to the underlying pool (for testing).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Row mapping
// =============================================================================

const ORDER_COLUMNS: &str = "id, tracking_number, reference_code, status, product_cost, \
    delivery_cost, extra_delivery_cost, trader_merchant_cost, payment_method, trader_id, \
    driver_id, customer_id, delivery_zone_id, postpone_count, notes, version, created_at, \
    updated_at, deleted_at";

const ACCOUNT_COLUMNS: &str =
    "id, name, phone, profile, balance, created_at, updated_at, deleted_at";

const ENTRY_COLUMNS: &str = "id, account_id, order_id, role, amount, direction, kind, notes, \
    is_rolled_back, reverses, created_at";

fn money(row: &PgRow, column: &str) -> Result<Money, StoreError> {
    let value: Decimal = row.try_get(column)?;
    Ok(Money::new(value)?)
}

fn parse_order_row(row: &PgRow) -> Result<Order, StoreError> {
    let tracking: String = row.try_get("tracking_number")?;
    let status: String = row.try_get("status")?;
    let payment_method: String = row.try_get("payment_method")?;
    let postpone_count: i32 = row.try_get("postpone_count")?;
    let version: i64 = row.try_get("version")?;

    Ok(Order {
        id: row.try_get("id")?,
        tracking_number: TrackingNumber::parse(&tracking)?,
        reference_code: row.try_get("reference_code")?,
        status: status.parse()?,
        product_cost: money(row, "product_cost")?,
        delivery_cost: money(row, "delivery_cost")?,
        extra_delivery_cost: money(row, "extra_delivery_cost")?,
        trader_merchant_cost: money(row, "trader_merchant_cost")?,
        payment_method: payment_method.parse()?,
        trader: row.try_get("trader_id")?,
        driver: row.try_get("driver_id")?,
        customer: row.try_get("customer_id")?,
        delivery_zone: row.try_get("delivery_zone_id")?,
        postpone_count: postpone_count.max(0) as u32,
        notes: row.try_get("notes")?,
        version: version.max(0) as u64,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn parse_account_row(row: &PgRow) -> Result<Account, StoreError> {
    let profile: serde_json::Value = row.try_get("profile")?;
    Ok(Account {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        profile: serde_json::from_value(profile)?,
        balance: row.try_get("balance")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn parse_entry_row(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let role: Option<String> = row.try_get("role")?;
    let direction: String = row.try_get("direction")?;
    let kind: String = row.try_get("kind")?;

    Ok(LedgerEntry {
        id: row.try_get("id")?,
        account_id: row.try_get("account_id")?,
        order_id: row.try_get("order_id")?,
        role: role.map(|r| r.parse::<Role>()).transpose()?,
        amount: money(row, "amount")?,
        direction: direction.parse()?,
        kind: kind.parse()?,
        notes: row.try_get("notes")?,
        is_rolled_back: row.try_get("is_rolled_back")?,
        reverses: row.try_get("reverses")?,
        created_at: row.try_get("created_at")?,
    })
}

// =============================================================================
// Commit steps
// =============================================================================

async fn insert_order(tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO orders (
            id, tracking_number, reference_code, status,
            product_cost, delivery_cost, extra_delivery_cost, trader_merchant_cost,
            payment_method, trader_id, driver_id, customer_id, delivery_zone_id,
            postpone_count, notes, version, created_at, updated_at, deleted_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
            $11, $12, $13, $14, $15, $16, $17, $18, $19
        )
        "#,
    )
    .bind(order.id)
    .bind(order.tracking_number.as_str())
    .bind(&order.reference_code)
    .bind(order.status.name())
    .bind(order.product_cost.as_decimal())
    .bind(order.delivery_cost.as_decimal())
    .bind(order.extra_delivery_cost.as_decimal())
    .bind(order.trader_merchant_cost.as_decimal())
    .bind(order.payment_method.name())
    .bind(order.trader)
    .bind(order.driver)
    .bind(order.customer)
    .bind(order.delivery_zone)
    .bind(order.postpone_count as i32)
    .bind(&order.notes)
    .bind(order.version as i64)
    .bind(order.created_at)
    .bind(order.updated_at)
    .bind(order.deleted_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn update_order(
    tx: &mut Transaction<'_, Postgres>,
    order: &Order,
    expected_version: u64,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE orders SET
            reference_code = $3, status = $4,
            product_cost = $5, delivery_cost = $6, extra_delivery_cost = $7,
            trader_merchant_cost = $8, payment_method = $9,
            trader_id = $10, driver_id = $11, customer_id = $12, delivery_zone_id = $13,
            postpone_count = $14, notes = $15, version = $16,
            updated_at = $17, deleted_at = $18
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(order.id)
    .bind(expected_version as i64)
    .bind(&order.reference_code)
    .bind(order.status.name())
    .bind(order.product_cost.as_decimal())
    .bind(order.delivery_cost.as_decimal())
    .bind(order.extra_delivery_cost.as_decimal())
    .bind(order.trader_merchant_cost.as_decimal())
    .bind(order.payment_method.name())
    .bind(order.trader)
    .bind(order.driver)
    .bind(order.customer)
    .bind(order.delivery_zone)
    .bind(order.postpone_count as i32)
    .bind(&order.notes)
    .bind(order.version as i64)
    .bind(order.updated_at)
    .bind(order.deleted_at)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        let exists = sqlx::query("SELECT 1 FROM orders WHERE id = $1")
            .bind(order.id)
            .fetch_optional(&mut **tx)
            .await?
            .is_some();
        return Err(if exists {
            StoreError::conflict(
                "order",
                order.id.to_string(),
                format!("expected version {}", expected_version),
            )
        } else {
            StoreError::not_found("order", order.id.to_string())
        });
    }
    Ok(())
}

async fn write_account(
    tx: &mut Transaction<'_, Postgres>,
    account: &Account,
    insert: bool,
) -> Result<(), StoreError> {
    let profile = serde_json::to_value(&account.profile)?;

    if insert {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, name, phone, role, profile, balance, created_at, updated_at, deleted_at
            )
            VALUES ($1, $2, $3, $4, $5, 0, $6, $7, $8)
            "#,
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.phone)
        .bind(account.role().name())
        .bind(profile)
        .bind(account.created_at)
        .bind(account.updated_at)
        .bind(account.deleted_at)
        .execute(&mut **tx)
        .await?;
        return Ok(());
    }

    // Balance is never written from the entity
    let result = sqlx::query(
        r#"
        UPDATE accounts SET name = $2, phone = $3, role = $4, profile = $5,
            updated_at = $6, deleted_at = $7
        WHERE id = $1
        "#,
    )
    .bind(account.id)
    .bind(&account.name)
    .bind(&account.phone)
    .bind(account.role().name())
    .bind(profile)
    .bind(account.updated_at)
    .bind(account.deleted_at)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("account", account.id.to_string()));
    }
    Ok(())
}

async fn roll_back_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry_id: LedgerEntryId,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE ledger_entries SET is_rolled_back = TRUE WHERE id = $1 AND NOT is_rolled_back",
    )
    .bind(entry_id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        let exists = sqlx::query("SELECT 1 FROM ledger_entries WHERE id = $1")
            .bind(entry_id)
            .fetch_optional(&mut **tx)
            .await?
            .is_some();
        return Err(if exists {
            StoreError::conflict(
                "ledger_entry",
                entry_id.to_string(),
                "entry is already rolled back",
            )
        } else {
            StoreError::not_found("ledger_entry", entry_id.to_string())
        });
    }
    Ok(())
}

async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    entry: &LedgerEntry,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (
            id, account_id, order_id, role, amount, direction, kind, notes,
            is_rolled_back, reverses, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(entry.id)
    .bind(entry.account_id)
    .bind(entry.order_id)
    .bind(entry.role.map(|r| r.name()))
    .bind(entry.amount.as_decimal())
    .bind(entry.direction.name())
    .bind(entry.kind.name())
    .bind(&entry.notes)
    .bind(entry.is_rolled_back)
    .bind(entry.reverses)
    .bind(entry.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn append_event(
    tx: &mut Transaction<'_, Postgres>,
    event: &Event,
) -> Result<i64, StoreError> {
    let payload = serde_json::to_value(event)?;
    let row = sqlx::query(
        r#"
        INSERT INTO events (event_type, order_id, payload, created_at)
        VALUES ($1, $2, $3, $4)
        RETURNING seq
        "#,
    )
    .bind(event.event_type())
    .bind(event.order_id())
    .bind(payload)
    .bind(event.timestamp())
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.try_get("seq")?)
}

// =============================================================================
// Repositories
// =============================================================================

#[async_trait]
impl AccountRepository for PgStore {
    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_account_row).transpose()
    }

    async fn list(&self, role: Option<Role>) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE deleted_at IS NULL AND ($1::TEXT IS NULL OR role = $1) \
             ORDER BY created_at",
            ACCOUNT_COLUMNS
        ))
        .bind(role.map(|r| r.name()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_account_row).collect()
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn find_by_id(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_order_row).transpose()
    }

    async fn find_by_tracking(
        &self,
        tracking_number: &TrackingNumber,
    ) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE tracking_number = $1 AND deleted_at IS NULL",
            ORDER_COLUMNS
        ))
        .bind(tracking_number.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_order_row).transpose()
    }

    async fn find_by_reference(&self, reference_code: &str) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM orders WHERE reference_code = $1 AND deleted_at IS NULL \
             ORDER BY created_at",
            ORDER_COLUMNS
        ))
        .bind(reference_code)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_order_row).collect()
    }

    async fn tracking_exists(&self, tracking_number: &TrackingNumber) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM orders WHERE tracking_number = $1")
            .bind(tracking_number.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM orders
            WHERE ($1::UUID IS NULL OR trader_id = $1)
              AND ($2::UUID IS NULL OR driver_id = $2)
              AND ($3::TEXT IS NULL OR status = $3)
              AND ($4 OR deleted_at IS NULL)
            ORDER BY created_at
            "#,
            ORDER_COLUMNS
        ))
        .bind(filter.trader)
        .bind(filter.driver)
        .bind(filter.status.map(|s| s.name()))
        .bind(filter.include_deleted)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_order_row).collect()
    }
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn find_by_id(&self, id: LedgerEntryId) -> Result<Option<LedgerEntry>, StoreError> {
        let row =
            sqlx::query(&format!("SELECT {} FROM ledger_entries WHERE id = $1", ENTRY_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(parse_entry_row).transpose()
    }

    async fn find_by_account(&self, account_id: AccountId) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger_entries WHERE account_id = $1 ORDER BY created_at, id",
            ENTRY_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_entry_row).collect()
    }

    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ledger_entries WHERE order_id = $1 ORDER BY created_at, id",
            ENTRY_COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_entry_row).collect()
    }
}

#[async_trait]
impl EventRepository for PgStore {
    async fn find_by_order(&self, order_id: OrderId) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM events WHERE order_id = $1 ORDER BY seq")
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let payload: serde_json::Value = row.try_get("payload")?;
                Ok(serde_json::from_value(payload)?)
            })
            .collect()
    }

    async fn find_after(&self, after_seq: i64) -> Result<Vec<(i64, Event)>, StoreError> {
        let rows = sqlx::query("SELECT seq, payload FROM events WHERE seq > $1 ORDER BY seq")
            .bind(after_seq)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let seq: i64 = row.try_get("seq")?;
                let payload: serde_json::Value = row.try_get("payload")?;
                Ok((seq, serde_json::from_value(payload)?))
            })
            .collect()
    }
}

#[async_trait]
impl Store for PgStore {
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
        let deltas = changeset.balance_deltas();
        let inserted: HashSet<AccountId> =
            changeset.accounts.iter().filter(|w| w.insert).map(|w| w.account.id).collect();

        // Lock every pre-existing account whose balance is read or moved
        let lock_ids: Vec<Uuid> = deltas
            .keys()
            .copied()
            .chain(changeset.guards.iter().map(|g| g.account_id()))
            .filter(|id| !inserted.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query(
            "SELECT id, balance FROM accounts WHERE id = ANY($1) ORDER BY id FOR UPDATE",
        )
        .bind(&lock_ids)
        .fetch_all(&mut *tx)
        .await?;
        let mut balances: HashMap<AccountId, Decimal> = HashMap::new();
        for row in &locked {
            balances.insert(row.try_get("id")?, row.try_get("balance")?);
        }
        if let Some(missing) = lock_ids.iter().find(|id| !balances.contains_key(id)) {
            return Err(StoreError::not_found("account", missing.to_string()));
        }

        for guard in &changeset.guards {
            let balance = balances.get(&guard.account_id()).copied().unwrap_or(Decimal::ZERO);
            if !guard.holds(balance) {
                return Err(StoreError::BalanceGuard {
                    guard: *guard,
                    balance,
                });
            }
        }

        for write in &changeset.accounts {
            write_account(&mut tx, &write.account, write.insert).await?;
        }

        for write in &changeset.orders {
            match write.expected_version {
                None => insert_order(&mut tx, &write.order).await?,
                Some(expected) => update_order(&mut tx, &write.order, expected).await?,
            }
        }

        for id in &changeset.rollbacks {
            roll_back_entry(&mut tx, *id).await?;
        }

        for entry in &changeset.entries {
            insert_entry(&mut tx, entry).await?;
        }

        let mut receipt = CommitReceipt::default();
        for (account_id, delta) in &deltas {
            let row = sqlx::query(
                "UPDATE accounts SET balance = balance + $2 WHERE id = $1 RETURNING balance",
            )
            .bind(account_id)
            .bind(delta)
            .fetch_one(&mut *tx)
            .await?;
            receipt.balances.insert(*account_id, row.try_get("balance")?);
        }
        for (account_id, balance) in balances {
            receipt.balances.entry(account_id).or_insert(balance);
        }

        for event in &changeset.events {
            receipt.last_event_seq = Some(append_event(&mut tx, event).await?);
        }

        tx.commit().await?;

        debug!(
            orders = changeset.orders.len(),
            entries = changeset.entries.len(),
            rollbacks = changeset.rollbacks.len(),
            "Changeset committed"
        );
        Ok(receipt)
    }
}

// =============================================================================
// Tests
// =============================================================================
