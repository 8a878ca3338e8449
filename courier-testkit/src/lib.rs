//! Test helpers for Courier service and database-backed tests.
//!
//! Provides a wired-up service harness over any store, seeding helpers for
//! accounts, zones and orders, and schema setup for PostgreSQL tests.

mod helpers;

pub use helpers::{init_test_tracing, money, Harness, OrderFixture, OrderSeed};

#[cfg(feature = "postgres")]
use anyhow::Result;
#[cfg(feature = "postgres")]
use sqlx::PgPool;

/// Setup a clean test database by running migrations.
///
/// Note: migrations are located at the workspace root.
#[cfg(feature = "postgres")]
pub async fn setup_test_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../migrations").run(pool).await?;
    Ok(())
}
