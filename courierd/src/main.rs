//! Courier Daemon
//!
//! Runtime host for order lifecycle, settlement and the HTTP API.
//!
//! # Usage
//!
//! ```bash
//! # Start with default configuration
//! cargo run -p courierd
//!
//! # Start with a pricing table on a custom port
//! COURIER_PRICING_FILE=pricing.json COURIER_API_PORT=8081 cargo run -p courierd
//! ```
//!
//! # Environment Variables
//!
//! - `COURIER_ENV`: Environment (test, development, production)
//! - `COURIER_API_HOST`: API host (default: 0.0.0.0)
//! - `COURIER_API_PORT`: API port (default: 8080)
//! - `COURIER_PRICING_FILE`: JSON pricing table (zones and trader prices)
//! - `COURIER_EVENT_BUS_CAPACITY`: Event bus buffer (default: 1000)
//! - `COURIER_EVENT_POLL_MS`: Store event forwarding interval (default: 500)
//! - `DATABASE_URL`: PostgreSQL store (feature `postgres`)

use courierd::{Config, Daemon};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("courierd=info".parse()?))
        .init();

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        "Courier Daemon"
    );

    #[cfg(feature = "postgres")]
    {
        if config.database_url.is_some() {
            let daemon = Daemon::connect(config).await?;
            daemon.run().await?;
            return Ok(());
        }
    }

    #[cfg(not(feature = "postgres"))]
    {
        if config.database_url.is_some() {
            tracing::warn!(
                "DATABASE_URL is set but the postgres feature is off; using memory store"
            );
        }
    }

    // Create and run daemon
    let daemon = Daemon::new_stub(config)?;
    daemon.run().await?;

    Ok(())
}
