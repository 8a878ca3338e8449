//! Courier Daemon Library
//!
//! Runtime host for the order lifecycle and ledger settlement services.
//!
//! # Architecture
//!
//! ```text
//! HTTP → API Server → OrderService / LedgerService → Store
//!                              ↓                        ↓
//!                      EventBusNotifier          Event forwarder
//!                              ↓                        ↓
//!                              └────── Event Bus ───────┘
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **API**: HTTP endpoints with structured JSON errors
//! - **Event Bus**: Committed store events and notifications
//! - **Metrics**: Prometheus counters served on `/metrics`
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use courierd::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let daemon = Daemon::new_stub(config)?;
//!     daemon.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod event_bus;
pub mod metrics;

// Re-exports for convenience
pub use api::{create_router, ApiState, ErrorResponse};
pub use config::{ApiConfig, Config, Environment, EventConfig};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use event_bus::{DaemonEvent, EventBus, EventBusNotifier, EventReceiver};
pub use metrics::Metrics;
