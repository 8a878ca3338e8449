//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Order and ledger services over one store
//! - Event Bus (store events, notifications)
//! - Event forwarder (store → bus)
//! - API Server (HTTP endpoints)
//!
//! # Lifecycle
//!
//! 1. Load configuration and the pricing table
//! 2. Initialize store and services
//! 3. Start API server and event forwarder
//! 4. Main event loop
//! 5. Graceful shutdown on SIGINT or cancellation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_exec::{KeyedLocks, LedgerService, OrderService, StaticPricing};
use courier_store::{MemoryStore, Store};

use crate::api::{create_router, ApiState};
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{DaemonEvent, EventBus, EventBusNotifier};
use crate::metrics::Metrics;

// =============================================================================
// Daemon
// =============================================================================

/// The courier daemon.
pub struct Daemon<S: Store + 'static> {
    /// Configuration
    config: Config,
    /// Store
    store: Arc<S>,
    /// Order lifecycle service
    orders: Arc<OrderService<S>>,
    /// Ledger service
    ledger: Arc<LedgerService<S>>,
    /// Event bus
    event_bus: Arc<EventBus>,
    /// Metrics
    metrics: Arc<Metrics>,
    /// Stops the API server, the forwarder and the main loop
    shutdown: CancellationToken,
}

impl Daemon<MemoryStore> {
    /// Create a daemon over an in-memory store (testing/development).
    pub fn new_stub(config: Config) -> DaemonResult<Self> {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }
}

#[cfg(feature = "postgres")]
impl Daemon<courier_store::PgStore> {
    /// Connect to PostgreSQL, run migrations and build the daemon.
    pub async fn connect(config: Config) -> DaemonResult<Self> {
        let url = config
            .database_url
            .clone()
            .ok_or_else(|| DaemonError::Config("DATABASE_URL is not set".to_string()))?;

        let store = courier_store::PgStore::connect(&url, 10).await?;
        store.migrate().await?;
        info!("Connected to PostgreSQL, migrations applied");

        Self::with_store(config, Arc::new(store))
    }
}

impl<S: Store + 'static> Daemon<S> {
    /// Create a daemon over an existing store.
    pub fn with_store(config: Config, store: Arc<S>) -> DaemonResult<Self> {
        let pricing = match &config.pricing_file {
            Some(path) => {
                let pricing = StaticPricing::load(path)?;
                info!(path = %path.display(), "Pricing table loaded");
                pricing
            }
            None => {
                warn!("No COURIER_PRICING_FILE set; order creation will fail pricing lookups");
                StaticPricing::new()
            }
        };

        let event_bus = Arc::new(EventBus::new(config.events.bus_capacity));
        let notifier = Arc::new(EventBusNotifier::new(event_bus.clone()));
        let locks = Arc::new(KeyedLocks::new());

        let orders = Arc::new(OrderService::new(
            store.clone(),
            Arc::new(pricing),
            notifier,
            locks.clone(),
        ));
        let ledger = Arc::new(LedgerService::new(store.clone(), locks));
        let metrics = Arc::new(Metrics::new()?);

        Ok(Self {
            config,
            store,
            orders,
            ledger,
            event_bus,
            metrics,
            shutdown: CancellationToken::new(),
        })
    }

    /// Order service
    pub fn orders(&self) -> Arc<OrderService<S>> {
        self.orders.clone()
    }

    /// Ledger service
    pub fn ledger(&self) -> Arc<LedgerService<S>> {
        self.ledger.clone()
    }

    /// Event bus
    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// Token that stops the daemon when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// API router over this daemon's services.
    pub fn router(&self) -> Router {
        create_router(Arc::new(ApiState {
            orders: self.orders.clone(),
            ledger: self.ledger.clone(),
            metrics: self.metrics.clone(),
        }))
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT or the
    /// shutdown token).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            "Starting courier daemon"
        );

        // 1. Start API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 2. Forward committed store events to the bus
        let forwarder = self.spawn_event_forwarder();

        // 3. Subscribe to event bus
        let mut event_receiver = self.event_bus.subscribe();

        // 4. Main event loop
        info!("Entering main event loop");
        loop {
            tokio::select! {
                Some(event_result) = event_receiver.recv() => {
                    match event_result {
                        Ok(event) => match self.handle_event(event) {
                            Ok(()) => {}
                            Err(DaemonError::Shutdown) => break,
                            Err(e) => error!(error = %e, "Error handling event"),
                        },
                        Err(lag_msg) => {
                            warn!(%lag_msg, "Event receiver lagged");
                        }
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }

                _ = self.shutdown.cancelled() => {
                    info!("Shutdown token cancelled");
                    break;
                }
            }
        }

        // 5. Graceful shutdown
        self.shutdown_components(forwarder).await;

        Ok(())
    }

    /// Start the API server.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let router = self.router();
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Config(format!("Failed to get local address: {}", e)))?;

        let token = self.shutdown.clone();
        tokio::spawn(async move {
            let server = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = server.await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }

    /// Spawn the task that publishes committed store events on the bus.
    fn spawn_event_forwarder(&self) -> JoinHandle<()> {
        let forwarder = EventForwarder {
            store: self.store.clone(),
            bus: self.event_bus.clone(),
            metrics: self.metrics.clone(),
            poll_interval: self.config.events.poll_interval,
        };
        tokio::spawn(forwarder.run(self.shutdown.clone()))
    }

    /// Handle an event from the event bus.
    fn handle_event(&self, event: DaemonEvent) -> DaemonResult<()> {
        match event {
            DaemonEvent::Store { seq, event } => {
                debug!(
                    seq,
                    event_type = event.event_type(),
                    order_id = ?event.order_id(),
                    "Store event"
                );
            }

            DaemonEvent::Notification(notification) => {
                info!(
                    account_id = %notification.account_id,
                    title = %notification.title,
                    description = %notification.description,
                    "Notification"
                );
            }

            DaemonEvent::Shutdown => {
                info!("Shutdown event received");
                return Err(DaemonError::Shutdown);
            }
        }

        Ok(())
    }

    /// Graceful shutdown.
    async fn shutdown_components(&self, forwarder: JoinHandle<()>) {
        info!("Initiating graceful shutdown");
        self.shutdown.cancel();

        if let Err(e) = forwarder.await {
            warn!(error = %e, "Event forwarder task failed");
        }
        info!("Shutdown complete");
    }
}

// =============================================================================
// Event Forwarder
// =============================================================================

/// Polls the store event log and publishes new events on the bus.
struct EventForwarder<S: Store + 'static> {
    store: Arc<S>,
    bus: Arc<EventBus>,
    metrics: Arc<Metrics>,
    poll_interval: Duration,
}

impl<S: Store + 'static> EventForwarder<S> {
    async fn run(self, shutdown: CancellationToken) {
        // Only events committed after startup are forwarded
        let mut last_seq = match self.store.events().find_after(0).await {
            Ok(events) => events.last().map(|(seq, _)| *seq).unwrap_or(0),
            Err(e) => {
                error!(error = %e, "Cannot read event cursor, forwarder not started");
                return;
            }
        };
        info!(
            last_seq,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Event forwarder started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await; // First tick is immediate

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.forward(&mut last_seq).await {
                        Ok(count) if count > 0 => debug!(count, last_seq, "Forwarded store events"),
                        Err(e) => error!(error = %e, "Event forwarding failed (will retry)"),
                        _ => {}
                    }
                }
            }
        }

        info!("Event forwarder stopped");
    }

    async fn forward(&self, last_seq: &mut i64) -> DaemonResult<usize> {
        let events = self.store.events().find_after(*last_seq).await?;
        let count = events.len();
        for (seq, event) in events {
            self.bus.send(DaemonEvent::Store { seq, event });
            self.metrics.events_forwarded_total.inc();
            *last_seq = seq;
        }
        Ok(count)
    }
}

// =============================================================================
// Tests
// =============================================================================
