//! Order service: lifecycle transitions, assignment and acceptance.
//!
//! Every status change runs the settlement hook synchronously: the engine
//! plans the ledger work for the transition and the status write, the
//! reversals and the postings go to the store in one changeset.
//!
//! # Flow
//!
//! ```text
//! lock(order) → re-read → Order::transition_to → plan_transition
//!             → Changeset { order, reversals, postings, events } → commit
//!             → notify (best effort)
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use courier_domain::{
    Account, AccountId, DomainError, Event, LedgerEntry, Money, Order, OrderDraft, OrderId,
    OrderStatus, Role, TrackingNumber, Transition, ZoneId,
};
use courier_engine::{plan_transition, SkippedPosting};
use courier_store::{Changeset, OrderFilter, Store};

use crate::error::{BatchItemError, ExecError, ExecResult};
use crate::ledger::{stage_settlement, Reversal};
use crate::locks::{KeyGuard, KeyedLocks};
use crate::ports::{Notification, Notifier, PricingOracle};

/// Attempts at drawing an unused tracking number before giving up.
const MAX_TRACKING_ATTEMPTS: usize = 8;

// =============================================================================
// Requests & Reports
// =============================================================================

/// Editable order fields; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderChanges {
    /// New trader
    #[serde(default)]
    pub trader: Option<AccountId>,
    /// New delivery zone
    #[serde(default)]
    pub delivery_zone: Option<ZoneId>,
    /// New product cost
    #[serde(default)]
    pub product_cost: Option<Money>,
    /// New extra delivery cost
    #[serde(default)]
    pub extra_delivery_cost: Option<Money>,
    /// New reference code
    #[serde(default)]
    pub reference_code: Option<String>,
    /// New notes
    #[serde(default)]
    pub notes: Option<String>,
}

/// What a committed transition did to the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionReport {
    /// Order after the transition
    pub order: Order,
    /// Transition applied
    pub transition: Transition,
    /// Entries written
    pub posted: Vec<LedgerEntry>,
    /// Postings skipped because an active entry already covered them
    pub skipped: Vec<SkippedPosting>,
    /// Entries rolled back (reopen)
    pub reversed: Vec<Reversal>,
}

/// Per-order confirmation of a bulk assignment or acceptance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentConfirmation {
    /// Order
    pub order_id: OrderId,
    /// Tracking number
    pub tracking_number: TrackingNumber,
    /// Reference code
    pub reference_code: String,
    /// Assigned driver
    pub driver: AccountId,
    /// Status after assignment
    pub status: OrderStatus,
}

impl AssignmentConfirmation {
    fn from_order(order: &Order, driver: AccountId) -> Self {
        Self {
            order_id: order.id,
            tracking_number: order.tracking_number.clone(),
            reference_code: order.reference_code.clone(),
            driver,
            status: order.status,
        }
    }
}

/// Order locked for the duration of an operation
struct LockedOrder {
    order: Order,
    _guard: KeyGuard,
}

// =============================================================================
// Order Service
// =============================================================================

/// Order lifecycle operations.
pub struct OrderService<S: Store> {
    store: Arc<S>,
    pricing: Arc<dyn PricingOracle>,
    notifier: Arc<dyn Notifier>,
    locks: Arc<KeyedLocks>,
}

impl<S: Store> OrderService<S> {
    /// Create a new order service.
    pub fn new(
        store: Arc<S>,
        pricing: Arc<dyn PricingOracle>,
        notifier: Arc<dyn Notifier>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            store,
            pricing,
            notifier,
            locks,
        }
    }

    // -------------------------------------------------------------------------
    // Creation & queries
    // -------------------------------------------------------------------------

    /// Register a new order.
    ///
    /// Snapshots the zone delivery cost and the trader/zone price, draws a
    /// fresh tracking number and starts in CREATED (ASSIGNED with a driver).
    ///
    /// # Errors
    /// - `PricingNotFound` if the zone has no delivery cost or the trader
    ///   does not serve it
    /// - `RoleMismatch` / `AccountDeleted` / `NotFound` for bad relations
    pub async fn create(&self, draft: OrderDraft, actor: Option<&str>) -> ExecResult<Order> {
        if draft.reference_code.trim().is_empty() {
            return Err(DomainError::InvalidValue("reference code must not be empty".into()).into());
        }
        self.active_account(draft.trader, Role::Trader).await?;
        if let Some(driver) = draft.driver {
            self.active_account(driver, Role::Driver).await?;
        }

        let (delivery_cost, trader_merchant_cost) =
            self.snapshot_prices(draft.trader, draft.delivery_zone).await?;
        let tracking_number = self.fresh_tracking_number().await?;

        let order = Order::new(draft, tracking_number, delivery_cost, trader_merchant_cost);

        let mut changeset = Changeset::new();
        changeset.insert_order(&order).emit(Event::OrderCreated {
            order_id: order.id,
            tracking_number: order.tracking_number.clone(),
            status: order.status,
            timestamp: order.created_at,
        });
        if let Some(driver) = order.driver {
            changeset.emit(Event::DriverAssigned {
                order_id: order.id,
                driver,
                timestamp: order.created_at,
            });
        }
        self.store.commit(changeset).await.map_err(ExecError::from_commit)?;

        info!(
            order_id = %order.id,
            tracking_number = %order.tracking_number,
            status = %order.status,
            delivery_cost = %order.delivery_cost,
            trader_merchant_cost = %order.trader_merchant_cost,
            actor = actor.unwrap_or("-"),
            "Order created"
        );

        if let Some(driver) = order.driver {
            self.notify_all(vec![assignment_notification(&order, driver)]).await;
        }
        Ok(order)
    }

    /// Look up a live order by tracking number.
    pub async fn get(&self, tracking_number: &TrackingNumber) -> ExecResult<Order> {
        self.store
            .orders()
            .find_by_tracking(tracking_number)
            .await?
            .ok_or_else(|| ExecError::not_found("order", tracking_number))
    }

    /// List orders for reporting and export.
    pub async fn list(&self, filter: &OrderFilter) -> ExecResult<Vec<Order>> {
        Ok(self.store.orders().list(filter).await?)
    }

    /// Audit trail of an order.
    pub async fn history(&self, order_id: OrderId) -> ExecResult<Vec<Event>> {
        Ok(self.store.events().find_by_order(order_id).await?)
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// Move an order to `new_status` and settle the transition.
    ///
    /// Leaving DELIVERED, POSTPONED or CANCELLED for ASSIGNED or IN_PROGRESS
    /// reverses every active entry of the order first. Re-saving the
    /// current status posts nothing that is already posted.
    ///
    /// # Errors
    /// - `InvalidTransition`, `MissingTrader`, `DriverRequired`
    pub async fn update_status(
        &self,
        tracking_number: &TrackingNumber,
        new_status: OrderStatus,
        actor: Option<&str>,
    ) -> ExecResult<TransitionReport> {
        let LockedOrder { mut order, _guard } = self.lock_order(tracking_number).await?;

        let transition = order.transition_to(new_status)?;
        let mut changeset = Changeset::new();
        let report = self.settle(&mut order, transition, actor, &mut changeset).await?;
        self.store.commit(changeset).await.map_err(ExecError::from_commit)?;

        log_report(&report, actor);

        let notify_trader = !transition.is_resave() && new_status.holds_settlement();
        if let Some(trader) = report.order.trader.filter(|_| notify_trader) {
            self.notify_all(vec![Notification::new(
                trader,
                format!("Order {}", new_status),
                format!("Order {} is now {}", report.order.tracking_number, new_status),
            )])
            .await;
        }
        Ok(report)
    }

    /// Edit non-status fields of an order.
    ///
    /// Changing the trader or the zone re-checks the pricing oracle and
    /// re-snapshots both prices.
    ///
    /// # Errors
    /// - `OrderSettled` for DELIVERED and CANCELLED orders, and for a
    ///   trader or zone change while settlement entries are active
    /// - `PricingNotFound` if the new trader/zone pair has no price
    pub async fn update_details(
        &self,
        tracking_number: &TrackingNumber,
        changes: OrderChanges,
    ) -> ExecResult<Order> {
        let LockedOrder { mut order, _guard } = self.lock_order(tracking_number).await?;
        order.ensure_editable()?;

        let trader_changed = changes.trader.is_some_and(|t| order.trader != Some(t));
        let zone_changed = changes.delivery_zone.is_some_and(|z| order.delivery_zone != z);

        // Active charges were computed from the snapshotted prices
        if trader_changed || zone_changed {
            let entries = self.store.ledger().find_by_order(order.id).await?;
            if entries.iter().any(LedgerEntry::is_active) {
                return Err(DomainError::OrderSettled {
                    tracking_number: order.tracking_number.to_string(),
                    status: order.status,
                }
                .into());
            }
        }

        if let Some(trader) = changes.trader {
            self.active_account(trader, Role::Trader).await?;
            order.trader = Some(trader);
        }
        if let Some(zone) = changes.delivery_zone {
            order.delivery_zone = zone;
        }
        if trader_changed || zone_changed {
            let trader = order
                .trader
                .ok_or(DomainError::MissingTrader {
                    status: order.status,
                })?;
            let (delivery_cost, tmc) = self.snapshot_prices(trader, order.delivery_zone).await?;
            order.delivery_cost = delivery_cost;
            order.trader_merchant_cost = tmc;
        }
        if let Some(cost) = changes.product_cost {
            order.product_cost = cost;
        }
        if let Some(cost) = changes.extra_delivery_cost {
            order.extra_delivery_cost = cost;
        }
        if let Some(reference_code) = changes.reference_code {
            if reference_code.trim().is_empty() {
                return Err(
                    DomainError::InvalidValue("reference code must not be empty".into()).into()
                );
            }
            order.reference_code = reference_code;
        }
        if let Some(notes) = changes.notes {
            order.notes = Some(notes);
        }
        order.updated_at = Utc::now();

        let mut changeset = Changeset::new();
        changeset.update_order(&mut order);
        self.store.commit(changeset).await.map_err(ExecError::from_commit)?;

        info!(
            order_id = %order.id,
            tracking_number = %order.tracking_number,
            repriced = trader_changed || zone_changed,
            "Order details updated"
        );
        Ok(order)
    }

    /// Soft-delete an order with no active ledger entries.
    pub async fn delete_order(&self, tracking_number: &TrackingNumber) -> ExecResult<Order> {
        let LockedOrder { mut order, _guard } = self.lock_order(tracking_number).await?;

        let active = self
            .store
            .ledger()
            .find_by_order(order.id)
            .await?
            .into_iter()
            .filter(LedgerEntry::is_active)
            .count();
        if active > 0 {
            return Err(ExecError::NonZeroBalanceDeletion {
                entity_type: "order",
                id: order.tracking_number.to_string(),
                reason: format!("{} active ledger entries reference it", active),
            });
        }

        order.mark_deleted();
        let mut changeset = Changeset::new();
        changeset
            .update_order(&mut order)
            .emit(Event::OrderDeleted {
                order_id: order.id,
                timestamp: Utc::now(),
            });
        self.store.commit(changeset).await.map_err(ExecError::from_commit)?;

        info!(order_id = %order.id, tracking_number = %order.tracking_number, "Order deleted");
        Ok(order)
    }

    // -------------------------------------------------------------------------
    // Assignment & acceptance
    // -------------------------------------------------------------------------

    /// Office assigns a driver to one order.
    ///
    /// # Errors
    /// - `AlreadyAssigned` if a driver is set or the order is DELIVERED,
    ///   CANCELLED or ASSIGNED
    pub async fn assign_driver(
        &self,
        tracking_number: &TrackingNumber,
        driver: AccountId,
    ) -> ExecResult<TransitionReport> {
        self.active_account(driver, Role::Driver).await?;
        let LockedOrder { mut order, _guard } = self.lock_order(tracking_number).await?;

        let transition = order.assign_driver(driver)?;
        let mut changeset = Changeset::new();
        let report = self.settle(&mut order, transition, None, &mut changeset).await?;
        changeset.emit(Event::DriverAssigned {
            order_id: order.id,
            driver,
            timestamp: Utc::now(),
        });
        self.store.commit(changeset).await.map_err(ExecError::from_commit)?;

        log_report(&report, None);
        self.notify_all(vec![assignment_notification(&report.order, driver)]).await;
        Ok(report)
    }

    /// Office assigns a driver to several orders, all or nothing.
    ///
    /// # Errors
    /// - `BatchValidation` listing every tracking number that is malformed,
    ///   unknown or not assignable; nothing is written
    pub async fn bulk_assign_driver(
        &self,
        tracking_numbers: &[String],
        driver: AccountId,
    ) -> ExecResult<Vec<AssignmentConfirmation>> {
        self.active_account(driver, Role::Driver).await?;

        let mut errors = Vec::new();
        let mut candidates = Vec::new();
        for raw in dedup(tracking_numbers) {
            let found = match TrackingNumber::parse(raw) {
                Ok(tracking) => self.store.orders().find_by_tracking(&tracking).await?,
                Err(e) => {
                    errors.push(BatchItemError::new(raw, &e.into()));
                    continue;
                }
            };
            match found {
                Some(order) => candidates.push((raw.to_string(), order.id)),
                None => errors.push(BatchItemError::new(raw, &ExecError::not_found("order", raw))),
            }
        }

        self.assign_batch(candidates, errors, driver, |order, driver| order.assign_driver(driver))
            .await
    }

    /// Driver self-assigns orders by reference code, all or nothing.
    ///
    /// # Errors
    /// - `BatchValidation` listing every reference that is unknown,
    ///   ambiguous, held by another driver or not open for acceptance
    pub async fn accept_orders(
        &self,
        reference_codes: &[String],
        driver: AccountId,
    ) -> ExecResult<Vec<AssignmentConfirmation>> {
        self.active_account(driver, Role::Driver).await?;

        let mut errors = Vec::new();
        let mut candidates = Vec::new();
        for code in dedup(reference_codes) {
            let matches = self.store.orders().find_by_reference(code).await?;
            match matches.as_slice() {
                [] => errors.push(BatchItemError::new(code, &ExecError::not_found("order", code))),
                [order] => candidates.push((code.to_string(), order.id)),
                many => errors.push(BatchItemError {
                    item: code.to_string(),
                    code: "ambiguous_reference".to_string(),
                    message: format!("{} orders share reference code {}", many.len(), code),
                }),
            }
        }

        self.assign_batch(candidates, errors, driver, |order, driver| order.accept_by(driver))
            .await
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Lock the candidates, validate each under the lock, then commit every
    /// assignment in one changeset if no item failed.
    async fn assign_batch<F>(
        &self,
        candidates: Vec<(String, OrderId)>,
        mut errors: Vec<BatchItemError>,
        driver: AccountId,
        assign: F,
    ) -> ExecResult<Vec<AssignmentConfirmation>>
    where
        F: Fn(&mut Order, AccountId) -> Result<Transition, DomainError>,
    {
        let _guards = self.locks.lock_many(candidates.iter().map(|(_, id)| *id)).await;

        let mut assigned = Vec::with_capacity(candidates.len());
        for (item, order_id) in candidates {
            let order = match self.store.orders().find_by_id(order_id).await? {
                Some(order) if !order.is_deleted() => order,
                _ => {
                    errors.push(BatchItemError::new(&item, &ExecError::not_found("order", &item)));
                    continue;
                }
            };

            let mut updated = order;
            match assign(&mut updated, driver) {
                Ok(transition) => assigned.push((updated, transition)),
                Err(e) => errors.push(BatchItemError::new(&item, &e.into())),
            }
        }

        if !errors.is_empty() {
            warn!(%driver, failed = errors.len(), "Batch assignment rejected");
            return Err(ExecError::BatchValidation(errors));
        }

        let mut changeset = Changeset::new();
        let mut confirmations = Vec::with_capacity(assigned.len());
        let mut notifications = Vec::with_capacity(assigned.len());
        for (mut order, transition) in assigned {
            let report = self.settle(&mut order, transition, None, &mut changeset).await?;
            changeset.emit(Event::DriverAssigned {
                order_id: order.id,
                driver,
                timestamp: Utc::now(),
            });
            confirmations.push(AssignmentConfirmation::from_order(&report.order, driver));
            notifications.push(assignment_notification(&report.order, driver));
        }
        self.store.commit(changeset).await.map_err(ExecError::from_commit)?;

        info!(%driver, orders = confirmations.len(), "Batch assignment committed");
        self.notify_all(notifications).await;
        Ok(confirmations)
    }

    /// Stage the order write and its settlement into `changeset`.
    async fn settle(
        &self,
        order: &mut Order,
        transition: Transition,
        actor: Option<&str>,
        changeset: &mut Changeset,
    ) -> ExecResult<TransitionReport> {
        let entries = self.store.ledger().find_by_order(order.id).await?;
        let plan = plan_transition(order, transition, &entries)?;

        changeset.update_order(order).emit(Event::StatusChanged {
            order_id: order.id,
            from: transition.from,
            to: transition.to,
            actor: actor.map(str::to_string),
            timestamp: order.updated_at,
        });
        let staged = stage_settlement(changeset, &plan)?;

        Ok(TransitionReport {
            order: order.clone(),
            transition,
            posted: staged.posted,
            skipped: plan.skipped,
            reversed: staged.reversed,
        })
    }

    async fn lock_order(&self, tracking_number: &TrackingNumber) -> ExecResult<LockedOrder> {
        let order_id = self.get(tracking_number).await?.id;
        let guard = self.locks.lock(order_id).await;

        // Re-read under the lock
        match self.store.orders().find_by_id(order_id).await? {
            Some(order) if !order.is_deleted() => Ok(LockedOrder {
                order,
                _guard: guard,
            }),
            _ => Err(ExecError::not_found("order", tracking_number)),
        }
    }

    async fn active_account(&self, account_id: AccountId, role: Role) -> ExecResult<Account> {
        let account = self
            .store
            .accounts()
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| ExecError::not_found("account", account_id))?;
        account.ensure_active_role(role)?;
        Ok(account)
    }

    async fn snapshot_prices(&self, trader: AccountId, zone: ZoneId) -> ExecResult<(Money, Money)> {
        let delivery_cost = self.pricing.delivery_cost(zone).await?;
        let trader_price = self.pricing.trader_price(trader, zone).await?;
        match (delivery_cost, trader_price) {
            (Some(delivery_cost), Some(trader_price)) => Ok((delivery_cost, trader_price)),
            _ => Err(ExecError::PricingNotFound { trader, zone }),
        }
    }

    async fn fresh_tracking_number(&self) -> ExecResult<TrackingNumber> {
        for _ in 0..MAX_TRACKING_ATTEMPTS {
            let candidate = TrackingNumber::generate();
            if !self.store.orders().tracking_exists(&candidate).await? {
                return Ok(candidate);
            }
        }
        Err(courier_store::StoreError::duplicate("tracking_number", "exhausted attempts").into())
    }

    async fn notify_all(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            let account_id = notification.account_id;
            if let Err(e) = self.notifier.notify(notification).await {
                warn!(%account_id, error = %e, "Notification failed");
            }
        }
    }
}

fn assignment_notification(order: &Order, driver: AccountId) -> Notification {
    Notification::new(
        driver,
        "New order assigned",
        format!(
            "Order {} ({}) has been assigned to you",
            order.tracking_number, order.reference_code
        ),
    )
}

fn log_report(report: &TransitionReport, actor: Option<&str>) {
    info!(
        order_id = %report.order.id,
        tracking_number = %report.order.tracking_number,
        transition = %report.transition,
        posted = report.posted.len(),
        skipped = report.skipped.len(),
        reversed = report.reversed.len(),
        actor = actor.unwrap_or("-"),
        "Order transition committed"
    );
}

/// Input items in order, duplicates dropped
fn dedup(items: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    items.iter().map(|s| s.trim()).filter(|s| seen.insert(*s)).collect()
}
