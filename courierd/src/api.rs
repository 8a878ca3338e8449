//! HTTP API for the courier daemon.
//!
//! Provides REST endpoints for:
//! - Health check and metrics
//! - Accounts (create, read, delete, entries, balance check)
//! - Orders (create, read, edit, delete, status, assignment, acceptance)
//! - Ledger entries (post, read, reverse)
//!
//! Errors render as `{ "code", "message", "items"? }`.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use courier_domain::{
    Account, AccountId, Direction, DomainError, Event, LedgerEntry, Money, Order, OrderDraft,
    OrderId, OrderStatus, Role, TrackingNumber,
};
use courier_exec::{
    AssignmentConfirmation, BalanceCheck, BatchItemError, ExecError, LedgerService, NewAccount,
    OrderChanges, OrderService, PostOutcome, PostRequest, Reversal, TransitionReport,
};
use courier_store::{OrderFilter, Store};

use crate::metrics::Metrics;

/// Header carrying the acting user, recorded in logs and events only
pub const ACTOR_HEADER: &str = "x-actor";

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState<S: Store + 'static> {
    pub orders: Arc<OrderService<S>>,
    pub ledger: Arc<LedgerService<S>>,
    pub metrics: Arc<Metrics>,
}

impl<S: Store + 'static> ApiState<S> {
    fn error(&self, err: ExecError) -> ApiError {
        let error = ApiError::from(err);
        self.metrics.record_error(&error.body.code);
        error
    }

    fn tracking(&self, raw: &str) -> Result<TrackingNumber, ApiError> {
        TrackingNumber::parse(raw).map_err(|e| self.error(e.into()))
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<BatchItemError>>,
}

/// Account listing filter.
#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub role: Option<Role>,
}

/// Order listing filter.
#[derive(Debug, Deserialize)]
pub struct OrderQuery {
    pub trader: Option<AccountId>,
    pub driver: Option<AccountId>,
    pub status: Option<OrderStatus>,
    #[serde(default)]
    pub include_deleted: bool,
}

impl From<OrderQuery> for OrderFilter {
    fn from(query: OrderQuery) -> Self {
        OrderFilter {
            trader: query.trader,
            driver: query.driver,
            status: query.status,
            include_deleted: query.include_deleted,
        }
    }
}

/// Request to change an order's status.
#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: OrderStatus,
}

/// Request to assign a driver to one order.
#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub driver: AccountId,
}

/// Request to assign a driver to several orders.
#[derive(Debug, Deserialize)]
pub struct BulkAssignRequest {
    pub driver: AccountId,
    pub tracking_numbers: Vec<String>,
}

/// Driver self-assignment by reference codes.
#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub driver: AccountId,
    pub reference_codes: Vec<String>,
}

/// Request to post a ledger entry.
///
/// Without `order_id` the entry is a manual one. With it, `role` is
/// required and `idempotent` skips the post when an active entry with the
/// same (order, role, direction) exists.
#[derive(Debug, Deserialize)]
pub struct PostEntryRequest {
    pub account_id: AccountId,
    pub amount: Money,
    pub direction: Direction,
    #[serde(default)]
    pub order_id: Option<OrderId>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub idempotent: bool,
}

// =============================================================================
// Errors
// =============================================================================

/// An error rendered as JSON with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl From<ExecError> for ApiError {
    fn from(err: ExecError) -> Self {
        let code = err.code();
        let status = status_for(code);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(%code, error = %err, "Request failed");
        }

        let items = match err.items() {
            [] => None,
            items => Some(items.to_vec()),
        };

        Self {
            status,
            body: ErrorResponse {
                code: code.to_string(),
                message: err.to_string(),
                items,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// HTTP status for a machine error code.
pub fn status_for(code: &str) -> StatusCode {
    match code {
        "not_found" => StatusCode::NOT_FOUND,
        "invalid_tracking_number" | "invalid_value" | "invalid_amount" => StatusCode::BAD_REQUEST,
        "pricing_not_found" | "role_mismatch" | "account_deleted" | "missing_trader"
        | "driver_required" => StatusCode::UNPROCESSABLE_ENTITY,
        "invalid_transition" | "already_assigned" | "order_settled" | "batch_validation"
        | "non_zero_balance_deletion" | "insufficient_balance" | "already_rolled_back"
        | "conflict" | "duplicate" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router<S: Store + 'static>(state: Arc<ApiState<S>>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler::<S>))
        .route("/accounts", post(create_account_handler::<S>).get(list_accounts_handler::<S>))
        .route("/accounts/:id", get(get_account_handler::<S>).delete(delete_account_handler::<S>))
        .route("/accounts/:id/entries", get(account_entries_handler::<S>))
        .route("/accounts/:id/balance-check", get(balance_check_handler::<S>))
        .route("/orders", post(create_order_handler::<S>).get(list_orders_handler::<S>))
        .route("/orders/bulk-assign", post(bulk_assign_handler::<S>))
        .route("/orders/accept", post(accept_handler::<S>))
        .route(
            "/orders/:tracking",
            get(get_order_handler::<S>)
                .patch(update_order_handler::<S>)
                .delete(delete_order_handler::<S>),
        )
        .route("/orders/:tracking/status", post(update_status_handler::<S>))
        .route("/orders/:tracking/assign", post(assign_handler::<S>))
        .route("/orders/:tracking/history", get(order_history_handler::<S>))
        .route("/orders/:tracking/entries", get(order_entries_handler::<S>))
        .route("/ledger/entries", post(post_entry_handler::<S>))
        .route("/ledger/entries/:id", get(get_entry_handler::<S>))
        .route("/ledger/entries/:id/reverse", post(reverse_entry_handler::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn actor(headers: &HeaderMap) -> Option<&str> {
    headers.get(ACTOR_HEADER).and_then(|v| v.to_str().ok())
}

// =============================================================================
// Handlers: health & metrics
// =============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn metrics_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
) -> Result<Response, StatusCode> {
    let text = state.metrics.render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response())
}

// =============================================================================
// Handlers: accounts
// =============================================================================

async fn create_account_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Json(req): Json<NewAccount>,
) -> ApiResult<(StatusCode, Json<Account>)> {
    let account = state.ledger.create_account(req).await.map_err(|e| state.error(e))?;
    Ok((StatusCode::CREATED, Json(account)))
}

async fn list_accounts_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Query(query): Query<AccountQuery>,
) -> ApiResult<Json<Vec<Account>>> {
    let accounts = state.ledger.list_accounts(query.role).await.map_err(|e| state.error(e))?;
    Ok(Json(accounts))
}

async fn get_account_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Account>> {
    let account = state.ledger.get_account(id).await.map_err(|e| state.error(e))?;
    Ok(Json(account))
}

async fn delete_account_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Account>> {
    let account = state.ledger.delete_account(id).await.map_err(|e| state.error(e))?;
    Ok(Json(account))
}

async fn account_entries_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LedgerEntry>>> {
    let entries = state.ledger.entries_for_account(id).await.map_err(|e| state.error(e))?;
    Ok(Json(entries))
}

async fn balance_check_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BalanceCheck>> {
    let check = state.ledger.verify_balance(id).await.map_err(|e| state.error(e))?;
    Ok(Json(check))
}

// =============================================================================
// Handlers: orders
// =============================================================================

async fn create_order_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    headers: HeaderMap,
    Json(draft): Json<OrderDraft>,
) -> ApiResult<(StatusCode, Json<Order>)> {
    let order = state.orders.create(draft, actor(&headers)).await.map_err(|e| state.error(e))?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Query(query): Query<OrderQuery>,
) -> ApiResult<Json<Vec<Order>>> {
    let orders = state.orders.list(&query.into()).await.map_err(|e| state.error(e))?;
    Ok(Json(orders))
}

async fn get_order_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Path(tracking): Path<String>,
) -> ApiResult<Json<Order>> {
    let tracking = state.tracking(&tracking)?;
    let order = state.orders.get(&tracking).await.map_err(|e| state.error(e))?;
    Ok(Json(order))
}

async fn update_order_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Path(tracking): Path<String>,
    Json(changes): Json<OrderChanges>,
) -> ApiResult<Json<Order>> {
    let tracking = state.tracking(&tracking)?;
    let order =
        state.orders.update_details(&tracking, changes).await.map_err(|e| state.error(e))?;
    Ok(Json(order))
}

async fn delete_order_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Path(tracking): Path<String>,
) -> ApiResult<StatusCode> {
    let tracking = state.tracking(&tracking)?;
    state.orders.delete_order(&tracking).await.map_err(|e| state.error(e))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn update_status_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Path(tracking): Path<String>,
    headers: HeaderMap,
    Json(req): Json<StatusRequest>,
) -> ApiResult<Json<TransitionReport>> {
    let tracking = state.tracking(&tracking)?;
    let report = state
        .orders
        .update_status(&tracking, req.status, actor(&headers))
        .await
        .map_err(|e| state.error(e))?;

    state.metrics.record_transition(&report);
    Ok(Json(report))
}

async fn assign_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Path(tracking): Path<String>,
    Json(req): Json<AssignRequest>,
) -> ApiResult<Json<TransitionReport>> {
    let tracking = state.tracking(&tracking)?;
    let report =
        state.orders.assign_driver(&tracking, req.driver).await.map_err(|e| state.error(e))?;

    state.metrics.record_transition(&report);
    Ok(Json(report))
}

async fn bulk_assign_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Json(req): Json<BulkAssignRequest>,
) -> ApiResult<Json<Vec<AssignmentConfirmation>>> {
    let confirmations = state
        .orders
        .bulk_assign_driver(&req.tracking_numbers, req.driver)
        .await
        .map_err(|e| state.error(e))?;
    Ok(Json(confirmations))
}

async fn accept_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Json(req): Json<AcceptRequest>,
) -> ApiResult<Json<Vec<AssignmentConfirmation>>> {
    let confirmations = state
        .orders
        .accept_orders(&req.reference_codes, req.driver)
        .await
        .map_err(|e| state.error(e))?;
    Ok(Json(confirmations))
}

async fn order_history_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Path(tracking): Path<String>,
) -> ApiResult<Json<Vec<Event>>> {
    let tracking = state.tracking(&tracking)?;
    let order = state.orders.get(&tracking).await.map_err(|e| state.error(e))?;
    let history = state.orders.history(order.id).await.map_err(|e| state.error(e))?;
    Ok(Json(history))
}

async fn order_entries_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Path(tracking): Path<String>,
) -> ApiResult<Json<Vec<LedgerEntry>>> {
    let tracking = state.tracking(&tracking)?;
    let order = state.orders.get(&tracking).await.map_err(|e| state.error(e))?;
    let entries = state.ledger.entries_for_order(order.id).await.map_err(|e| state.error(e))?;
    Ok(Json(entries))
}

// =============================================================================
// Handlers: ledger
// =============================================================================

async fn post_entry_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Json(req): Json<PostEntryRequest>,
) -> ApiResult<(StatusCode, Json<PostOutcome>)> {
    let order = match (req.order_id, req.role) {
        (Some(order_id), Some(role)) => Some((order_id, role)),
        (None, _) => None,
        (Some(_), None) => {
            let err = DomainError::InvalidValue("role is required with order_id".to_string());
            return Err(state.error(err.into()));
        }
    };

    let outcome = match order {
        None => {
            let entry = state
                .ledger
                .create_manual(req.account_id, req.amount, req.direction, req.notes)
                .await
                .map_err(|e| state.error(e))?;
            PostOutcome::Posted { entry }
        }
        Some(order) => {
            let request = PostRequest {
                account_id: req.account_id,
                amount: req.amount,
                direction: req.direction,
                order: Some(order),
                notes: req.notes,
            };
            if req.idempotent {
                state.ledger.post_if_absent(request).await.map_err(|e| state.error(e))?
            } else {
                let entry = state.ledger.post(request).await.map_err(|e| state.error(e))?;
                PostOutcome::Posted { entry }
            }
        }
    };

    let status = if outcome.is_skipped() { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(outcome)))
}

async fn get_entry_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<LedgerEntry>> {
    let entry = state.ledger.get_entry(id).await.map_err(|e| state.error(e))?;
    Ok(Json(entry))
}

async fn reverse_entry_handler<S: Store + 'static>(
    State(state): State<Arc<ApiState<S>>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Reversal>> {
    let reversal = state.ledger.reverse(id).await.map_err(|e| state.error(e))?;
    state.metrics.reversals_total.inc();
    Ok(Json(reversal))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for("not_found"), StatusCode::NOT_FOUND);
        assert_eq!(status_for("invalid_transition"), StatusCode::CONFLICT);
        assert_eq!(status_for("batch_validation"), StatusCode::CONFLICT);
        assert_eq!(status_for("pricing_not_found"), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for("invalid_tracking_number"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("store_error"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_batch_error_carries_items() {
        let item = BatchItemError {
            item: "REF-1".to_string(),
            code: "not_found".to_string(),
            message: "order not found: REF-1".to_string(),
        };
        let error = ApiError::from(ExecError::BatchValidation(vec![item.clone()]));

        assert_eq!(error.status, StatusCode::CONFLICT);
        assert_eq!(error.body.code, "batch_validation");
        assert_eq!(error.body.items, Some(vec![item]));
    }

    #[test]
    fn test_single_error_has_no_items() {
        let error = ApiError::from(ExecError::not_found("order", "TRK000000000000"));
        assert_eq!(error.status, StatusCode::NOT_FOUND);
        assert!(error.body.items.is_none());
    }
}
