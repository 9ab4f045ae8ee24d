//! HTTP API handlers.
//!
//! Every `/api` response carries rate-limit headers; validation failures
//! answer 400 with the structured error vocabulary, rule conflicts 409,
//! risk and routing rejections 422.

use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use fxgate_core::{
    AccountId, ErrorKind, OrderSide, OrderType, Price, Qty, QuoteSnapshot, Symbol, TimeInForce,
};
use fxgate_exec::{CancelOutcome, OrderRequest, PlaceOutcome};
use fxgate_rules::{RuleSpec, RuleStoreError};
use fxgate_store::StoreError;

use crate::server::AppState;

/// 400/401/409/422/429 with the stable error JSON.
fn error_response(kind: ErrorKind) -> Response {
    let status = StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
    (status, Json(kind)).into_response()
}

// ============================================================================
// Rate limiting middleware
// ============================================================================

pub async fn rate_limit_mw(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let key = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
        .unwrap_or_else(|| "direct".to_string());

    let decision = state.limiter.check(&key);

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        let mut response = error_response(ErrorKind::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
        if let Ok(value) = HeaderValue::from_str(&decision.retry_after_secs.to_string()) {
            response.headers_mut().insert("Retry-After", value);
        }
        response
    };

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.reset_secs.to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
    response
}

// ============================================================================
// History
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub symbol: String,
    pub date: String,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(1_000);
    match state.store.get_range(&query.symbol, &query.date, offset, limit) {
        Ok(ticks) => Json(ticks).into_response(),
        Err(StoreError::InvalidSymbol(_)) => error_response(ErrorKind::ValidationInvalid {
            field: "symbol".to_string(),
        }),
        Err(StoreError::InvalidDate(_)) => error_response(ErrorKind::ValidationInvalid {
            field: "date".to_string(),
        }),
        Err(e) => {
            warn!(?e, "History read failed");
            error_response(ErrorKind::StorageBusy)
        }
    }
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Serialize)]
struct PlacedResponse {
    order: fxgate_core::Order,
    audit_id: String,
}

pub async fn post_order(State(state): State<AppState>, Json(request): Json<OrderRequest>) -> Response {
    match state.engine.place(request).await {
        Ok(PlaceOutcome::Accepted { order, audit_id }) => {
            Json(PlacedResponse { order, audit_id }).into_response()
        }
        Ok(PlaceOutcome::RiskRejected { reason, .. }) => error_response(ErrorKind::RiskRejected {
            reason: reason.to_string(),
        }),
        Ok(PlaceOutcome::RoutingRejected { causes, .. }) => {
            error_response(ErrorKind::RoutingNoLiquidity { causes })
        }
        Err(e) => {
            warn!(?e, "Order placement failed");
            error_response(ErrorKind::SessionTransient)
        }
    }
}

pub async fn delete_order(State(state): State<AppState>, Path(order_id): Path<String>) -> Response {
    match state.engine.cancel(&order_id).await {
        Ok(CancelOutcome::Requested) => StatusCode::ACCEPTED.into_response(),
        Ok(CancelOutcome::TooLate) => {
            (StatusCode::CONFLICT, Json(serde_json::json!({"result": "too_late"})))
                .into_response()
        }
        Ok(CancelOutcome::AlreadyTerminal) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"result": "already_terminal"})),
        )
            .into_response(),
        Ok(CancelOutcome::Unknown) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(?e, "Cancel failed");
            error_response(ErrorKind::SessionTransient)
        }
    }
}

// ============================================================================
// Routing preview
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Qty,
    pub account_id: String,
    #[serde(default)]
    pub px: Option<Price>,
}

pub async fn get_preview(
    State(state): State<AppState>,
    Query(query): Query<PreviewQuery>,
) -> Response {
    let Ok(symbol) = Symbol::parse(&query.symbol) else {
        return error_response(ErrorKind::ValidationInvalid {
            field: "symbol".to_string(),
        });
    };
    if !query.qty.is_positive() {
        return error_response(ErrorKind::ValidationInvalid {
            field: "qty".to_string(),
        });
    }

    let order = fxgate_core::Order::new(
        fxgate_core::ClientId::new("preview"),
        AccountId::new(query.account_id.clone()),
        symbol.clone(),
        query.side,
        query.qty,
        if query.px.is_some() {
            OrderType::Limit
        } else {
            OrderType::Market
        },
        TimeInForce::ImmediateOrCancel,
        query.px,
        None,
    );
    let profile = state.engine.profile_for(&order.account_id);
    let snapshot = state
        .quotes
        .snapshot(&symbol)
        .unwrap_or_else(|| QuoteSnapshot::empty(symbol));

    let decision = state.router.preview(&order, &profile, &snapshot);
    Json(decision).into_response()
}

// ============================================================================
// Routing rules
// ============================================================================

pub async fn list_rules(State(state): State<AppState>) -> Response {
    match state.rules.list() {
        Ok(rules) => Json(rules).into_response(),
        Err(e) => {
            warn!(?e, "Rule list failed");
            error_response(ErrorKind::StorageBusy)
        }
    }
}

fn rule_error(e: RuleStoreError) -> Response {
    match e {
        RuleStoreError::Conflict { conflicting_id } => {
            error_response(ErrorKind::RuleConflict { conflicting_id })
        }
        RuleStoreError::NotFound(_) => StatusCode::NOT_FOUND.into_response(),
        RuleStoreError::InvalidRule(detail) => {
            error_response(ErrorKind::ValidationInvalid { field: detail })
        }
        RuleStoreError::ReorderMismatch(detail) => {
            error_response(ErrorKind::ValidationInvalid { field: detail })
        }
        other => {
            warn!(?other, "Rule store failure");
            error_response(ErrorKind::StorageBusy)
        }
    }
}

pub async fn create_rule(State(state): State<AppState>, Json(spec): Json<RuleSpec>) -> Response {
    match state.rules.create(&spec) {
        Ok(rule) => (StatusCode::CREATED, Json(rule)).into_response(),
        Err(e) => rule_error(e),
    }
}

pub async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(spec): Json<RuleSpec>,
) -> Response {
    match state.rules.update(id, &spec) {
        Ok(rule) => Json(rule).into_response(),
        Err(e) => rule_error(e),
    }
}

pub async fn delete_rule(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match state.rules.delete(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => rule_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub ids: Vec<i64>,
}

pub async fn reorder_rules(
    State(state): State<AppState>,
    Json(request): Json<ReorderRequest>,
) -> Response {
    match state.rules.reorder(&request.ids) {
        Ok(()) => Json(state.rules.snapshot().as_ref().clone()).into_response(),
        Err(e) => rule_error(e),
    }
}

// ============================================================================
// Status and metrics
// ============================================================================

#[derive(Serialize)]
struct StatusResponse {
    hub: crate::hub::HubStats,
    store: StoreStatus,
    kill_switch_global: bool,
    killed_accounts: Vec<KilledAccount>,
    live_orders: usize,
    lp_health: Vec<fxgate_health::LpHealth>,
    disabled_symbols: Vec<Symbol>,
}

#[derive(Serialize)]
struct StoreStatus {
    backend: &'static str,
    ticks_written: u64,
    ticks_lost: u64,
    batch_failures: u64,
    consecutive_errors: u64,
}

#[derive(Serialize)]
struct KilledAccount {
    account_id: AccountId,
    reason: String,
}

pub async fn get_status(State(state): State<AppState>) -> Response {
    let stats = state.store.stats();
    let status = StatusResponse {
        hub: state.hub.stats(),
        store: StoreStatus {
            backend: state.store.backend_name(),
            ticks_written: stats.ticks_written(),
            ticks_lost: stats.ticks_lost(),
            batch_failures: stats.batch_failures(),
            consecutive_errors: stats.consecutive_errors(),
        },
        kill_switch_global: state.risk.is_global_killed(),
        killed_accounts: state
            .risk
            .killed_accounts()
            .into_iter()
            .map(|(account_id, reason)| KilledAccount { account_id, reason })
            .collect(),
        live_orders: state.engine.live_orders().len(),
        lp_health: state.health.all(),
        disabled_symbols: state.hub.disabled().all(),
    };
    Json(status).into_response()
}

pub async fn get_metrics() -> Response {
    match fxgate_telemetry::gather_metrics() {
        Ok(text) => text.into_response(),
        Err(e) => {
            warn!(?e, "Metrics encode failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
