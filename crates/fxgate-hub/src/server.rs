//! HTTP/WS server assembly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use fxgate_exec::ExecutionEngine;
use fxgate_feed::QuoteBook;
use fxgate_health::HealthMonitor;
use fxgate_risk::RiskGate;
use fxgate_router::SmartOrderRouter;
use fxgate_rules::RuleStore;
use fxgate_store::TickStore;

use crate::auth::TokenValidator;
use crate::error::HubResult;
use crate::hub::TickHub;
use crate::ratelimit::RateLimiter;
use crate::{http, ws};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<TickHub>,
    pub store: Arc<TickStore>,
    pub quotes: Arc<QuoteBook>,
    pub rules: Arc<RuleStore>,
    pub router: Arc<SmartOrderRouter>,
    pub engine: Arc<ExecutionEngine>,
    pub health: Arc<HealthMonitor>,
    pub risk: Arc<RiskGate>,
    pub validator: Arc<dyn TokenValidator>,
    pub limiter: Arc<RateLimiter>,
}

/// Build the router: `/ws`, `/metrics`, and the rate-limited `/api`.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/history/ticks", get(http::get_history))
        .route("/order", post(http::post_order))
        .route("/order/{id}", delete(http::delete_order))
        .route("/routing/preview", get(http::get_preview))
        .route("/routing/rules", get(http::list_rules))
        .route("/routing/rules", post(http::create_rule))
        .route("/routing/rules/{id}", put(http::update_rule))
        .route("/routing/rules/{id}", delete(http::delete_rule))
        .route("/routing/rules/reorder", post(http::reorder_rules))
        .route("/status", get(http::get_status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            http::rate_limit_mw,
        ));

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/metrics", get(http::get_metrics))
        .nest("/api", api)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn run_server(
    state: AppState,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> HubResult<()> {
    let app = create_router(state);
    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .map_err(|e| {
            crate::HubError::Bind(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("bad bind address: {e}"),
            ))
        })?;

    info!(%addr, "Starting hub server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
