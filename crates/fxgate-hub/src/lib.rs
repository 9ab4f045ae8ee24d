//! WebSocket hub and HTTP API.
//!
//! The hub throttles aggregated ticks per symbol, caches the latest
//! price, and fans out to subscribed clients with non-blocking sends:
//! a slow client loses updates, never stalls the market-data path.
//! The HTTP side exposes history reads, order entry, routing preview and
//! the routing-rule CRUD, all behind a token-bucket rate limiter.

pub mod auth;
pub mod error;
pub mod http;
pub mod hub;
pub mod ratelimit;
pub mod server;
pub mod ws;

pub use auth::{AllowAllValidator, Claims, JwtValidator, TokenValidator};
pub use error::{HubError, HubResult};
pub use hub::{run_stats_reporter, HubConfig, HubStats, TickHub};
pub use ratelimit::{RateDecision, RateLimiter, RateLimiterConfig};
pub use server::{create_router, run_server, AppState, ServerConfig};
