//! Core domain types for the fxgate broker core.
//!
//! This crate provides the fundamental types shared across the system:
//! - `Symbol`, `LpId`, `AccountId`: validated identifiers
//! - `Price`, `Qty`: precision-safe numeric types
//! - `Tick`, `QuoteSnapshot`: market data
//! - `Order`, `OrderStatus`: order lifecycle
//! - `RoutingRule`: smart-order-router rule model
//! - `ErrorKind`: the stable error vocabulary surfaced to callers

pub mod decimal;
pub mod error;
pub mod market;
pub mod order;
pub mod rule;
pub mod tick;

pub use decimal::{Price, Qty};
pub use error::{CoreError, ErrorKind, Result};
pub use market::{AccountId, AccountProfile, ClientId, LpId, Symbol};
pub use order::{ClientOrderId, Order, OrderSide, OrderStatus, OrderType, TimeInForce};
pub use rule::{RoutingRule, RuleAction, RuleFilters};
pub use tick::{LpQuote, QuoteSnapshot, Tick, QUOTE_STALE_MS};
