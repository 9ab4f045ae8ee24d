//! Error types: the internal `CoreError` plus the stable `ErrorKind`
//! vocabulary surfaced to API callers and the UI.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQty(String),

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Stable error vocabulary crossing the HTTP/WS boundary.
///
/// Serialized as `{"kind": "...", ...}` so the UI can switch on a fixed
/// `kind` string. Transient infrastructure failures never appear here;
/// they only move error counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Configuration rejected at startup; the process refuses to run.
    ConfigInvalid { detail: String },
    /// Initial logon failed; surfaced to ops, no auto-retry.
    SessionLogonFailed { lp_id: String },
    /// Session dropped mid-flight; reconnecting with backoff.
    SessionTransient,
    /// Durable write hit a busy backend; being retried.
    StorageBusy,
    /// Retries exhausted repeatedly; operator attention needed.
    StorageDegraded,
    /// Pre-trade risk check failed.
    RiskRejected { reason: String },
    /// No fresh, healthy LP could fill the order.
    RoutingNoLiquidity { causes: Vec<String> },
    /// Rule create/update collides with an existing active rule.
    RuleConflict { conflicting_id: i64 },
    /// Request field failed validation.
    ValidationInvalid { field: String },
    /// Caller exceeded its request budget.
    RateLimited { retry_after_secs: u64 },
    /// Missing or invalid credentials.
    Unauthorized,
}

impl ErrorKind {
    /// HTTP status this kind maps to at the API boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ConfigInvalid { .. } => 500,
            Self::SessionLogonFailed { .. } => 502,
            Self::SessionTransient => 503,
            Self::StorageBusy => 503,
            Self::StorageDegraded => 503,
            Self::RiskRejected { .. } => 422,
            Self::RoutingNoLiquidity { .. } => 422,
            Self::RuleConflict { .. } => 409,
            Self::ValidationInvalid { .. } => 400,
            Self::RateLimited { .. } => 429,
            Self::Unauthorized => 401,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serialization() {
        let e = ErrorKind::RiskRejected {
            reason: "daily_loss_limit".to_string(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"kind\":\"risk_rejected\""));
        assert!(json.contains("daily_loss_limit"));
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            ErrorKind::RuleConflict { conflicting_id: 7 }.http_status(),
            409
        );
        assert_eq!(
            ErrorKind::ValidationInvalid {
                field: "symbol".to_string()
            }
            .http_status(),
            400
        );
        assert_eq!(
            ErrorKind::RateLimited {
                retry_after_secs: 3
            }
            .http_status(),
            429
        );
        assert_eq!(ErrorKind::Unauthorized.http_status(), 401);
    }
}
