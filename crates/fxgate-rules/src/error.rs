//! Rule store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleStoreError {
    /// The new/updated rule semantically conflicts with an active rule.
    #[error("Rule conflicts with active rule {conflicting_id}")]
    Conflict { conflicting_id: i64 },

    #[error("Rule {0} not found")]
    NotFound(i64),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Reorder sequence does not cover the rule set exactly.
    #[error("Reorder mismatch: {0}")]
    ReorderMismatch(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RulesResult<T> = Result<T, RuleStoreError>;
