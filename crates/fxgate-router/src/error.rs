//! Router error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Audit write failed: {0}")]
    Audit(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type RouterResult<T> = Result<T, RouterError>;
