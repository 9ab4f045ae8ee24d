//! Hub error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Bind failed: {0}")]
    Bind(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type HubResult<T> = Result<T, HubError>;
