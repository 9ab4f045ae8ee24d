//! Execution error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Unknown order: {0}")]
    UnknownOrder(String),

    #[error("No session registered for LP {0}")]
    NoSession(String),

    #[error("FIX send failed: {0}")]
    Fix(#[from] fxgate_fix::FixError),

    #[error("Routing failed: {0}")]
    Router(#[from] fxgate_router::RouterError),

    #[error("History write failed: {0}")]
    History(std::io::Error),
}

pub type ExecResult<T> = Result<T, ExecError>;
