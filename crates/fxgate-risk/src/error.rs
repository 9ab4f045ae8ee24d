//! Risk error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Risk check failed: {reason}")]
    Rejected { reason: &'static str },
}

pub type RiskResult<T> = Result<T, RiskError>;
