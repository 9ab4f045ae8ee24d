//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Invalid tick: {0}")]
    InvalidTick(String),
}

pub type FeedResult<T> = Result<T, FeedError>;
