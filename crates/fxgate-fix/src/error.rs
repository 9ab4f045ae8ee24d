//! FIX session error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FixError {
    #[error("Logon failed: {0}")]
    LogonFailed(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Gap fill timed out waiting for resend of {begin}..={end}")]
    GapFillTimeout { begin: u64, end: u64 },

    #[error("Inbound sequence {got} below expected {expected} without PossDupFlag")]
    SequenceRegression { expected: u64, got: u64 },

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Checksum mismatch: declared {declared}, computed {computed}")]
    ChecksumMismatch { declared: u8, computed: u8 },

    #[error("Missing required tag {0}")]
    MissingTag(u32),

    #[error("Seqnum store error: {0}")]
    SeqStore(String),

    #[error("Session is shutting down")]
    ShuttingDown,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type FixResult<T> = Result<T, FixError>;
