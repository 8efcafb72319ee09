//! Error types for bridges.

use thiserror::Error;

/// Errors raised by a bridge or its backing log.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("connection lock poisoned: {0}")]
    Poisoned(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("bridge for {0} already has a subscriber")]
    AlreadySubscribed(String),

    #[error("bridge for {0} is shut down")]
    Closed(String),

    /// The local chain did not catch up to a sync ticket in time.
    #[error("sync on {partition} timed out at offset {delivered}, waiting for {ticket}")]
    SyncTimeout {
        partition: String,
        ticket: u64,
        delivered: u64,
    },
}

impl BridgeError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SyncTimeout { .. })
    }
}

impl From<trustchain_core::CoreError> for BridgeError {
    fn from(e: trustchain_core::CoreError) -> Self {
        Self::Codec(e.to_string())
    }
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
