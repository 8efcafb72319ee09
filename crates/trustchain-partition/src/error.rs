//! Error types for partition chains and the registry.

use thiserror::Error;

use trustchain_bridge::BridgeError;
use trustchain_core::PartitionKey;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("chain for {0} is stopped")]
    Stopped(PartitionKey),

    #[error("chain for {partition} did not finish loading in time")]
    LoadTimeout { partition: PartitionKey },
}

impl ChainError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Bridge(e) => e.is_retryable(),
            Self::LoadTimeout { .. } => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
