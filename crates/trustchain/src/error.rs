//! Error types for the store facade.

use thiserror::Error;

use trustchain_bridge::BridgeError;
use trustchain_core::{CoreError, EntityId, EntityType, KeyHash, ValidationError};
use trustchain_partition::ChainError;
use trustchain_perms::PermsError;

/// Errors surfaced to callers of [`Io`](crate::Io) and
/// [`TrustStore`](crate::TrustStore).
#[derive(Debug, Error)]
pub enum TrustError {
    #[error("{type_name} {id} not found")]
    NotFound { id: EntityId, type_name: String },

    #[error("{id} is a {actual}, not a {expected}")]
    TypeMismatch {
        id: EntityId,
        expected: EntityType,
        actual: EntityType,
    },

    #[error("no held key opens {id}")]
    AuthorityMissing { id: EntityId },

    #[error("content key generation failed after {attempts} attempts")]
    KeyGenerationFailure { attempts: u32 },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("sync timed out: {0}")]
    SyncTimeout(String),

    #[error("entity {0} is immutable")]
    Immutable(EntityId),

    #[error("deferred write aborted: {0}")]
    TransactionAborted(Box<TrustError>),

    #[error("reader {0} has not published a public key")]
    UnknownReader(KeyHash),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("chain error: {0}")]
    Chain(ChainError),

    #[error("key error: {0}")]
    Perms(PermsError),
}

impl TrustError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SyncTimeout(_) => true,
            Self::Chain(e) => e.is_retryable(),
            Self::TransactionAborted(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}

impl From<ChainError> for TrustError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Bridge(timeout @ BridgeError::SyncTimeout { .. }) => {
                Self::SyncTimeout(timeout.to_string())
            }
            other => Self::Chain(other),
        }
    }
}

impl From<BridgeError> for TrustError {
    fn from(e: BridgeError) -> Self {
        ChainError::from(e).into()
    }
}

impl From<PermsError> for TrustError {
    fn from(e: PermsError) -> Self {
        match e {
            PermsError::KeyGeneration { attempts } => Self::KeyGenerationFailure { attempts },
            other => Self::Perms(other),
        }
    }
}

impl From<CoreError> for TrustError {
    fn from(e: CoreError) -> Self {
        Self::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrustError>;
