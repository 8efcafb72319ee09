//! Error types for trustchain core.

use thiserror::Error;

use crate::types::{EntityId, EntityType, KeyHash, VersionId};

/// Errors raised while building, encoding or decoding core values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid partition key: {0}")]
    InvalidPartitionKey(String),

    #[error("unknown record kind: {0}")]
    UnknownKind(u8),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Reasons a record is refused by validation or by the chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("signature verification failed")]
    SignatureFailed,

    #[error("content digest does not match header")]
    ContentDigestMismatch,

    #[error("unsupported record format: {0}")]
    UnsupportedFormat(u8),

    #[error("structural error: {0}")]
    Structural(String),

    #[error("entity type {0} is not registered")]
    UnknownType(EntityType),

    #[error("{child} may not be placed under {}", .parent.as_ref().map(|p| p.as_str()).unwrap_or("no parent"))]
    IllegalParent {
        child: EntityType,
        parent: Option<EntityType>,
    },

    #[error("parent {id} is a {actual}, record claims {claimed}")]
    ParentTypeMismatch {
        id: EntityId,
        claimed: EntityType,
        actual: EntityType,
    },

    #[error("parent {parent} does not allow children of type {child}")]
    ChildNotAllowed { parent: EntityId, child: EntityType },

    #[error("parent {0} is not present in the partition")]
    MissingParent(EntityId),

    #[error("entity {id} changed type from {from} to {to}")]
    TypeChanged {
        id: EntityId,
        from: EntityType,
        to: EntityType,
    },

    #[error("author {author} holds no write authority over {id}")]
    Unauthorized { id: EntityId, author: KeyHash },

    #[error("entity {0} is immutable")]
    Immutable(EntityId),

    #[error("version {version} of {id} was already applied")]
    Duplicate { id: EntityId, version: VersionId },

    #[error("malformed key record: {0}")]
    MalformedKey(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                ValidationError::SignatureFailed
            }
            CoreError::UnknownKind(k) => {
                ValidationError::Structural(format!("unknown record kind {k}"))
            }
            other => ValidationError::Structural(other.to_string()),
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
