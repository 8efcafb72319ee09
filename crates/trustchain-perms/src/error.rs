//! Error types for key handling.

use thiserror::Error;

use trustchain_core::KeyHash;

/// Errors raised while sealing, wrapping or resolving keys.
#[derive(Debug, Error)]
pub enum PermsError {
    #[error("encryption error: {0}")]
    EncryptionError(String),

    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// The payload was sealed under a different content key.
    #[error("payload sealed under {expected}, key is {actual}")]
    KeyMismatch { expected: KeyHash, actual: KeyHash },

    /// No held read key could unwrap this content key.
    #[error("no access to content key {0}")]
    NoAccess(KeyHash),

    /// Freshly generated keys never survived a wrap round trip.
    #[error("content key generation failed after {attempts} attempts")]
    KeyGeneration { attempts: u32 },

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("core error: {0}")]
    CoreError(#[from] trustchain_core::CoreError),
}

/// Result type for key operations.
pub type Result<T> = std::result::Result<T, PermsError>;
