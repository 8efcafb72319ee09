//! Sealed payload envelope.
//!
//! Data records whose entity has a content key carry one of these instead
//! of the plaintext body.

use serde::{Deserialize, Serialize};

use trustchain_core::KeyHash;

use crate::crypto::{ContentKey, SealNonce};
use crate::error::{PermsError, Result};

/// Cipher used by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SealFormat {
    ChaCha20Poly1305 = 1,
}

/// Ciphertext plus what is needed to open it with the right key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    pub format: SealFormat,
    /// Hash of the content key this was sealed under.
    pub key: KeyHash,
    pub nonce: SealNonce,
    pub ciphertext: Vec<u8>,
}

impl SealedPayload {
    pub fn seal(plaintext: &[u8], key: &ContentKey) -> Result<Self> {
        let nonce = SealNonce::generate();
        Ok(Self {
            format: SealFormat::ChaCha20Poly1305,
            key: key.hash(),
            nonce,
            ciphertext: key.encrypt(plaintext, &nonce)?,
        })
    }

    pub fn open(&self, key: &ContentKey) -> Result<Vec<u8>> {
        let actual = key.hash();
        if actual != self.key {
            return Err(PermsError::KeyMismatch {
                expected: self.key,
                actual,
            });
        }
        match self.format {
            SealFormat::ChaCha20Poly1305 => key.decrypt(&self.ciphertext, &self.nonce),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| PermsError::SerializationError(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| PermsError::SerializationError(e.to_string()))
    }
}
