//! Published public keys.
//!
//! Writers publish their signing key and readers publish their X25519 key so
//! that other parties can grant them rights and wrap content keys for them.

use serde::{Deserialize, Serialize};

use trustchain_core::{
    Ed25519PublicKey, EntityId, EntityMeta, EntityType, KeyHash, Keypair, Record, RecordBuilder,
    RecordKind,
};

use crate::crypto::ReaderPublicKey;
use crate::error::{PermsError, Result};

/// A public key as stored in a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublicKey {
    Signing(Ed25519PublicKey),
    Reader(ReaderPublicKey),
}

impl PublicKey {
    /// The hash rights use to name this key.
    pub fn key_hash(&self) -> KeyHash {
        match self {
            Self::Signing(k) => k.key_hash(),
            Self::Reader(k) => k.key_hash(),
        }
    }

    pub fn as_reader(&self) -> Option<&ReaderPublicKey> {
        match self {
            Self::Reader(k) => Some(k),
            Self::Signing(_) => None,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        let hash = self.key_hash();
        let mut id = [0u8; 16];
        id.copy_from_slice(&hash.as_bytes()[..16]);
        EntityId::from_bytes(id)
    }

    pub fn to_record(&self, author: &Keypair) -> Result<Record> {
        let meta = EntityMeta::for_key(EntityType::PUBLIC_KEY, self.entity_id());
        Ok(RecordBuilder::new(RecordKind::PublicKey, meta)
            .payload(self.to_bytes()?)
            .sign(author))
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        if record.kind() != RecordKind::PublicKey {
            return Err(PermsError::SerializationError(format!(
                "expected a public key record, got {:?}",
                record.kind()
            )));
        }
        Self::from_bytes(&record.payload)
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

impl From<ReaderPublicKey> for PublicKey {
    fn from(key: ReaderPublicKey) -> Self {
        Self::Reader(key)
    }
}

impl From<Ed25519PublicKey> for PublicKey {
    fn from(key: Ed25519PublicKey) -> Self {
        Self::Signing(key)
    }
}
