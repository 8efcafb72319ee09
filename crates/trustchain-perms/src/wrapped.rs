//! Content keys wrapped for individual readers.
//!
//! Wrapping uses an ephemeral X25519 agreement against the reader's public
//! key, derives a wrap key bound to both key hashes and seals the content key
//! with it. A wrapped key travels through the partition as a
//! [`RecordKind::WrappedKey`] record.

use serde::{Deserialize, Serialize};

use trustchain_core::{EntityId, EntityMeta, EntityType, KeyHash, Keypair, Record, RecordBuilder, RecordKind};

use crate::crypto::{ContentKey, EphemeralKeyPair, ReaderKeyPair, ReaderPublicKey, SealNonce};
use crate::error::{PermsError, Result};

/// One content key, wrapped for one reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    /// Hash of the reader public key able to unwrap this.
    pub reader: KeyHash,
    /// Hash of the wrapped content key.
    pub content: KeyHash,
    pub ephemeral_public: ReaderPublicKey,
    pub nonce: SealNonce,
    pub encrypted_key: Vec<u8>,
}

impl WrappedKey {
    /// Wrap `key` so that only the holder of `reader`'s secret can open it.
    pub fn wrap(key: &ContentKey, reader: &ReaderPublicKey) -> Result<Self> {
        let reader_hash = reader.key_hash();
        let content = key.hash();

        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let wrap_key = ephemeral.agree(reader).wrap_key(&context(&content, &reader_hash));

        let nonce = SealNonce::generate();
        let encrypted_key = wrap_key.encrypt(key.as_bytes(), &nonce)?;

        Ok(Self {
            reader: reader_hash,
            content,
            ephemeral_public,
            nonce,
            encrypted_key,
        })
    }

    /// Recover the content key with the reader's key pair.
    pub fn unwrap(&self, reader: &ReaderKeyPair) -> Result<ContentKey> {
        let wrap_key = reader
            .agree(&self.ephemeral_public)
            .wrap_key(&context(&self.content, &self.reader));
        let raw = wrap_key.decrypt(&self.encrypted_key, &self.nonce)?;

        let bytes: [u8; 32] = raw.as_slice().try_into().map_err(|_| {
            PermsError::DecryptionError(format!("content key is {} bytes, expected 32", raw.len()))
        })?;
        let key = ContentKey::from_bytes(bytes);
        if key.hash() != self.content {
            return Err(PermsError::KeyMismatch {
                expected: self.content,
                actual: key.hash(),
            });
        }
        Ok(key)
    }

    /// Deterministic entity id for the (reader, content) pair.
    pub fn entity_id(&self) -> EntityId {
        let digest = blake3::hash(&context(&self.content, &self.reader));
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest.as_bytes()[..16]);
        EntityId::from_bytes(id)
    }

    /// Sign this wrapped key into a partition record.
    pub fn to_record(&self, author: &Keypair) -> Result<Record> {
        let meta = EntityMeta::for_key(EntityType::WRAPPED_KEY, self.entity_id());
        Ok(RecordBuilder::new(RecordKind::WrappedKey, meta)
            .payload(self.to_bytes()?)
            .sign(author))
    }

    pub fn from_record(record: &Record) -> Result<Self> {
        if record.kind() != RecordKind::WrappedKey {
            return Err(PermsError::SerializationError(format!(
                "expected a wrapped key record, got {:?}",
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

fn context(content: &KeyHash, reader: &KeyHash) -> [u8; 64] {
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(content.as_bytes());
    out[32..].copy_from_slice(reader.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap() {
        let reader = ReaderKeyPair::generate();
        let key = ContentKey::generate();

        let wrapped = WrappedKey::wrap(&key, &reader.public_key()).unwrap();
        assert_eq!(wrapped.reader, reader.key_hash());
        assert_eq!(wrapped.content, key.hash());
        assert_eq!(wrapped.unwrap(&reader).unwrap(), key);
    }

    #[test]
    fn test_other_reader_cannot_unwrap() {
        let reader = ReaderKeyPair::generate();
        let wrapped = WrappedKey::wrap(&ContentKey::generate(), &reader.public_key()).unwrap();
        assert!(wrapped.unwrap(&ReaderKeyPair::generate()).is_err());
    }

    #[test]
    fn test_record_roundtrip() {
        let reader = ReaderKeyPair::generate();
        let key = ContentKey::generate();
        let wrapped = WrappedKey::wrap(&key, &reader.public_key()).unwrap();

        let record = wrapped.to_record(&Keypair::generate()).unwrap();
        trustchain_core::validate_record(&record).unwrap();
        assert_eq!(record.id(), wrapped.entity_id());

        let back = WrappedKey::from_record(&record).unwrap();
        assert_eq!(back.unwrap(&reader).unwrap(), key);
    }

    #[test]
    fn test_same_pair_same_entity_id() {
        let reader = ReaderKeyPair::generate();
        let key = ContentKey::generate();
        let a = WrappedKey::wrap(&key, &reader.public_key()).unwrap();
        let b = WrappedKey::wrap(&key, &reader.public_key()).unwrap();
        assert_ne!(a.encrypted_key, b.encrypted_key);
        assert_eq!(a.entity_id(), b.entity_id());
    }
}
