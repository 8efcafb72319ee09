//! Signed records: the only thing that ever travels through a partition.
//!
//! Records are immutable. A new version of an entity is a new record whose
//! header points back at the version it replaces.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_bytes, signed_message};
use crate::crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
use crate::error::{CoreError, Result};
use crate::meta::EntityMeta;
use crate::types::{EntityId, RecordId, VersionId};

/// Current record format.
pub const RECORD_FORMAT: u8 = 0;

/// How the payload of a record is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordKind {
    /// A version of an entity. Payload is the (possibly sealed) body.
    Data = 1,
    /// Removal of an entity. Payload is empty.
    Tombstone = 2,
    /// Publication of a signing or encryption public key.
    PublicKey = 3,
    /// A content key wrapped for one reader key.
    WrappedKey = 4,
}

impl RecordKind {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Data),
            2 => Some(Self::Tombstone),
            3 => Some(Self::PublicKey),
            4 => Some(Self::WrappedKey),
            _ => None,
        }
    }

    /// Whether the record describes an entity rather than key material.
    pub fn is_entity(self) -> bool {
        matches!(self, Self::Data | Self::Tombstone)
    }
}

/// Everything a record's signature covers besides the payload itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub format: u8,
    pub kind: RecordKind,
    pub meta: EntityMeta,
    pub author: Ed25519PublicKey,
    /// Author-claimed wall clock, Unix milliseconds. Untrusted.
    pub timestamp: i64,
    pub content_digest: Blake3Hash,
}

/// A signed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub header: RecordHeader,
    pub payload: Bytes,
    pub signature: Ed25519Signature,
}

impl Record {
    /// Content address of the record.
    pub fn compute_id(&self) -> RecordId {
        RecordId(*blake3::hash(&canonical_bytes(self)).as_bytes())
    }

    pub fn id(&self) -> EntityId {
        self.header.meta.id
    }

    pub fn version(&self) -> VersionId {
        self.header.meta.version
    }

    pub fn kind(&self) -> RecordKind {
        self.header.kind
    }

    pub fn meta(&self) -> &EntityMeta {
        &self.header.meta
    }

    pub fn author(&self) -> &Ed25519PublicKey {
        &self.header.author
    }

    /// Check the signature over header and payload.
    pub fn verify_signature(&self) -> Result<()> {
        let message = signed_message(&self.header, &self.payload);
        self.header.author.verify(&message, &self.signature)
    }

    /// Wire encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
    }
}

/// Assembles and signs a record.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    kind: RecordKind,
    meta: EntityMeta,
    timestamp: Option<i64>,
    payload: Bytes,
}

impl RecordBuilder {
    pub fn new(kind: RecordKind, meta: EntityMeta) -> Self {
        Self {
            kind,
            meta,
            timestamp: None,
            payload: Bytes::new(),
        }
    }

    pub fn data(meta: EntityMeta, payload: impl Into<Bytes>) -> Self {
        Self::new(RecordKind::Data, meta).payload(payload)
    }

    pub fn tombstone(meta: EntityMeta) -> Self {
        Self::new(RecordKind::Tombstone, meta)
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn timestamp(mut self, millis: i64) -> Self {
        self.timestamp = Some(millis);
        self
    }

    pub fn sign(self, keypair: &Keypair) -> Record {
        let header = RecordHeader {
            format: RECORD_FORMAT,
            kind: self.kind,
            meta: self.meta,
            author: keypair.public_key(),
            timestamp: self.timestamp.unwrap_or_else(now_millis),
            content_digest: Blake3Hash::hash(&self.payload),
        };
        let signature = keypair.sign(&signed_message(&header, &self.payload));
        Record {
            header,
            payload: self.payload,
            signature,
        }
    }
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityType;

    #[test]
    fn test_signed_record_verifies() {
        let keypair = Keypair::generate();
        let record = RecordBuilder::data(EntityMeta::new(EntityType::new("account")), &b"{}"[..])
            .sign(&keypair);

        record.verify_signature().unwrap();
        assert_eq!(record.header.author, keypair.public_key());
        assert_eq!(record.header.content_digest, Blake3Hash::hash(b"{}"));
    }

    #[test]
    fn test_tampered_payload_fails_signature() {
        let keypair = Keypair::generate();
        let mut record =
            RecordBuilder::data(EntityMeta::new(EntityType::new("account")), &b"a"[..]).sign(&keypair);
        record.payload = Bytes::from_static(b"b");
        assert!(record.verify_signature().is_err());
    }

    #[test]
    fn test_wire_roundtrip_keeps_id() {
        let keypair = Keypair::generate();
        let record = RecordBuilder::data(EntityMeta::new(EntityType::new("note")), &b"body"[..])
            .timestamp(1_700_000_000_000)
            .sign(&keypair);

        let back = Record::from_bytes(&record.to_bytes().unwrap()).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.compute_id(), record.compute_id());
        back.verify_signature().unwrap();
    }

    #[test]
    fn test_kind_codes() {
        for kind in [
            RecordKind::Data,
            RecordKind::Tombstone,
            RecordKind::PublicKey,
            RecordKind::WrappedKey,
        ] {
            assert_eq!(RecordKind::from_u8(kind.to_u8()), Some(kind));
        }
        assert_eq!(RecordKind::from_u8(0), None);
        assert!(RecordKind::Tombstone.is_entity());
        assert!(!RecordKind::WrappedKey.is_entity());
    }
}
