//! Context-free record checks.
//!
//! These only look at the record itself. Checks that need the partition
//! state (authority, parent presence, immutability) live with the chain.

use crate::crypto::Blake3Hash;
use crate::error::ValidationError;
use crate::record::{Record, RecordKind, RECORD_FORMAT};

/// Full context-free validation: structure, digest, then signature.
pub fn validate_record(record: &Record) -> Result<(), ValidationError> {
    validate_record_structure(record)?;

    if Blake3Hash::hash(&record.payload) != record.header.content_digest {
        return Err(ValidationError::ContentDigestMismatch);
    }

    record.verify_signature()?;
    Ok(())
}

/// Structural rules only. No cryptography.
pub fn validate_record_structure(record: &Record) -> Result<(), ValidationError> {
    let header = &record.header;
    let meta = &header.meta;

    if header.format != RECORD_FORMAT {
        return Err(ValidationError::UnsupportedFormat(header.format));
    }

    if meta.previous_version == Some(meta.version) {
        return Err(ValidationError::Structural(
            "version cannot descend from itself".into(),
        ));
    }
    if meta.merge_versions.contains(&meta.version) {
        return Err(ValidationError::Structural(
            "version cannot merge itself".into(),
        ));
    }

    match header.kind {
        RecordKind::Data | RecordKind::Tombstone => {
            if meta.entity_type.is_reserved() {
                return Err(ValidationError::Structural(format!(
                    "entity record uses reserved type {}",
                    meta.entity_type
                )));
            }
            if header.kind == RecordKind::Tombstone && !record.payload.is_empty() {
                return Err(ValidationError::Structural(
                    "tombstone carries a payload".into(),
                ));
            }
        }
        RecordKind::PublicKey | RecordKind::WrappedKey => {
            if !meta.entity_type.is_reserved() || meta.parent.is_some() {
                return Err(ValidationError::MalformedKey(
                    "key records use a reserved type and no parent".into(),
                ));
            }
            if record.payload.is_empty() {
                return Err(ValidationError::MalformedKey("empty key payload".into()));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::meta::EntityMeta;
    use crate::record::RecordBuilder;
    use crate::types::{EntityId, EntityType};
    use bytes::Bytes;

    fn account() -> EntityMeta {
        EntityMeta::new(EntityType::new("account"))
    }

    #[test]
    fn test_valid_record_passes() {
        let record = RecordBuilder::data(account(), &b"{}"[..]).sign(&Keypair::generate());
        validate_record(&record).unwrap();
    }

    #[test]
    fn test_digest_mismatch() {
        let mut record = RecordBuilder::data(account(), &b"{}"[..]).sign(&Keypair::generate());
        record.payload = Bytes::from_static(b"[]");
        assert_eq!(
            validate_record(&record),
            Err(ValidationError::ContentDigestMismatch)
        );
    }

    #[test]
    fn test_forged_author_fails() {
        let mut record = RecordBuilder::data(account(), &b"{}"[..]).sign(&Keypair::generate());
        record.header.author = Keypair::generate().public_key();
        assert_eq!(validate_record(&record), Err(ValidationError::SignatureFailed));
    }

    #[test]
    fn test_tombstone_with_payload_rejected() {
        let record = RecordBuilder::tombstone(account())
            .payload(&b"x"[..])
            .sign(&Keypair::generate());
        assert!(matches!(
            validate_record_structure(&record),
            Err(ValidationError::Structural(_))
        ));
    }

    #[test]
    fn test_key_record_must_use_reserved_type() {
        let record = RecordBuilder::new(RecordKind::PublicKey, account())
            .payload(&b"k"[..])
            .sign(&Keypair::generate());
        assert!(matches!(
            validate_record_structure(&record),
            Err(ValidationError::MalformedKey(_))
        ));

        let ok = RecordBuilder::new(
            RecordKind::PublicKey,
            EntityMeta::for_key(EntityType::PUBLIC_KEY, EntityId::generate()),
        )
        .payload(&b"k"[..])
        .sign(&Keypair::generate());
        validate_record_structure(&ok).unwrap();
    }

    #[test]
    fn test_self_merge_rejected() {
        let mut meta = account();
        meta.merge_versions.insert(meta.version);
        let record = RecordBuilder::data(meta, &b"{}"[..]).sign(&Keypair::generate());
        assert!(validate_record_structure(&record).is_err());
    }
}
