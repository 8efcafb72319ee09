//! Plaintext entity records, signed directly.
//!
//! These bypass the facade so chain behaviour can be tested in isolation.

use serde::Serialize;

use trustchain_core::{Entity, EntityMeta, Keypair, Record, RecordBuilder};

/// CBOR body of an entity.
pub fn body<T: Serialize>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).expect("sample entities always encode");
    buf
}

/// Sign `value` under exactly `meta`.
pub fn sign<T: Serialize>(author: &Keypair, meta: EntityMeta, value: &T) -> Record {
    RecordBuilder::data(meta, body(value)).sign(author)
}

/// A new top-level entity.
pub fn create<T: Entity>(author: &Keypair, value: &T) -> (EntityMeta, Record) {
    let meta = EntityMeta::new(T::entity_type());
    let record = sign(author, meta.clone(), value);
    (meta, record)
}

/// A new entity attached under `parent`.
pub fn create_under<T: Entity>(
    author: &Keypair,
    parent: &EntityMeta,
    value: &T,
) -> (EntityMeta, Record) {
    let meta = EntityMeta::new(T::entity_type()).with_parent(parent.id, parent.entity_type.clone());
    let record = sign(author, meta.clone(), value);
    (meta, record)
}

/// The next version of an existing entity.
pub fn update<T: Serialize>(author: &Keypair, meta: &EntityMeta, value: &T) -> (EntityMeta, Record) {
    let mut next = meta.clone();
    next.advance();
    next.merge_versions.clear();
    let record = sign(author, next.clone(), value);
    (next, record)
}

/// A tombstone for an existing entity.
pub fn remove(author: &Keypair, meta: &EntityMeta) -> Record {
    let mut next = meta.clone();
    next.advance();
    next.merge_versions.clear();
    RecordBuilder::tombstone(next).sign(author)
}
