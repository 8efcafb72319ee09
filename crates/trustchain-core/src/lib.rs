//! # trustchain core
//!
//! Pure building blocks shared by every other trustchain crate. No I/O.
//!
//! ## Key Types
//!
//! - [`PartitionKey`] - address of one ordered log
//! - [`Record`] - a signed, immutable entry in a partition
//! - [`EntityMeta`] - identity, version lineage and [`Rights`] of an entity
//! - [`Schema`] - registered [`Entity`] types and their legal parents
//!
//! Record headers are signed over a deterministic CBOR encoding, see
//! [`canonical`].

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod meta;
pub mod partition;
pub mod record;
pub mod rights;
pub mod schema;
pub mod types;
pub mod validation;

pub use canonical::{canonical_bytes, canonical_header_bytes, signed_message};
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, ValidationError};
pub use meta::{EntityMeta, ParentLink};
pub use partition::PartitionKey;
pub use record::{now_millis, Record, RecordBuilder, RecordHeader, RecordKind, RECORD_FORMAT};
pub use rights::{effective, Access, Rights};
pub use schema::{Entity, HasRights, HasRoles, ParentRule, Schema, SchemaBuilder, TypeRule};
pub use types::{EntityId, EntityType, KeyHash, RecordId, VersionId};
pub use validation::{validate_record, validate_record_structure};
