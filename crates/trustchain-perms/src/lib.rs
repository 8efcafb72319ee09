//! # trustchain perms
//!
//! Confidentiality for partition content.
//!
//! Entity payloads are sealed with a random [`ContentKey`]. That key is
//! wrapped once per reader as a [`WrappedKey`] record. Readers publish their
//! [`ReaderPublicKey`] as a [`PublicKey`] record so writers can wrap for them.
//!
//! A [`KeyResolver`] holds one caller's reader keys and turns content key
//! hashes back into keys, caching hits and misses.

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod public;
pub mod resolver;
pub mod wrapped;

pub use crypto::{ContentKey, ReaderKeyPair, ReaderPublicKey, SealNonce};
pub use envelope::{SealFormat, SealedPayload};
pub use error::{PermsError, Result};
pub use public::PublicKey;
pub use resolver::{KeyResolver, ResolverConfig, WrappedKeyIndex};
pub use wrapped::WrappedKey;
