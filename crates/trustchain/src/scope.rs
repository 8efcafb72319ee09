//! Caller scope: the keys one caller holds, plus its key cache.
//!
//! A scope stands in for whatever issues caller credentials. It is created
//! once per caller (a request, or a longer-lived token) and shared by every
//! [`Io`](crate::Io) that caller opens, so resolved content keys and cached
//! misses carry across partitions.

use std::collections::BTreeSet;

use trustchain_core::{KeyHash, Keypair};
use trustchain_perms::{KeyResolver, ReaderKeyPair, ResolverConfig};

pub struct Scope {
    identity: Keypair,
    resolver: KeyResolver,
}

impl Scope {
    pub fn new(identity: Keypair, read_keys: Vec<ReaderKeyPair>, config: ResolverConfig) -> Self {
        Self {
            identity,
            resolver: KeyResolver::new(read_keys, config),
        }
    }

    /// Signing identity used for every record this scope writes.
    pub fn identity(&self) -> &Keypair {
        &self.identity
    }

    pub fn write_hash(&self) -> KeyHash {
        self.identity.key_hash()
    }

    pub fn read_hashes(&self) -> BTreeSet<KeyHash> {
        self.resolver.read_keys().iter().map(|k| k.key_hash()).collect()
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.resolver
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("identity", &self.identity.key_hash())
            .field("resolver", &self.resolver)
            .finish()
    }
}
