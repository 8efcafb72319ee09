//! Content key resolution for one caller scope.
//!
//! The resolver owns the reader keys a caller holds. Given a content key
//! hash it looks for a wrapped copy addressed to one of those readers,
//! unwraps it and caches the result. Misses are cached too, so repeated
//! reads of an unreadable entity cost nothing.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use trustchain_core::KeyHash;

use crate::crypto::{ContentKey, ReaderKeyPair};
use crate::error::{PermsError, Result};
use crate::wrapped::WrappedKey;

/// Lookup of wrapped keys by (reader, content key).
pub trait WrappedKeyIndex {
    /// Every wrapped copy addressed to `reader`, oldest first.
    fn wrapped_keys(&self, reader: &KeyHash, content: &KeyHash) -> Vec<WrappedKey>;
}

/// Resolver tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// How many fresh keys to try before giving up on generation.
    pub max_key_generation_attempts: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_key_generation_attempts: 3,
        }
    }
}

/// Per-scope content key cache.
pub struct KeyResolver {
    read_keys: Vec<ReaderKeyPair>,
    config: ResolverConfig,
    resolved: Mutex<HashMap<KeyHash, ContentKey>>,
    missing: Mutex<HashSet<KeyHash>>,
    lookups: AtomicU64,
    unwrap_attempts: AtomicU64,
}

impl KeyResolver {
    pub fn new(read_keys: Vec<ReaderKeyPair>, config: ResolverConfig) -> Self {
        Self {
            read_keys,
            config,
            resolved: Mutex::new(HashMap::new()),
            missing: Mutex::new(HashSet::new()),
            lookups: AtomicU64::new(0),
            unwrap_attempts: AtomicU64::new(0),
        }
    }

    pub fn read_keys(&self) -> &[ReaderKeyPair] {
        &self.read_keys
    }

    /// Find the content key for `content`, or `None` if no held reader key
    /// has a wrapped copy.
    pub fn resolve(&self, content: &KeyHash, index: &dyn WrappedKeyIndex) -> Option<ContentKey> {
        if let Some(key) = self.resolved.lock().unwrap().get(content) {
            return Some(key.clone());
        }
        if self.missing.lock().unwrap().contains(content) {
            return None;
        }

        self.lookups.fetch_add(1, Ordering::Relaxed);
        for reader in &self.read_keys {
            for wrapped in index.wrapped_keys(&reader.key_hash(), content) {
                self.unwrap_attempts.fetch_add(1, Ordering::Relaxed);
                match wrapped.unwrap(reader) {
                    Ok(key) => {
                        self.resolved.lock().unwrap().insert(*content, key.clone());
                        return Some(key);
                    }
                    Err(e) => {
                        tracing::warn!(content = %content, reader = %reader.key_hash(), "unwrap failed: {}", e);
                    }
                }
            }
        }

        tracing::debug!(content = %content, "no held reader key opens content key");
        self.missing.lock().unwrap().insert(*content);
        None
    }

    /// Like [`resolve`](Self::resolve) but a miss is an error.
    pub fn require(&self, content: &KeyHash, index: &dyn WrappedKeyIndex) -> Result<ContentKey> {
        self.resolve(content, index)
            .ok_or(PermsError::NoAccess(*content))
    }

    /// Seed the positive cache with a key this scope created.
    pub fn remember(&self, key: &ContentKey) {
        let hash = key.hash();
        self.missing.lock().unwrap().remove(&hash);
        self.resolved.lock().unwrap().insert(hash, key.clone());
    }

    /// Forget a cached miss so the next lookup retries.
    pub fn invalidate(&self, content: &KeyHash) {
        self.missing.lock().unwrap().remove(content);
    }

    /// How many resolutions got past both caches and searched the index.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// How many unwraps this resolver has attempted.
    pub fn unwrap_attempts(&self) -> u64 {
        self.unwrap_attempts.load(Ordering::Relaxed)
    }

    /// Create a new content key that every held reader key can round trip.
    pub fn generate_content_key(&self) -> Result<ContentKey> {
        let attempts = self.config.max_key_generation_attempts;
        for attempt in 1..=attempts {
            let key = ContentKey::generate();
            if self.round_trips(&key) {
                self.remember(&key);
                return Ok(key);
            }
            tracing::warn!(attempt, "generated content key failed wrap round trip");
        }
        Err(PermsError::KeyGeneration { attempts })
    }

    fn round_trips(&self, key: &ContentKey) -> bool {
        self.read_keys.iter().all(|reader| {
            WrappedKey::wrap(key, &reader.public_key())
                .and_then(|w| w.unwrap(reader))
                .map(|k| &k == key)
                .unwrap_or(false)
        })
    }
}

impl std::fmt::Debug for KeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResolver")
            .field("read_keys", &self.read_keys)
            .field("resolved", &self.resolved.lock().unwrap().len())
            .field("missing", &self.missing.lock().unwrap().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ReaderPublicKey;

    #[derive(Default)]
    struct Index(HashMap<(KeyHash, KeyHash), Vec<WrappedKey>>);

    impl Index {
        fn add(&mut self, wrapped: WrappedKey) {
            self.0
                .entry((wrapped.reader, wrapped.content))
                .or_default()
                .push(wrapped);
        }
    }

    impl WrappedKeyIndex for Index {
        fn wrapped_keys(&self, reader: &KeyHash, content: &KeyHash) -> Vec<WrappedKey> {
            self.0.get(&(*reader, *content)).cloned().unwrap_or_default()
        }
    }

    #[test]
    fn test_resolves_and_caches() {
        let reader = ReaderKeyPair::generate();
        let key = ContentKey::generate();
        let mut index = Index::default();
        index.add(WrappedKey::wrap(&key, &reader.public_key()).unwrap());

        let resolver = KeyResolver::new(vec![reader], ResolverConfig::default());
        assert_eq!(resolver.resolve(&key.hash(), &index), Some(key.clone()));
        assert_eq!(resolver.resolve(&key.hash(), &index), Some(key));
        assert_eq!(resolver.unwrap_attempts(), 1);
    }

    #[test]
    fn test_bad_copy_does_not_hide_good_one() {
        let reader = ReaderKeyPair::generate();
        let key = ContentKey::generate();
        let mut bogus = WrappedKey::wrap(&ContentKey::generate(), &reader.public_key()).unwrap();
        bogus.content = key.hash();

        let mut index = Index::default();
        index.add(bogus);
        index.add(WrappedKey::wrap(&key, &reader.public_key()).unwrap());

        let resolver = KeyResolver::new(vec![reader], ResolverConfig::default());
        assert_eq!(resolver.resolve(&key.hash(), &index), Some(key));
        assert_eq!(resolver.unwrap_attempts(), 2);
    }

    #[test]
    fn test_miss_is_cached_until_invalidated() {
        let reader = ReaderKeyPair::generate();
        let key = ContentKey::generate();
        let mut index = Index::default();
        let resolver = KeyResolver::new(vec![reader.clone()], ResolverConfig::default());

        assert!(resolver.resolve(&key.hash(), &index).is_none());

        index.add(WrappedKey::wrap(&key, &reader.public_key()).unwrap());
        assert!(resolver.resolve(&key.hash(), &index).is_none());
        assert_eq!(resolver.unwrap_attempts(), 0);
        assert_eq!(resolver.lookups(), 1);

        resolver.invalidate(&key.hash());
        assert_eq!(resolver.resolve(&key.hash(), &index), Some(key));
    }

    #[test]
    fn test_require_reports_no_access() {
        let resolver = KeyResolver::new(vec![ReaderKeyPair::generate()], ResolverConfig::default());
        let hash = ContentKey::generate().hash();
        assert!(matches!(
            resolver.require(&hash, &Index::default()),
            Err(PermsError::NoAccess(h)) if h == hash
        ));
    }

    #[test]
    fn test_generated_key_is_remembered() {
        let resolver = KeyResolver::new(vec![ReaderKeyPair::generate()], ResolverConfig::default());
        let key = resolver.generate_content_key().unwrap();
        assert_eq!(resolver.resolve(&key.hash(), &Index::default()), Some(key));
    }

    #[test]
    fn test_generation_gives_up_after_bound() {
        let broken = ReaderKeyPair::mismatched([1u8; 32], ReaderPublicKey::from_bytes([9u8; 32]));
        let resolver = KeyResolver::new(
            vec![broken],
            ResolverConfig {
                max_key_generation_attempts: 4,
            },
        );
        assert!(matches!(
            resolver.generate_content_key(),
            Err(PermsError::KeyGeneration { attempts: 4 })
        ));
    }
}
