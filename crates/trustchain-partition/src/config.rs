//! Chain and registry configuration.

use serde::{Deserialize, Deserializer};
use std::collections::BTreeSet;
use std::time::Duration;

use trustchain_core::KeyHash;

/// Per-chain settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Signing key hashes with write authority at the top of every tree.
    #[serde(deserialize_with = "hex_key_set")]
    pub root_keys: BTreeSet<KeyHash>,
    /// Default wait for a sync barrier.
    pub sync_timeout_ms: u64,
    /// Default wait for the initial replay.
    pub load_timeout_ms: u64,
    /// Rejections kept in the audit list before the oldest are dropped.
    pub max_rejections: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            root_keys: BTreeSet::new(),
            sync_timeout_ms: 5_000,
            load_timeout_ms: 10_000,
            max_rejections: 1_024,
        }
    }
}

impl ChainConfig {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn with_root(mut self, key: KeyHash) -> Self {
        self.root_keys.insert(key);
        self
    }
}

/// Registry cache bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Open chains kept before the least recently used is evicted.
    pub capacity: usize,
    /// Idle time after which a chain is evicted.
    pub ttl_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            ttl_ms: 300_000,
        }
    }
}

impl RegistryConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

fn hex_key_set<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeSet<KeyHash>, D::Error> {
    let raw = Vec::<String>::deserialize(d)?;
    raw.iter()
        .map(|s| KeyHash::from_hex(s).map_err(serde::de::Error::custom))
        .collect()
}
