//! Store configuration.
//!
//! Every section is optional. Missing values fall back to their defaults.
//!
//! ```toml
//! [registry]
//! capacity = 16
//! ttl_ms = 60000
//!
//! [chain]
//! root_keys = ["5d1c...e0"]
//! sync_timeout_ms = 2000
//!
//! [bridge]
//! poll_interval_ms = 25
//!
//! [resolver]
//! max_key_generation_attempts = 5
//! ```

use serde::Deserialize;

use trustchain_bridge::BridgeConfig;
use trustchain_partition::{ChainConfig, RegistryConfig};
use trustchain_perms::ResolverConfig;

use crate::error::{Result, TrustError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub bridge: BridgeConfig,
    pub chain: ChainConfig,
    pub registry: RegistryConfig,
    pub resolver: ResolverConfig,
}

impl StoreConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| TrustError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = StoreConfig::from_toml_str("").unwrap();
        assert_eq!(config.registry.capacity, 64);
        assert_eq!(config.resolver.max_key_generation_attempts, 3);
        assert!(config.chain.root_keys.is_empty());
    }

    #[test]
    fn test_partial_sections() {
        let root = "ab".repeat(32);
        let config = StoreConfig::from_toml_str(&format!(
            r#"
            [registry]
            capacity = 4

            [chain]
            root_keys = ["{root}"]

            [resolver]
            max_key_generation_attempts = 7
            "#
        ))
        .unwrap();

        assert_eq!(config.registry.capacity, 4);
        assert_eq!(config.registry.ttl_ms, 300_000);
        assert_eq!(config.chain.root_keys.len(), 1);
        assert_eq!(config.chain.sync_timeout_ms, 5_000);
        assert_eq!(config.resolver.max_key_generation_attempts, 7);
        assert_eq!(config.bridge.batch_size, 256);
    }

    #[test]
    fn test_bad_root_key_is_rejected() {
        let err = StoreConfig::from_toml_str("[chain]\nroot_keys = [\"nothex\"]").unwrap_err();
        assert!(matches!(err, TrustError::Config(_)));
    }
}
