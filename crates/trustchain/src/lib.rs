//! # trustchain
//!
//! A partitioned, encrypted, append-only store of typed entities.
//!
//! Every write is a signed record appended to the log of one partition.
//! Each process replays those logs into [`PartitionChain`]s, which only admit
//! records that are well formed, legally placed in the entity tree and
//! authored by a key with write rights. Payloads are sealed under content
//! keys, and content keys are wrapped for every reader entitled to them.
//!
//! ```ignore
//! let store = TrustStore::new(schema, RamNetwork::new(), StoreConfig::default());
//! let scope = store.scope(identity, vec![reader]);
//! let mut io = store.io(&PartitionKey::new("ledger", 0)?, scope).await?;
//!
//! let mut account = Obj::new(Account::new("alice", 100));
//! io.grant_read(&mut account, &reader_public)?;
//! io.merge(&mut account).await?;
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod obj;
pub mod scope;
pub mod trust;

use std::sync::Arc;

use trustchain_bridge::BridgeFactory;
use trustchain_core::{Keypair, PartitionKey, Schema};
use trustchain_partition::{Registry, SeedHook};
use trustchain_perms::ReaderKeyPair;

pub use config::StoreConfig;
pub use error::{Result, TrustError};
pub use io::Io;
pub use obj::Obj;
pub use scope::Scope;
pub use trust::{EncryptKey, Trust};

pub use trustchain_partition::{ChainStatus, HistoryEntry, PartitionChain, Rejection};

/// Entry point: a chain registry plus the configuration scopes are built
/// with.
#[derive(Debug)]
pub struct TrustStore {
    registry: Registry,
    config: StoreConfig,
}

impl TrustStore {
    pub fn new(
        schema: impl Into<Arc<Schema>>,
        factory: Arc<dyn BridgeFactory>,
        config: StoreConfig,
    ) -> Self {
        Self::build(schema.into(), factory, config, None)
    }

    /// Like [`new`](Self::new), seeding every chain opened with the hook's
    /// records before it subscribes.
    pub fn with_seed_hook(
        schema: impl Into<Arc<Schema>>,
        factory: Arc<dyn BridgeFactory>,
        config: StoreConfig,
        hook: Arc<dyn SeedHook>,
    ) -> Self {
        Self::build(schema.into(), factory, config, Some(hook))
    }

    fn build(
        schema: Arc<Schema>,
        factory: Arc<dyn BridgeFactory>,
        config: StoreConfig,
        hook: Option<Arc<dyn SeedHook>>,
    ) -> Self {
        let mut builder = Registry::builder(schema, factory)
            .config(config.registry.clone())
            .chain_config(config.chain.clone())
            .bridge_config(config.bridge.clone());
        if let Some(hook) = hook {
            builder = builder.seed_hook(hook);
        }
        Self {
            registry: builder.build(),
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// A caller identity: the key it signs with and the reader keys it
    /// decrypts with.
    pub fn scope(&self, identity: Keypair, read_keys: Vec<ReaderKeyPair>) -> Arc<Scope> {
        Arc::new(Scope::new(identity, read_keys, self.config.resolver.clone()))
    }

    /// Open `key`, wait for its initial replay, and bind it to `scope`.
    pub async fn io(&self, key: &PartitionKey, scope: Arc<Scope>) -> Result<Io> {
        let chain = self.registry.get_or_create(key, true).await?;
        Ok(Io::new(chain, scope))
    }

    /// Stop every open chain.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
