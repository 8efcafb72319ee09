//! Registry of open partition chains.
//!
//! Chains are opened on first use and cached. Opening is single-flight: the
//! map holds one [`OnceCell`] per key, inserted under the map lock, so
//! concurrent callers for the same partition await the same construction.
//! Idle chains expire after the configured TTL and the least recently used
//! chain is evicted when the cache is over capacity. Evicted chains are
//! stopped, which shuts their bridge down. Slots still under construction are
//! not evicted, so the cache may briefly run over capacity. A chain whose
//! slot was dropped while it was being built is stopped once it is ready.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::OnceCell;

use trustchain_bridge::{BridgeConfig, BridgeFactory};
use trustchain_core::{PartitionKey, Record, Schema};

use crate::chain::PartitionChain;
use crate::config::{ChainConfig, RegistryConfig};
use crate::error::Result;

/// Supplies bootstrap records for a freshly created chain.
///
/// Seeded records are applied before the chain subscribes to its bridge and
/// are never written to the log.
pub trait SeedHook: Send + Sync {
    fn seed(&self, key: &PartitionKey) -> Vec<Record>;
}

struct Slot {
    cell: Arc<OnceCell<Arc<PartitionChain>>>,
    last_access: Instant,
}

/// Bounded cache of partition chains.
pub struct Registry {
    schema: Arc<Schema>,
    factory: Arc<dyn BridgeFactory>,
    config: RegistryConfig,
    chain_config: ChainConfig,
    bridge_config: BridgeConfig,
    seed_hook: Option<Arc<dyn SeedHook>>,
    slots: Mutex<HashMap<PartitionKey, Slot>>,
    constructions: AtomicU64,
}

/// Builder for [`Registry`].
pub struct RegistryBuilder {
    schema: Arc<Schema>,
    factory: Arc<dyn BridgeFactory>,
    config: RegistryConfig,
    chain_config: ChainConfig,
    bridge_config: BridgeConfig,
    seed_hook: Option<Arc<dyn SeedHook>>,
}

impl RegistryBuilder {
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn chain_config(mut self, config: ChainConfig) -> Self {
        self.chain_config = config;
        self
    }

    pub fn bridge_config(mut self, config: BridgeConfig) -> Self {
        self.bridge_config = config;
        self
    }

    pub fn seed_hook(mut self, hook: Arc<dyn SeedHook>) -> Self {
        self.seed_hook = Some(hook);
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            schema: self.schema,
            factory: self.factory,
            config: self.config,
            chain_config: self.chain_config,
            bridge_config: self.bridge_config,
            seed_hook: self.seed_hook,
            slots: Mutex::new(HashMap::new()),
            constructions: AtomicU64::new(0),
        }
    }
}

impl Registry {
    pub fn builder(schema: impl Into<Arc<Schema>>, factory: Arc<dyn BridgeFactory>) -> RegistryBuilder {
        RegistryBuilder {
            schema: schema.into(),
            factory,
            config: RegistryConfig::default(),
            chain_config: ChainConfig::default(),
            bridge_config: BridgeConfig::default(),
            seed_hook: None,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn chain_config(&self) -> &ChainConfig {
        &self.chain_config
    }

    /// Get the chain for `key`, opening it if needed.
    ///
    /// With `should_wait` the call also waits for the initial replay.
    pub async fn get_or_create(
        &self,
        key: &PartitionKey,
        should_wait: bool,
    ) -> Result<Arc<PartitionChain>> {
        let (cell, evicted) = {
            let mut slots = self.slots.lock().unwrap();
            let now = Instant::now();
            let mut evicted = self.take_expired(&mut slots, now, Some(key));
            let cell = match slots.get_mut(key) {
                Some(slot) => {
                    slot.last_access = now;
                    slot.cell.clone()
                }
                None => {
                    let cell = Arc::new(OnceCell::new());
                    slots.insert(
                        key.clone(),
                        Slot {
                            cell: cell.clone(),
                            last_access: now,
                        },
                    );
                    evicted.extend(self.take_overflow(&mut slots, key));
                    cell
                }
            };
            (cell, evicted)
        };
        stop_all(evicted).await;

        let chain = cell
            .get_or_try_init(|| self.construct(key))
            .await?
            .clone();
        if !self.holds(key, &cell) {
            tracing::debug!(partition = %key, "chain dropped from registry while opening");
            chain.stop().await;
        }
        if should_wait {
            chain
                .wait_till_loaded(self.chain_config.load_timeout())
                .await?;
        }
        Ok(chain)
    }

    /// Drop `key` from the cache and stop its chain.
    pub async fn evict(&self, key: &PartitionKey) -> bool {
        let slot = self.slots.lock().unwrap().remove(key);
        match slot {
            Some(slot) => {
                stop_all(slot.cell.get().cloned()).await;
                true
            }
            None => false,
        }
    }

    /// Evict every chain idle for longer than the TTL.
    pub async fn evict_expired(&self) -> usize {
        let evicted = {
            let mut slots = self.slots.lock().unwrap();
            self.take_expired(&mut slots, Instant::now(), None)
        };
        let count = evicted.len();
        stop_all(evicted).await;
        count
    }

    /// Stop and forget every chain.
    pub async fn shutdown(&self) {
        let slots: Vec<Slot> = self.slots.lock().unwrap().drain().map(|(_, s)| s).collect();
        stop_all(slots.iter().filter_map(|s| s.cell.get().cloned())).await;
    }

    pub fn contains(&self, key: &PartitionKey) -> bool {
        self.slots.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn holds(&self, key: &PartitionKey, cell: &Arc<OnceCell<Arc<PartitionChain>>>) -> bool {
        let slots = self.slots.lock().unwrap();
        slots.get(key).is_some_and(|s| Arc::ptr_eq(&s.cell, cell))
    }

    /// How many chains have been constructed over the registry's lifetime.
    pub fn construction_count(&self) -> u64 {
        self.constructions.load(Ordering::Relaxed)
    }

    async fn construct(&self, key: &PartitionKey) -> Result<Arc<PartitionChain>> {
        self.constructions.fetch_add(1, Ordering::Relaxed);
        let bridge = self.factory.open(key, &self.bridge_config)?;
        let chain = PartitionChain::new(
            key.clone(),
            self.schema.clone(),
            self.chain_config.clone(),
            bridge,
        );
        if let Some(hook) = &self.seed_hook {
            chain.seed(hook.seed(key));
        }
        chain.start().await?;
        tracing::info!(partition = %key, "partition chain opened");
        Ok(chain)
    }

    fn take_expired(
        &self,
        slots: &mut HashMap<PartitionKey, Slot>,
        now: Instant,
        keep: Option<&PartitionKey>,
    ) -> Vec<Arc<PartitionChain>> {
        let ttl = self.config.ttl();
        let expired: Vec<PartitionKey> = slots
            .iter()
            .filter(|(k, s)| {
                Some(*k) != keep && s.cell.initialized() && now.duration_since(s.last_access) > ttl
            })
            .map(|(k, _)| k.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|k| {
                tracing::debug!(partition = %k, "evicting idle chain");
                slots.remove(&k).and_then(|s| s.cell.get().cloned())
            })
            .collect()
    }

    fn take_overflow(
        &self,
        slots: &mut HashMap<PartitionKey, Slot>,
        keep: &PartitionKey,
    ) -> Vec<Arc<PartitionChain>> {
        let mut evicted = Vec::new();
        while slots.len() > self.config.capacity.max(1) {
            let oldest = slots
                .iter()
                .filter(|(k, s)| *k != keep && s.cell.initialized())
                .min_by_key(|(_, s)| s.last_access)
                .map(|(k, _)| k.clone());
            let Some(oldest) = oldest else {
                break;
            };
            tracing::debug!(partition = %oldest, "evicting least recently used chain");
            if let Some(chain) = slots.remove(&oldest).and_then(|s| s.cell.get().cloned()) {
                evicted.push(chain);
            }
        }
        evicted
    }
}

async fn stop_all(chains: impl IntoIterator<Item = Arc<PartitionChain>>) {
    for chain in chains {
        chain.stop().await;
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("open", &self.len())
            .field("constructions", &self.construction_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use trustchain_bridge::{Bridge, BridgeError, RamNetwork};
    use trustchain_testkit::{partition, sample_schema, Party};

    use crate::chain::ChainStatus;

    fn registry(network: Arc<RamNetwork>, config: RegistryConfig) -> Registry {
        Registry::builder(sample_schema(), network)
            .config(config)
            .build()
    }

    #[tokio::test]
    async fn test_single_flight_open() {
        let registry = Arc::new(registry(RamNetwork::new(), RegistryConfig::default()));
        let key = partition("accounts", 0);

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let key = key.clone();
                tokio::spawn(async move { registry.get_or_create(&key, true).await.unwrap() })
            })
            .collect();

        let mut chains = Vec::new();
        for task in tasks {
            chains.push(task.await.unwrap());
        }

        assert_eq!(registry.construction_count(), 1);
        assert!(chains.iter().all(|c| Arc::ptr_eq(c, &chains[0])));
        assert_eq!(chains[0].status(), ChainStatus::Ready);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let config = RegistryConfig {
            capacity: 2,
            ..Default::default()
        };
        let registry = registry(RamNetwork::new(), config);
        let first = registry
            .get_or_create(&partition("p", 1), true)
            .await
            .unwrap();
        registry.get_or_create(&partition("p", 2), true).await.unwrap();
        registry.get_or_create(&partition("p", 3), true).await.unwrap();

        assert_eq!(registry.len(), 2);
        assert!(!registry.contains(&partition("p", 1)));
        assert_eq!(first.status(), ChainStatus::Stopped);
    }

    #[tokio::test]
    async fn test_idle_chains_expire() {
        let config = RegistryConfig {
            ttl_ms: 20,
            ..Default::default()
        };
        let registry = registry(RamNetwork::new(), config);
        let idle = registry
            .get_or_create(&partition("p", 1), true)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        registry.get_or_create(&partition("p", 2), true).await.unwrap();
        assert!(!registry.contains(&partition("p", 1)));
        assert_eq!(idle.status(), ChainStatus::Stopped);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(registry.evict_expired().await, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_after_evict_constructs_again() {
        let registry = registry(RamNetwork::new(), RegistryConfig::default());
        let key = partition("p", 0);
        let before = registry.get_or_create(&key, true).await.unwrap();
        assert!(registry.evict(&key).await);
        let after = registry.get_or_create(&key, true).await.unwrap();

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(registry.construction_count(), 2);
    }

    /// Seeds nothing, but holds up construction of one partition.
    struct SlowOpen(PartitionKey);

    impl SeedHook for SlowOpen {
        fn seed(&self, key: &PartitionKey) -> Vec<Record> {
            if key == &self.0 {
                std::thread::sleep(Duration::from_millis(200));
            }
            Vec::new()
        }
    }

    fn slow_registry(slow: &PartitionKey, capacity: usize) -> Arc<Registry> {
        Arc::new(
            Registry::builder(sample_schema(), RamNetwork::new())
                .config(RegistryConfig {
                    capacity,
                    ..Default::default()
                })
                .seed_hook(Arc::new(SlowOpen(slow.clone())))
                .build(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_opening_chain_is_not_evicted() {
        let (slow, fast) = (partition("p", 1), partition("p", 2));
        let registry = slow_registry(&slow, 1);

        let opening = {
            let registry = registry.clone();
            let slow = slow.clone();
            tokio::spawn(async move { registry.get_or_create(&slow, true).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let other = registry.get_or_create(&fast, true).await.unwrap();
        let first = opening.await.unwrap();

        assert!(registry.contains(&slow) && registry.contains(&fast));
        assert_eq!(first.status(), ChainStatus::Ready);
        assert_eq!(other.status(), ChainStatus::Ready);

        // Once both are built, the next open trims back to capacity.
        registry.get_or_create(&partition("p", 3), true).await.unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(first.status(), ChainStatus::Stopped);
        assert_eq!(other.status(), ChainStatus::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_chain_evicted_while_opening_is_stopped() {
        let slow = partition("p", 1);
        let registry = slow_registry(&slow, 8);

        let opening = {
            let registry = registry.clone();
            let slow = slow.clone();
            tokio::spawn(async move { registry.get_or_create(&slow, false).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.evict(&slow).await);

        let orphan = opening.await.unwrap();
        assert!(!registry.contains(&slow));
        assert_eq!(orphan.status(), ChainStatus::Stopped);
    }

    #[tokio::test]
    async fn test_concurrent_opens_over_capacity() {
        let registry = Arc::new(registry(
            RamNetwork::new(),
            RegistryConfig {
                capacity: 1,
                ..Default::default()
            },
        ));
        let tasks: Vec<_> = (0..2)
            .map(|n| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry.get_or_create(&partition("p", n), false).await.unwrap()
                })
            })
            .collect();

        let mut chains = Vec::new();
        for task in tasks {
            chains.push(task.await.unwrap());
        }
        assert_eq!(registry.construction_count(), 2);
        for chain in &chains {
            assert!(registry.contains(chain.key()) || chain.status() == ChainStatus::Stopped);
        }
    }

    struct PublishKeys(Party);

    impl SeedHook for PublishKeys {
        fn seed(&self, _key: &PartitionKey) -> Vec<Record> {
            self.0.key_records()
        }
    }

    #[tokio::test]
    async fn test_seed_hook_runs_before_replay() {
        let party = Party::new(3);
        let registry = Registry::builder(sample_schema(), RamNetwork::new())
            .seed_hook(Arc::new(PublishKeys(party.clone())))
            .build();
        let chain = registry
            .get_or_create(&partition("p", 0), true)
            .await
            .unwrap();

        assert!(chain.public_key(&party.read_hash()).is_some());
        assert_eq!(chain.last_offset(), 0);
    }

    struct Unavailable;

    impl BridgeFactory for Unavailable {
        fn open(
            &self,
            key: &PartitionKey,
            _config: &BridgeConfig,
        ) -> trustchain_bridge::Result<Arc<dyn Bridge>> {
            Err(BridgeError::Closed(key.to_token()))
        }
    }

    #[tokio::test]
    async fn test_failed_open_is_retried() {
        let registry = Registry::builder(sample_schema(), Arc::new(Unavailable)).build();
        let key = partition("p", 0);
        assert!(registry.get_or_create(&key, true).await.is_err());
        assert!(registry.get_or_create(&key, true).await.is_err());
        assert_eq!(registry.construction_count(), 2);
    }
}
