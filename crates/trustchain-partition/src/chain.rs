//! Partition chain: replay and materialization of one partition log.
//!
//! The chain is the bridge's [`RecordSink`]. Every delivered record is
//! checked against the context-free rules in [`validate_record`] and then
//! against the materialized state:
//!
//! 1. Redelivered offsets, already applied (id, version) pairs and records
//!    refused before are ignored.
//! 2. Key records must match their deterministic ids. Signing keys must be
//!    self-signed.
//! 3. Entity records must keep their type, sit under a present parent of
//!    the declared type in a legal position, not touch an immutable entity,
//!    and be authored by a key in the effective write set.
//!
//! A refused record is logged, appended to the bounded rejection audit list
//! and otherwise ignored. Replay continues with the next record.
//!
//! Wrapped keys are admitted from any signer, but a wrapped copy only counts
//! towards [`PartitionChain::wrapped_readers`] when its author sealed an
//! entity under that content key or holds write authority over one.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;

use trustchain_bridge::{Bridge, BridgeError, LogEntry, RecordSink};
use trustchain_core::{
    effective, validate_record, Access, Blake3Hash, EntityId, EntityMeta, EntityType, KeyHash,
    PartitionKey, Record, RecordId, RecordKind, Schema, ValidationError, VersionId,
};
use trustchain_perms::{PublicKey, WrappedKey, WrappedKeyIndex};

use crate::config::ChainConfig;
use crate::error::{ChainError, Result};

/// Lifecycle of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    /// Replaying the log present at subscription time.
    Loading,
    /// Caught up. New records are applied as they arrive.
    Ready,
    /// Bridge shut down. No further records are applied.
    Stopped,
}

/// One applied entity record.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Log offset. Zero for records applied through [`PartitionChain::seed`].
    pub offset: u64,
    pub record_id: RecordId,
    pub record: Arc<Record>,
}

impl HistoryEntry {
    pub fn meta(&self) -> &EntityMeta {
        self.record.meta()
    }
}

/// Audit entry for a refused record.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub offset: u64,
    pub record_id: RecordId,
    pub entity: EntityId,
    pub reason: ValidationError,
}

enum Admitted {
    Entity,
    PublicKey(PublicKey),
    WrappedKey(WrappedKey),
}

struct WrappedEntry {
    author: KeyHash,
    record_id: RecordId,
    key: WrappedKey,
}

/// Entities sealed under one content key and the signers that sealed them.
#[derive(Default)]
struct KeyUse {
    entities: BTreeSet<EntityId>,
    authors: BTreeSet<KeyHash>,
}

#[derive(Default)]
struct ChainState {
    entities: BTreeMap<EntityId, HistoryEntry>,
    history: BTreeMap<EntityId, Vec<HistoryEntry>>,
    heads: BTreeMap<EntityId, BTreeSet<VersionId>>,
    applied: HashSet<(EntityId, VersionId)>,
    public_keys: BTreeMap<KeyHash, PublicKey>,
    /// Keyed by (content, reader). Every admitted copy, in apply order.
    wrapped: BTreeMap<(KeyHash, KeyHash), Vec<WrappedEntry>>,
    /// Content hash of each applied wrapped key, in apply order.
    wrapped_log: Vec<KeyHash>,
    key_uses: BTreeMap<KeyHash, KeyUse>,
    /// Never trimmed: a refused record stays refused on redelivery.
    refused: HashSet<RecordId>,
    rejected: HashMap<RecordId, Rejection>,
    audit: VecDeque<RecordId>,
    last_offset: u64,
}

impl ChainState {
    fn apply(
        &mut self,
        partition: &PartitionKey,
        schema: &Schema,
        config: &ChainConfig,
        offset: u64,
        record: Arc<Record>,
    ) {
        if offset > 0 && offset <= self.last_offset {
            return;
        }
        if offset > 0 {
            self.last_offset = offset;
        }

        let entity = record.meta().id;
        let record_id = record.compute_id();
        if self.refused.contains(&record_id) {
            tracing::debug!(%partition, offset, %entity, record = %record_id, "refused record redelivered");
            return;
        }

        match self.admit(schema, &config.root_keys, &record) {
            Ok(admitted) => self.commit(offset, record_id, record, admitted),
            Err(ValidationError::Duplicate { id, version }) => {
                tracing::debug!(%partition, offset, %id, %version, "duplicate record ignored");
            }
            Err(reason) => {
                tracing::warn!(
                    %partition,
                    offset,
                    %entity,
                    record = %record_id,
                    "record rejected: {}",
                    reason
                );
                self.refused.insert(record_id);
                self.record_rejection(
                    config.max_rejections,
                    Rejection {
                        offset,
                        record_id,
                        entity,
                        reason,
                    },
                );
            }
        }
    }

    fn record_rejection(&mut self, capacity: usize, rejection: Rejection) {
        self.audit.push_back(rejection.record_id);
        self.rejected.insert(rejection.record_id, rejection);
        while self.audit.len() > capacity.max(1) {
            if let Some(oldest) = self.audit.pop_front() {
                self.rejected.remove(&oldest);
            }
        }
    }

    fn admit(
        &self,
        schema: &Schema,
        roots: &BTreeSet<KeyHash>,
        record: &Record,
    ) -> std::result::Result<Admitted, ValidationError> {
        validate_record(record)?;

        let meta = record.meta();
        if self.applied.contains(&(meta.id, meta.version)) {
            return Err(ValidationError::Duplicate {
                id: meta.id,
                version: meta.version,
            });
        }

        match record.kind() {
            RecordKind::PublicKey => {
                let key = PublicKey::from_record(record)
                    .map_err(|e| ValidationError::MalformedKey(e.to_string()))?;
                if key.entity_id() != meta.id {
                    return Err(ValidationError::MalformedKey(
                        "public key stored under the wrong id".into(),
                    ));
                }
                if let PublicKey::Signing(signing) = &key {
                    if signing != record.author() {
                        return Err(ValidationError::MalformedKey(
                            "signing keys must be published by their owner".into(),
                        ));
                    }
                }
                Ok(Admitted::PublicKey(key))
            }
            RecordKind::WrappedKey => {
                let wrapped = WrappedKey::from_record(record)
                    .map_err(|e| ValidationError::MalformedKey(e.to_string()))?;
                if wrapped.entity_id() != meta.id {
                    return Err(ValidationError::MalformedKey(
                        "wrapped key stored under the wrong id".into(),
                    ));
                }
                Ok(Admitted::WrappedKey(wrapped))
            }
            RecordKind::Data | RecordKind::Tombstone => {
                self.admit_entity(schema, roots, record)?;
                Ok(Admitted::Entity)
            }
        }
    }

    fn admit_entity(
        &self,
        schema: &Schema,
        roots: &BTreeSet<KeyHash>,
        record: &Record,
    ) -> std::result::Result<(), ValidationError> {
        let meta = record.meta();
        let current = self.entities.get(&meta.id);

        if let Some(current) = current {
            if current.meta().immutable {
                return Err(ValidationError::Immutable(meta.id));
            }
        }
        if let Some(last) = self.history.get(&meta.id).and_then(|h| h.last()) {
            if last.meta().entity_type != meta.entity_type {
                return Err(ValidationError::TypeChanged {
                    id: meta.id,
                    from: last.meta().entity_type.clone(),
                    to: meta.entity_type.clone(),
                });
            }
        }

        if record.kind() == RecordKind::Tombstone {
            if current.is_none() {
                return Err(ValidationError::Structural(format!(
                    "tombstone for absent entity {}",
                    meta.id
                )));
            }
        } else {
            self.check_placement(schema, meta)?;
        }

        // Existing entities answer to their own stored rights; new ones to
        // their parent's.
        let authority = match current {
            Some(_) => self.write_authority(Some(meta.id), roots),
            None => self.write_authority(meta.parent_id(), roots),
        };
        let author = record.author().key_hash();
        if !authority.is_empty() && !authority.contains(&author) {
            return Err(ValidationError::Unauthorized {
                id: meta.id,
                author,
            });
        }
        Ok(())
    }

    fn check_placement(
        &self,
        schema: &Schema,
        meta: &EntityMeta,
    ) -> std::result::Result<(), ValidationError> {
        schema.check_parent(&meta.entity_type, meta.parent.as_ref().map(|p| &p.entity_type))?;

        let Some(link) = &meta.parent else {
            return Ok(());
        };
        if link.id == meta.id {
            return Err(ValidationError::Structural(format!(
                "entity {} cannot be its own parent",
                meta.id
            )));
        }

        let parent = self
            .entities
            .get(&link.id)
            .ok_or(ValidationError::MissingParent(link.id))?;
        let parent_meta = parent.meta();
        if parent_meta.entity_type != link.entity_type {
            return Err(ValidationError::ParentTypeMismatch {
                id: link.id,
                claimed: link.entity_type.clone(),
                actual: parent_meta.entity_type.clone(),
            });
        }
        if !parent_meta.allowed_children.is_empty()
            && !parent_meta.allowed_children.contains(&meta.entity_type)
        {
            return Err(ValidationError::ChildNotAllowed {
                parent: link.id,
                child: meta.entity_type.clone(),
            });
        }
        if self.lineage(link.id).iter().any(|e| e.meta().id == meta.id) {
            return Err(ValidationError::Structural(format!(
                "moving {} under {} creates a cycle",
                meta.id, link.id
            )));
        }
        Ok(())
    }

    fn commit(&mut self, offset: u64, record_id: RecordId, record: Arc<Record>, admitted: Admitted) {
        let meta = record.meta();
        self.applied.insert((meta.id, meta.version));

        match admitted {
            Admitted::PublicKey(key) => {
                self.public_keys.insert(key.key_hash(), key);
            }
            Admitted::WrappedKey(key) => {
                self.wrapped_log.push(key.content);
                self.wrapped
                    .entry((key.content, key.reader))
                    .or_default()
                    .push(WrappedEntry {
                        author: record.author().key_hash(),
                        record_id,
                        key,
                    });
            }
            Admitted::Entity => {
                let id = meta.id;
                let heads = self.heads.entry(id).or_default();
                if let Some(previous) = &meta.previous_version {
                    heads.remove(previous);
                }
                for merged in &meta.merge_versions {
                    heads.remove(merged);
                }
                heads.insert(meta.version);

                if let (RecordKind::Data, Some(content)) = (record.kind(), meta.content_key) {
                    let uses = self.key_uses.entry(content).or_default();
                    uses.entities.insert(id);
                    uses.authors.insert(record.author().key_hash());
                }

                let entry = HistoryEntry {
                    offset,
                    record_id,
                    record: record.clone(),
                };
                self.history.entry(id).or_default().push(entry.clone());
                if record.kind() == RecordKind::Tombstone {
                    self.entities.remove(&id);
                } else {
                    self.entities.insert(id, entry);
                }
            }
        }
    }

    /// Current entity followed by its ancestors, nearest first.
    fn lineage(&self, start: EntityId) -> Vec<&HistoryEntry> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(start);
        while let Some(id) = next {
            if !seen.insert(id) {
                break;
            }
            let Some(entry) = self.entities.get(&id) else {
                break;
            };
            next = entry.meta().parent_id();
            out.push(entry);
        }
        out
    }

    fn write_authority(&self, start: Option<EntityId>, roots: &BTreeSet<KeyHash>) -> BTreeSet<KeyHash> {
        match start {
            Some(id) => effective(
                self.lineage(id).into_iter().map(|e| &e.meta().rights),
                Access::Write,
                roots,
            ),
            None => roots.clone(),
        }
    }

    /// Signers whose wrapped copies of `content` are trusted.
    fn key_authority(&self, content: &KeyHash, roots: &BTreeSet<KeyHash>) -> BTreeSet<KeyHash> {
        let Some(uses) = self.key_uses.get(content) else {
            return BTreeSet::new();
        };
        let mut authority = uses.authors.clone();
        for id in uses.entities.iter().filter(|id| self.entities.contains_key(id)) {
            authority.extend(self.write_authority(Some(*id), roots));
        }
        authority
    }
}

/// Materialized state of one partition.
pub struct PartitionChain {
    key: PartitionKey,
    schema: Arc<Schema>,
    config: ChainConfig,
    bridge: Arc<dyn Bridge>,
    state: RwLock<ChainState>,
    status: watch::Sender<ChainStatus>,
}

impl PartitionChain {
    pub fn new(
        key: PartitionKey,
        schema: Arc<Schema>,
        config: ChainConfig,
        bridge: Arc<dyn Bridge>,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(ChainStatus::Loading);
        Arc::new(Self {
            key,
            schema,
            config,
            bridge,
            state: RwLock::new(ChainState::default()),
            status,
        })
    }

    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn bridge(&self) -> &Arc<dyn Bridge> {
        &self.bridge
    }

    pub fn status(&self) -> ChainStatus {
        *self.status.borrow()
    }

    /// Apply bootstrap records that are not part of the log.
    ///
    /// Seeded records go through the same checks as delivered ones.
    pub fn seed(&self, records: impl IntoIterator<Item = Record>) {
        let mut state = self.state.write().unwrap();
        for record in records {
            state.apply(
                &self.key,
                &self.schema,
                &self.config,
                0,
                Arc::new(record),
            );
        }
    }

    /// Subscribe to the bridge and start replaying.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.status() == ChainStatus::Stopped {
            return Err(ChainError::Stopped(self.key.clone()));
        }
        let sink: Arc<dyn RecordSink> = self.clone();
        self.bridge.subscribe(sink).await?;
        tracing::debug!(partition = %self.key, "chain subscribed");
        Ok(())
    }

    /// Shut the bridge down. The materialized state stays readable.
    pub async fn stop(&self) {
        let previous = self.status.send_replace(ChainStatus::Stopped);
        if previous != ChainStatus::Stopped {
            self.bridge.shutdown().await;
            tracing::info!(partition = %self.key, "chain stopped");
        }
    }

    /// Wait until the initial replay is done.
    pub async fn wait_till_loaded(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.status.subscribe();
        let loaded = async {
            rx.wait_for(|s| *s != ChainStatus::Loading)
                .await
                .map(|s| *s)
        };
        match tokio::time::timeout(timeout, loaded).await {
            Ok(Ok(ChainStatus::Ready)) => Ok(()),
            Ok(_) => Err(ChainError::Stopped(self.key.clone())),
            Err(_) => Err(ChainError::LoadTimeout {
                partition: self.key.clone(),
            }),
        }
    }

    /// Append a record to the log. Does not wait for it to be applied.
    pub async fn send(&self, record: &Record) -> Result<u64> {
        if self.status() == ChainStatus::Stopped {
            return Err(ChainError::Stopped(self.key.clone()));
        }
        Ok(self.bridge.send(record).await?)
    }

    /// Wait until everything in the log right now has been applied.
    pub async fn sync(&self) -> Result<()> {
        self.sync_with_timeout(self.config.sync_timeout()).await
    }

    pub async fn sync_with_timeout(&self, timeout: Duration) -> Result<()> {
        match self.bridge.sync(timeout).await {
            Err(e @ BridgeError::SyncTimeout { .. }) => {
                tracing::warn!(partition = %self.key, "sync barrier timed out: {}", e);
                Err(e.into())
            }
            other => Ok(other?),
        }
    }

    pub fn get(&self, id: &EntityId) -> Option<Arc<Record>> {
        let state = self.state.read().unwrap();
        state.entities.get(id).map(|e| e.record.clone())
    }

    pub fn exists(&self, id: &EntityId) -> bool {
        self.state.read().unwrap().entities.contains_key(id)
    }

    /// True for removed entities too.
    pub fn ever_existed(&self, id: &EntityId) -> bool {
        self.state.read().unwrap().history.contains_key(id)
    }

    pub fn is_immutable(&self, id: &EntityId) -> bool {
        let state = self.state.read().unwrap();
        state
            .entities
            .get(id)
            .map(|e| e.meta().immutable)
            .unwrap_or(false)
    }

    /// Every applied version of `id`, in apply order, tombstones included.
    pub fn history(&self, id: &EntityId) -> Vec<HistoryEntry> {
        let state = self.state.read().unwrap();
        state.history.get(id).cloned().unwrap_or_default()
    }

    /// A specific data version of `id`.
    pub fn version(&self, id: &EntityId, version: &VersionId) -> Option<Arc<Record>> {
        let state = self.state.read().unwrap();
        state.history.get(id).and_then(|entries| {
            entries
                .iter()
                .find(|e| &e.meta().version == version && e.record.kind() == RecordKind::Data)
                .map(|e| e.record.clone())
        })
    }

    /// Versions of `id` no later version has superseded.
    pub fn heads(&self, id: &EntityId) -> BTreeSet<VersionId> {
        let state = self.state.read().unwrap();
        state.heads.get(id).cloned().unwrap_or_default()
    }

    /// Current entities, optionally of one type only.
    pub fn all(&self, entity_type: Option<&EntityType>) -> Vec<Arc<Record>> {
        let state = self.state.read().unwrap();
        state
            .entities
            .values()
            .filter(|e| entity_type.map_or(true, |t| &e.meta().entity_type == t))
            .map(|e| e.record.clone())
            .collect()
    }

    pub fn children(&self, parent: &EntityId) -> Vec<Arc<Record>> {
        let state = self.state.read().unwrap();
        state
            .entities
            .values()
            .filter(|e| e.meta().parent_id().as_ref() == Some(parent))
            .map(|e| e.record.clone())
            .collect()
    }

    /// `id` and its present ancestors, nearest first.
    pub fn lineage(&self, id: &EntityId) -> Vec<Arc<Record>> {
        let state = self.state.read().unwrap();
        state
            .lineage(*id)
            .into_iter()
            .map(|e| e.record.clone())
            .collect()
    }

    /// Effective rights of a stored entity. Root keys join write rights
    /// when the whole lineage inherits.
    pub fn effective_rights(&self, id: &EntityId, access: Access) -> BTreeSet<KeyHash> {
        let none = BTreeSet::new();
        let roots = match access {
            Access::Write => &self.config.root_keys,
            Access::Read => &none,
        };
        let state = self.state.read().unwrap();
        effective(
            state.lineage(*id).into_iter().map(|e| &e.meta().rights),
            access,
            roots,
        )
    }

    pub fn root_keys(&self) -> &BTreeSet<KeyHash> {
        &self.config.root_keys
    }

    pub fn public_key(&self, hash: &KeyHash) -> Option<PublicKey> {
        self.state.read().unwrap().public_keys.get(hash).copied()
    }

    /// Readers holding a wrapped copy of `content` published by a signer
    /// with authority over the entities sealed under it.
    pub fn wrapped_readers(&self, content: &KeyHash) -> BTreeSet<KeyHash> {
        let state = self.state.read().unwrap();
        let authority = state.key_authority(content, &self.config.root_keys);
        state
            .wrapped
            .range((*content, KeyHash::from_bytes([0; 32]))..=(*content, KeyHash::from_bytes([0xff; 32])))
            .filter(|(_, entries)| entries.iter().any(|e| authority.contains(&e.author)))
            .map(|((_, reader), _)| *reader)
            .collect()
    }

    /// Content hashes that gained a wrapped copy after position `mark` of
    /// the wrapped key feed, and the feed's current position.
    pub fn wrapped_since(&self, mark: usize) -> (Vec<KeyHash>, usize) {
        let state = self.state.read().unwrap();
        let log = &state.wrapped_log;
        let fresh = log.get(mark..).unwrap_or_default();
        (fresh.to_vec(), log.len())
    }

    /// Retained rejections, oldest first. At most
    /// [`ChainConfig::max_rejections`] are kept.
    pub fn rejections(&self) -> Vec<Rejection> {
        let state = self.state.read().unwrap();
        state
            .audit
            .iter()
            .filter_map(|id| state.rejected.get(id).cloned())
            .collect()
    }

    /// The retained rejection of one record, if any.
    pub fn rejection(&self, record_id: &RecordId) -> Option<Rejection> {
        self.state.read().unwrap().rejected.get(record_id).cloned()
    }

    pub fn last_offset(&self) -> u64 {
        self.state.read().unwrap().last_offset
    }

    /// Deterministic digest of the materialized state.
    ///
    /// Two chains that applied the same records agree on this hash, whatever
    /// duplicates either of them saw.
    pub fn state_hash(&self) -> Blake3Hash {
        let state = self.state.read().unwrap();
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"trustchain-state-v0:");
        hasher.update(self.key.to_token().as_bytes());

        for (id, entry) in &state.entities {
            hasher.update(id.as_bytes());
            hasher.update(entry.record_id.as_bytes());
        }
        for (id, heads) in &state.heads {
            hasher.update(id.as_bytes());
            for version in heads {
                hasher.update(version.as_bytes());
            }
        }
        for hash in state.public_keys.keys() {
            hasher.update(hash.as_bytes());
        }
        for ((content, reader), entries) in &state.wrapped {
            hasher.update(content.as_bytes());
            hasher.update(reader.as_bytes());
            for entry in entries {
                hasher.update(entry.record_id.as_bytes());
            }
        }

        Blake3Hash(*hasher.finalize().as_bytes())
    }
}

impl RecordSink for PartitionChain {
    fn feed(&self, entries: &[LogEntry]) {
        if self.status() == ChainStatus::Stopped {
            return;
        }
        let mut state = self.state.write().unwrap();
        for entry in entries {
            state.apply(
                &self.key,
                &self.schema,
                &self.config,
                entry.offset,
                entry.record.clone(),
            );
        }
    }

    fn caught_up(&self) {
        let loaded = self.status.send_if_modified(|status| {
            if *status == ChainStatus::Loading {
                *status = ChainStatus::Ready;
                true
            } else {
                false
            }
        });
        if loaded {
            tracing::info!(
                partition = %self.key,
                offset = self.last_offset(),
                "chain loaded"
            );
        }
    }
}

impl WrappedKeyIndex for PartitionChain {
    fn wrapped_keys(&self, reader: &KeyHash, content: &KeyHash) -> Vec<WrappedKey> {
        let state = self.state.read().unwrap();
        state
            .wrapped
            .get(&(*content, *reader))
            .map(|entries| entries.iter().map(|e| e.key.clone()).collect())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for PartitionChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionChain")
            .field("key", &self.key)
            .field("status", &self.status())
            .field("last_offset", &self.last_offset())
            .finish()
    }
}
