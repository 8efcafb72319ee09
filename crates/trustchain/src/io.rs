//! Request-scoped access to one partition.
//!
//! An [`Io`] pairs a partition chain with the caller's [`Scope`]. It owns a
//! request cache, consulted before the chain, and a queue of deferred writes.
//! Neither is shared, so neither is locked.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use trustchain_core::{
    Access, Entity, EntityId, EntityMeta, EntityType, HasRights, KeyHash, PartitionKey, Record,
    RecordBuilder, RecordId, ValidationError, VersionId,
};
use trustchain_partition::{HistoryEntry, PartitionChain};
use trustchain_perms::{PublicKey, ReaderPublicKey, SealedPayload};

use crate::error::{Result, TrustError};
use crate::obj::Obj;
use crate::scope::Scope;
use crate::trust::Trust;

struct Cached {
    meta: EntityMeta,
    body: Vec<u8>,
}

struct Deferred {
    meta: EntityMeta,
    body: Vec<u8>,
    stored: bool,
}

struct Written {
    meta: EntityMeta,
    record_id: RecordId,
}

pub struct Io {
    chain: Arc<PartitionChain>,
    scope: Arc<Scope>,
    cache: HashMap<EntityId, Cached>,
    deferred: Vec<Deferred>,
    staged_readers: HashMap<KeyHash, ReaderPublicKey>,
    staged_records: Vec<Record>,
    /// Position in the chain's wrapped key feed seen by the last sync.
    wrapped_mark: AtomicUsize,
}

impl Io {
    pub fn new(chain: Arc<PartitionChain>, scope: Arc<Scope>) -> Self {
        Self {
            chain,
            scope,
            cache: HashMap::new(),
            deferred: Vec::new(),
            staged_readers: HashMap::new(),
            staged_records: Vec::new(),
            wrapped_mark: AtomicUsize::new(0),
        }
    }

    /// The chain behind this facade.
    pub fn backend(&self) -> &Arc<PartitionChain> {
        &self.chain
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    pub fn partition(&self) -> &PartitionKey {
        self.chain.key()
    }

    pub fn trust(&self) -> Trust<'_> {
        Trust::new(&self.chain, &self.scope).with_staged(&self.staged_readers)
    }

    // ---- writes ----

    /// Validate, seal, sign and send `obj`, then wait until the chain has
    /// applied it.
    pub async fn merge<T: Entity>(&mut self, obj: &mut Obj<T>) -> Result<()> {
        self.write(obj, true, true).await
    }

    /// Like [`merge`](Self::merge) without the sync barrier.
    pub async fn merge_async<T: Entity>(&mut self, obj: &mut Obj<T>) -> Result<()> {
        self.write(obj, true, false).await
    }

    /// Like [`merge`](Self::merge) without the local type, parent and
    /// immutability assertions. The chain still checks everything on replay.
    pub async fn merge_without_validation<T: Entity>(&mut self, obj: &mut Obj<T>) -> Result<()> {
        self.write(obj, false, true).await
    }

    /// Queue `obj` for the next [`merge_deferred`](Self::merge_deferred).
    ///
    /// The value is captured now. Later changes to `obj` are not included.
    pub fn merge_later<T: Entity>(&mut self, obj: &Obj<T>) -> Result<()> {
        self.deferred.push(Deferred {
            meta: obj.meta().clone(),
            body: encode(obj.data())?,
            stored: obj.is_stored(),
        });
        Ok(())
    }

    /// Write every queued object in order, then sync once.
    ///
    /// An object queued more than once becomes successive versions. The
    /// first failure aborts the rest of the batch. Writes already sent stay
    /// in the log.
    pub async fn merge_deferred(&mut self) -> Result<Vec<EntityMeta>> {
        let queue = std::mem::take(&mut self.deferred);
        let total = queue.len();
        let mut written: Vec<Written> = Vec::with_capacity(total);
        let mut last_version: HashMap<EntityId, VersionId> = HashMap::new();

        for mut item in queue {
            if let Some(version) = last_version.get(&item.meta.id) {
                item.meta.version = *version;
                item.meta.merge_versions.clear();
                item.stored = true;
            }
            match self.write_raw(item.meta, item.body, item.stored, true).await {
                Ok(w) => {
                    last_version.insert(w.meta.id, w.meta.version);
                    written.push(w);
                }
                Err(e) => {
                    tracing::warn!(
                        partition = %self.chain.key(),
                        sent = written.len(),
                        total,
                        "deferred batch aborted: {}",
                        e
                    );
                    return Err(TrustError::TransactionAborted(Box::new(e)));
                }
            }
        }

        if !written.is_empty() {
            let settled = match self.sync().await {
                Ok(()) => written.iter().try_for_each(|w| self.check_accepted(&w.record_id)),
                Err(e) => Err(e),
            };
            settled.map_err(|e| TrustError::TransactionAborted(Box::new(e)))?;
        }
        Ok(written.into_iter().map(|w| w.meta).collect())
    }

    /// Drop every queued write. Returns how many were dropped.
    pub fn clear_deferred(&mut self) -> usize {
        let dropped = self.deferred.len();
        self.deferred.clear();
        dropped
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Tombstone `obj` and wait for the chain to apply it.
    pub async fn remove<T: Entity>(&mut self, obj: &Obj<T>) -> Result<()> {
        let id = obj.id();
        let stored = self.chain.get(&id).ok_or_else(|| TrustError::NotFound {
            id,
            type_name: T::TYPE_NAME.to_string(),
        })?;
        let mut meta = stored.meta().clone();
        check_type::<T>(&id, &meta.entity_type)?;
        if meta.immutable {
            return Err(TrustError::Immutable(id));
        }

        meta.advance();
        meta.merge_versions.clear();
        meta.content_key = None;
        let record = RecordBuilder::tombstone(meta).sign(self.scope.identity());
        self.chain.send(&record).await?;
        self.sync().await?;
        self.check_accepted(&record.compute_id())?;
        self.cache.remove(&id);
        tracing::debug!(partition = %self.chain.key(), entity = %id, "entity removed");
        Ok(())
    }

    async fn write<T: Entity>(&mut self, obj: &mut Obj<T>, validate: bool, wait: bool) -> Result<()> {
        let body = encode(obj.data())?;
        let written = self
            .write_raw(obj.meta().clone(), body, obj.is_stored(), validate)
            .await?;
        if wait {
            self.sync().await?;
            self.check_accepted(&written.record_id)?;
        }
        obj.set_meta(written.meta);
        Ok(())
    }

    async fn write_raw(
        &mut self,
        mut meta: EntityMeta,
        body: Vec<u8>,
        stored: bool,
        validate: bool,
    ) -> Result<Written> {
        if validate {
            self.validate(&meta)?;
        }
        if stored || self.chain.ever_existed(&meta.id) {
            meta.advance();
        }

        let (payload, key_records, new_key) = match self.trust().get_encrypt_key(&meta, true, true)? {
            Some(encrypt) => {
                meta.content_key = Some(encrypt.key.hash());
                let sealed = SealedPayload::seal(&body, &encrypt.key)?;
                (sealed.to_bytes()?, encrypt.records, encrypt.created)
            }
            None => {
                meta.content_key = None;
                (body.clone(), Vec::new(), false)
            }
        };

        let mut outgoing = std::mem::take(&mut self.staged_records);
        outgoing.extend(key_records);
        for record in &outgoing {
            self.chain.send(record).await?;
        }

        let record = RecordBuilder::data(meta.clone(), payload).sign(self.scope.identity());
        let offset = self.chain.send(&record).await?;
        tracing::debug!(
            partition = %self.chain.key(),
            entity = %meta.id,
            version = %meta.version,
            offset,
            sealed = meta.content_key.is_some(),
            new_key,
            "entity sent"
        );

        meta.merge_versions.clear();
        self.cache.insert(
            meta.id,
            Cached {
                meta: meta.clone(),
                body,
            },
        );
        Ok(Written {
            meta,
            record_id: record.compute_id(),
        })
    }

    fn validate(&self, meta: &EntityMeta) -> Result<()> {
        let schema = self.chain.schema();
        schema.check_parent(&meta.entity_type, meta.parent.as_ref().map(|p| &p.entity_type))?;

        if let Some(link) = &meta.parent {
            let actual = self
                .known_type(&link.id)
                .ok_or(ValidationError::MissingParent(link.id))?;
            if actual != link.entity_type {
                return Err(ValidationError::ParentTypeMismatch {
                    id: link.id,
                    claimed: link.entity_type.clone(),
                    actual,
                }
                .into());
            }
        }

        if let Some(stored) = self.chain.get(&meta.id) {
            let stored = stored.meta();
            if stored.immutable {
                return Err(TrustError::Immutable(meta.id));
            }
            if stored.entity_type != meta.entity_type {
                return Err(TrustError::TypeMismatch {
                    id: meta.id,
                    expected: meta.entity_type.clone(),
                    actual: stored.entity_type.clone(),
                });
            }
        }
        Ok(())
    }

    fn known_type(&self, id: &EntityId) -> Option<EntityType> {
        if let Some(cached) = self.cache.get(id) {
            return Some(cached.meta.entity_type.clone());
        }
        self.chain.get(id).map(|r| r.meta().entity_type.clone())
    }

    /// Surface a replay rejection of our own record to the writer.
    fn check_accepted(&mut self, record_id: &RecordId) -> Result<()> {
        match self.chain.rejection(record_id) {
            Some(rejection) => {
                self.cache.remove(&rejection.entity);
                Err(TrustError::Validation(rejection.reason))
            }
            None => Ok(()),
        }
    }

    // ---- rights ----

    /// Publish `reader` if needed and grant it read rights on `obj`.
    /// Takes effect when `obj` is next written.
    pub fn grant_read<T: Entity>(&mut self, obj: &mut Obj<T>, reader: &ReaderPublicKey) -> Result<()> {
        self.stage_reader(reader)?;
        obj.rights_mut().grant(Access::Read, reader.key_hash());
        Ok(())
    }

    /// Named read delegation.
    pub fn allow_read<T: Entity>(
        &mut self,
        obj: &mut Obj<T>,
        alias: &str,
        reader: &ReaderPublicKey,
    ) -> Result<()> {
        self.stage_reader(reader)?;
        obj.rights_mut().allow(Access::Read, alias, reader.key_hash());
        Ok(())
    }

    /// Drop a named read delegation. Returns the reader it named.
    pub fn disallow_read<T: Entity>(&self, obj: &mut Obj<T>, alias: &str) -> Option<KeyHash> {
        obj.rights_mut().disallow(Access::Read, alias)
    }

    pub fn revoke_read<T: Entity>(&self, obj: &mut Obj<T>, reader: &KeyHash) -> bool {
        obj.rights_mut().revoke(Access::Read, reader)
    }

    pub fn grant_write<T: Entity>(&self, obj: &mut Obj<T>, writer: &KeyHash) -> bool {
        obj.rights_mut().grant(Access::Write, *writer)
    }

    pub fn revoke_write<T: Entity>(&self, obj: &mut Obj<T>, writer: &KeyHash) -> bool {
        obj.rights_mut().revoke(Access::Write, writer)
    }

    /// Turn read inheritance on or off. Turning it off keeps whatever `obj`
    /// currently inherits as explicit grants.
    pub fn set_inherit_read<T: Entity>(&self, obj: &mut Obj<T>, inherit: bool) {
        self.set_inherit(obj, Access::Read, inherit);
    }

    pub fn set_inherit_write<T: Entity>(&self, obj: &mut Obj<T>, inherit: bool) {
        self.set_inherit(obj, Access::Write, inherit);
    }

    fn set_inherit<T: Entity>(&self, obj: &mut Obj<T>, access: Access, inherit: bool) {
        if inherit {
            obj.rights_mut().resume(access);
            return;
        }
        if !obj.rights().inherits(access) {
            return;
        }
        let trust = self.trust();
        let inherited = match trust.get_parent(obj.meta()) {
            Some(parent) => match access {
                Access::Read => trust.effective_read(&parent),
                Access::Write => trust.effective_write(&parent),
            },
            None => BTreeSet::new(),
        };
        obj.rights_mut().sever(access, &inherited);
    }

    fn stage_reader(&mut self, reader: &ReaderPublicKey) -> Result<()> {
        let hash = reader.key_hash();
        if self.chain.public_key(&hash).is_some() || self.staged_readers.contains_key(&hash) {
            return Ok(());
        }
        let record = PublicKey::from(*reader).to_record(self.scope.identity())?;
        self.staged_records.push(record);
        self.staged_readers.insert(hash, *reader);
        Ok(())
    }

    // ---- request cache ----

    /// Put `obj` in the request cache without writing it.
    pub fn cache<T: Entity>(&mut self, obj: &Obj<T>) -> Result<()> {
        self.cache.insert(
            obj.id(),
            Cached {
                meta: obj.meta().clone(),
                body: encode(obj.data())?,
            },
        );
        Ok(())
    }

    pub fn decache(&mut self, id: &EntityId) -> bool {
        self.cache.remove(id).is_some()
    }

    // ---- reads ----

    pub fn exists(&self, id: &EntityId) -> bool {
        self.cache.contains_key(id) || self.chain.exists(id)
    }

    /// True for removed entities too.
    pub fn ever_existed(&self, id: &EntityId) -> bool {
        self.cache.contains_key(id) || self.chain.ever_existed(id)
    }

    pub fn immutable(&self, id: &EntityId) -> bool {
        match self.cache.get(id) {
            Some(cached) => cached.meta.immutable,
            None => self.chain.is_immutable(id),
        }
    }

    /// The object, or `None` if it is absent or this scope cannot open it.
    pub fn get_or_null<T: Entity>(&self, id: &EntityId) -> Result<Option<Obj<T>>> {
        if let Some(cached) = self.cache.get(id) {
            check_type::<T>(id, &cached.meta.entity_type)?;
            return Ok(Some(Obj::from_stored(
                cached.meta.clone(),
                decode(&cached.body)?,
            )));
        }
        match self.chain.get(id) {
            Some(record) => self.open(&record),
            None => Ok(None),
        }
    }

    /// The object. Absent objects are [`TrustError::NotFound`], unreadable
    /// ones [`TrustError::AuthorityMissing`].
    pub fn get<T: Entity>(&self, id: &EntityId) -> Result<Obj<T>> {
        match self.get_or_null::<T>(id)? {
            Some(obj) => Ok(obj),
            None if self.exists(id) => Err(TrustError::AuthorityMissing { id: *id }),
            None => Err(TrustError::NotFound {
                id: *id,
                type_name: T::TYPE_NAME.to_string(),
            }),
        }
    }

    /// Every present, readable object among `ids`.
    pub fn get_many<T: Entity>(&self, ids: &[EntityId]) -> Result<Vec<Obj<T>>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(obj) = self.get_or_null(id)? {
                out.push(obj);
            }
        }
        Ok(out)
    }

    /// Every readable object of type `T` in the partition.
    pub fn get_all<T: Entity>(&self) -> Result<Vec<Obj<T>>> {
        let mut out = Vec::new();
        for record in self.chain.all(Some(&T::entity_type())) {
            if let Some(obj) = self.open(&record)? {
                out.push(obj);
            }
        }
        Ok(out)
    }

    /// Current records as stored, sealed payloads included.
    pub fn get_all_raw(&self, entity_type: Option<&EntityType>) -> Vec<Arc<Record>> {
        self.chain.all(entity_type)
    }

    pub fn get_history(&self, id: &EntityId) -> Vec<HistoryEntry> {
        self.chain.history(id)
    }

    pub fn get_version_or_null<T: Entity>(
        &self,
        id: &EntityId,
        version: &VersionId,
    ) -> Result<Option<Obj<T>>> {
        match self.chain.version(id, version) {
            Some(record) => self.open(&record),
            None => Ok(None),
        }
    }

    pub fn heads(&self, id: &EntityId) -> BTreeSet<VersionId> {
        self.chain.heads(id)
    }

    pub fn public_key_or_null(&self, hash: &KeyHash) -> Option<PublicKey> {
        self.staged_readers
            .get(hash)
            .map(|k| PublicKey::from(*k))
            .or_else(|| self.chain.public_key(hash))
    }

    /// Wait for the chain's initial replay.
    pub async fn warm(&self) -> Result<()> {
        self.chain
            .wait_till_loaded(self.chain.config().load_timeout())
            .await?;
        Ok(())
    }

    /// Wait until everything in the log has been applied. Cached key
    /// misses are retried for content keys that gained wrapped copies since
    /// the previous sync.
    pub async fn sync(&self) -> Result<()> {
        self.chain.sync().await?;
        let (fresh, mark) = self
            .chain
            .wrapped_since(self.wrapped_mark.load(Ordering::Acquire));
        let resolver = self.scope.resolver();
        for content in &fresh {
            resolver.invalidate(content);
        }
        self.wrapped_mark.store(mark, Ordering::Release);
        Ok(())
    }

    fn open<T: Entity>(&self, record: &Record) -> Result<Option<Obj<T>>> {
        let meta = record.meta();
        check_type::<T>(&meta.id, &meta.entity_type)?;

        let body = match &meta.content_key {
            None => record.payload.to_vec(),
            Some(hash) => match self.scope.resolver().resolve(hash, &*self.chain) {
                Some(key) => SealedPayload::from_bytes(&record.payload)?.open(&key)?,
                None => return Ok(None),
            },
        };
        Ok(Some(Obj::from_stored(meta.clone(), decode(&body)?)))
    }
}

impl std::fmt::Debug for Io {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Io")
            .field("partition", self.chain.key())
            .field("cached", &self.cache.len())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

fn check_type<T: Entity>(id: &EntityId, actual: &EntityType) -> Result<()> {
    let expected = T::entity_type();
    if &expected != actual {
        return Err(TrustError::TypeMismatch {
            id: *id,
            expected,
            actual: actual.clone(),
        });
    }
    Ok(())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| TrustError::Codec(e.to_string()))?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| TrustError::Codec(e.to_string()))
}
