//! Rights inheritance and content key selection.
//!
//! Effective rights fold an entity's own grants with those of its ancestors,
//! stopping at the first one that does not inherit. Content keys follow the
//! same tree: an entity is sealed under the key of its encryption boundary,
//! which is the entity itself or its nearest ancestor that
//!
//! - grants read rights of its own,
//! - has stopped inheriting read rights, or
//! - is of a role-bearing type.
//!
//! A key is reused only while its wrapped copies name exactly the current
//! effective readers. Any change to the reader set rotates the key.

use std::collections::{BTreeSet, HashMap, HashSet};

use trustchain_core::{effective, Access, EntityMeta, KeyHash, Record};
use trustchain_partition::PartitionChain;
use trustchain_perms::{ContentKey, ReaderPublicKey, WrappedKey};

use crate::error::{Result, TrustError};
use crate::scope::Scope;

/// A content key chosen for one write.
#[derive(Debug)]
pub struct EncryptKey {
    pub key: ContentKey,
    /// Wrapped copies to publish before the sealed record.
    pub records: Vec<Record>,
    /// Whether the key was generated for this write.
    pub created: bool,
}

/// Read-only walks over one chain on behalf of one scope.
pub struct Trust<'a> {
    chain: &'a PartitionChain,
    scope: &'a Scope,
    staged: Option<&'a HashMap<KeyHash, ReaderPublicKey>>,
}

impl<'a> Trust<'a> {
    pub fn new(chain: &'a PartitionChain, scope: &'a Scope) -> Self {
        Self {
            chain,
            scope,
            staged: None,
        }
    }

    /// Also consult reader keys published in this request but not yet
    /// replayed.
    pub(crate) fn with_staged(mut self, staged: &'a HashMap<KeyHash, ReaderPublicKey>) -> Self {
        self.staged = Some(staged);
        self
    }

    pub fn get_parent(&self, meta: &EntityMeta) -> Option<EntityMeta> {
        let id = meta.parent_id()?;
        if id == meta.id {
            return None;
        }
        self.chain.get(&id).map(|r| r.meta().clone())
    }

    /// Stored ancestors of `meta`, nearest first.
    pub fn get_parents(&self, meta: &EntityMeta) -> Vec<EntityMeta> {
        let mut out = Vec::new();
        let mut done = HashSet::from([meta.id]);
        let mut next = meta.parent_id();
        while let Some(id) = next {
            if !done.insert(id) {
                break;
            }
            let Some(record) = self.chain.get(&id) else {
                break;
            };
            next = record.meta().parent_id();
            out.push(record.meta().clone());
        }
        out
    }

    /// `meta` itself, then its stored ancestors.
    pub fn get_obj_and_parents(&self, meta: &EntityMeta) -> Vec<EntityMeta> {
        let mut out = vec![meta.clone()];
        out.extend(self.get_parents(meta));
        out
    }

    pub fn effective_read(&self, meta: &EntityMeta) -> BTreeSet<KeyHash> {
        let lineage = self.get_obj_and_parents(meta);
        effective(lineage.iter().map(|m| &m.rights), Access::Read, &BTreeSet::new())
    }

    pub fn effective_write(&self, meta: &EntityMeta) -> BTreeSet<KeyHash> {
        let lineage = self.get_obj_and_parents(meta);
        effective(
            lineage.iter().map(|m| &m.rights),
            Access::Write,
            self.chain.root_keys(),
        )
    }

    pub fn is_boundary(&self, meta: &EntityMeta) -> bool {
        meta.rights.has_explicit(Access::Read)
            || !meta.rights.inherits(Access::Read)
            || self.chain.schema().is_role_boundary(&meta.entity_type)
    }

    /// The entity whose key `meta` is sealed under, if any entity on the
    /// lineage is a boundary.
    pub fn encryption_boundary(&self, meta: &EntityMeta) -> Option<EntityMeta> {
        self.get_obj_and_parents(meta)
            .into_iter()
            .find(|m| self.is_boundary(m))
    }

    /// Choose the content key for writing `meta`.
    ///
    /// Returns `None` when nobody holds read rights, in which case the
    /// payload is stored in the clear. Existing keys on the path from the
    /// entity to its boundary are reused when their reader set still matches
    /// and this scope can open them. Otherwise a new key is generated if
    /// `should_create`, with wrapped copies for every reader if
    /// `should_save`.
    pub fn get_encrypt_key(
        &self,
        meta: &EntityMeta,
        should_create: bool,
        should_save: bool,
    ) -> Result<Option<EncryptKey>> {
        let readers = self.effective_read(meta);
        if readers.is_empty() {
            return Ok(None);
        }

        for candidate in self.key_path(meta) {
            let Some(hash) = candidate.content_key else {
                continue;
            };
            if self.chain.wrapped_readers(&hash) != readers {
                continue;
            }
            if let Some(key) = self.scope.resolver().resolve(&hash, self.chain) {
                return Ok(Some(EncryptKey {
                    key,
                    records: Vec::new(),
                    created: false,
                }));
            }
        }

        if !should_create {
            return Err(TrustError::AuthorityMissing { id: meta.id });
        }

        let key = self.scope.resolver().generate_content_key()?;
        let records = if should_save {
            self.wrap_for(&key, &readers)?
        } else {
            Vec::new()
        };
        tracing::debug!(
            entity = %meta.id,
            content = %key.hash(),
            readers = readers.len(),
            "generated content key"
        );
        Ok(Some(EncryptKey {
            key,
            records,
            created: true,
        }))
    }

    /// A published reader key by hash.
    pub fn reader_public(&self, hash: &KeyHash) -> Option<ReaderPublicKey> {
        if let Some(key) = self.staged.and_then(|s| s.get(hash)) {
            return Some(*key);
        }
        self.chain
            .public_key(hash)
            .and_then(|k| k.as_reader().copied())
    }

    /// Entity first, up to and including its boundary.
    fn key_path(&self, meta: &EntityMeta) -> Vec<EntityMeta> {
        let mut path = Vec::new();
        for m in self.get_obj_and_parents(meta) {
            let boundary = self.is_boundary(&m);
            path.push(m);
            if boundary {
                break;
            }
        }
        path
    }

    fn wrap_for(&self, key: &ContentKey, readers: &BTreeSet<KeyHash>) -> Result<Vec<Record>> {
        readers
            .iter()
            .map(|hash| {
                let public = self
                    .reader_public(hash)
                    .ok_or(TrustError::UnknownReader(*hash))?;
                Ok(WrappedKey::wrap(key, &public)?.to_record(self.scope.identity())?)
            })
            .collect()
    }
}
