//! Typed entity handles.

use std::collections::BTreeSet;

use trustchain_core::{Entity, EntityId, EntityMeta, EntityType, HasRights, Rights, VersionId};

use crate::error::{Result, TrustError};

/// An entity value together with its metadata.
///
/// New objects get a fresh id and version. Objects read through an
/// [`Io`](crate::Io) carry the stored metadata, and writing them produces
/// the next version.
#[derive(Debug, Clone)]
pub struct Obj<T> {
    meta: EntityMeta,
    data: T,
    stored: bool,
}

impl<T: Entity> Obj<T> {
    /// A new top-level object.
    pub fn new(data: T) -> Self {
        Self {
            meta: EntityMeta::new(T::entity_type()),
            data,
            stored: false,
        }
    }

    /// A new object attached under `parent`.
    pub fn with_parent<P: Entity>(data: T, parent: &Obj<P>) -> Self {
        Self::under(data, parent.meta())
    }

    /// A new object attached under the entity described by `parent`.
    pub fn under(data: T, parent: &EntityMeta) -> Self {
        let mut obj = Self::new(data);
        obj.meta = obj.meta.with_parent(parent.id, parent.entity_type.clone());
        obj
    }

    pub(crate) fn from_stored(meta: EntityMeta, data: T) -> Self {
        Self {
            meta,
            data,
            stored: true,
        }
    }

    pub fn id(&self) -> EntityId {
        self.meta.id
    }

    pub fn version(&self) -> VersionId {
        self.meta.version
    }

    pub fn meta(&self) -> &EntityMeta {
        &self.meta
    }

    pub(crate) fn set_meta(&mut self, meta: EntityMeta) {
        self.meta = meta;
        self.stored = true;
    }

    /// Whether this object has been written or was read from a chain.
    pub fn is_stored(&self) -> bool {
        self.stored
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    /// Mutable access to the value. Stored immutable objects refuse.
    pub fn data_mut(&mut self) -> Result<&mut T> {
        if self.stored && self.meta.immutable {
            return Err(TrustError::Immutable(self.meta.id));
        }
        Ok(&mut self.data)
    }

    pub fn into_data(self) -> T {
        self.data
    }

    /// Freeze the object. Takes effect on the next write.
    pub fn set_immutable(&mut self) {
        self.meta.immutable = true;
    }

    /// Restrict which child types may be attached under this object.
    pub fn set_allowed_children(&mut self, types: Vec<EntityType>) {
        self.meta.allowed_children = types;
    }

    /// Declare that the next write reconciles `versions`.
    pub fn merge_with(&mut self, versions: impl IntoIterator<Item = VersionId>) {
        self.meta.merge_with(versions);
    }

    pub fn merge_versions(&self) -> &BTreeSet<VersionId> {
        &self.meta.merge_versions
    }
}

impl<T> HasRights for Obj<T> {
    fn rights(&self) -> &Rights {
        &self.meta.rights
    }

    fn rights_mut(&mut self) -> &mut Rights {
        &mut self.meta.rights
    }
}
