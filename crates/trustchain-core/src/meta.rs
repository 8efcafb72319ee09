//! Entity metadata carried in every record header.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::rights::Rights;
use crate::types::{EntityId, EntityType, KeyHash, VersionId};

/// Reference from a child to its parent entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentLink {
    pub id: EntityId,
    pub entity_type: EntityType,
}

/// Identity, position, version lineage and rights of one entity version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    pub id: EntityId,
    pub entity_type: EntityType,
    pub parent: Option<ParentLink>,
    /// Child types this entity accepts. Empty accepts any legal child.
    pub allowed_children: Vec<EntityType>,
    pub version: VersionId,
    pub previous_version: Option<VersionId>,
    /// Sibling versions this version reconciles.
    pub merge_versions: BTreeSet<VersionId>,
    pub immutable: bool,
    pub rights: Rights,
    /// Hash of the content key the payload is sealed under, if any.
    pub content_key: Option<KeyHash>,
}

impl EntityMeta {
    /// Fresh metadata for a new entity of `entity_type`.
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            id: EntityId::generate(),
            entity_type,
            parent: None,
            allowed_children: Vec::new(),
            version: VersionId::generate(),
            previous_version: None,
            merge_versions: BTreeSet::new(),
            immutable: false,
            rights: Rights::default(),
            content_key: None,
        }
    }

    /// Metadata for a key record stored under a reserved type.
    pub fn for_key(reserved: &str, id: EntityId) -> Self {
        Self {
            id,
            ..Self::new(EntityType::new(reserved))
        }
    }

    pub fn with_parent(mut self, id: EntityId, entity_type: EntityType) -> Self {
        self.parent = Some(ParentLink { id, entity_type });
        self
    }

    pub fn parent_id(&self) -> Option<EntityId> {
        self.parent.as_ref().map(|p| p.id)
    }

    /// Start a new version that descends from the current one.
    pub fn advance(&mut self) {
        self.previous_version = Some(self.version);
        self.version = VersionId::generate();
    }

    /// Record that the next write reconciles `versions`.
    pub fn merge_with(&mut self, versions: impl IntoIterator<Item = VersionId>) {
        self.merge_versions.extend(versions);
        self.merge_versions.remove(&self.version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_links_previous() {
        let mut meta = EntityMeta::new(EntityType::new("account"));
        let first = meta.version;
        meta.advance();
        assert_eq!(meta.previous_version, Some(first));
        assert_ne!(meta.version, first);
    }

    #[test]
    fn test_merge_with_ignores_self() {
        let mut meta = EntityMeta::new(EntityType::new("account"));
        let other = VersionId::generate();
        meta.merge_with([meta.version, other]);
        assert_eq!(meta.merge_versions, BTreeSet::from([other]));
    }
}
