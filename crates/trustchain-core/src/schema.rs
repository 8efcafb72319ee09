//! Entity types and the static parent/child legality table.
//!
//! Application types implement [`Entity`] and are registered into a
//! [`Schema`]. The chain consults the schema before it accepts any record.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::ValidationError;
use crate::meta::EntityMeta;
use crate::rights::Rights;
use crate::types::EntityType;

/// Which parents a type may be attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRule {
    /// Top-level type. Records of this type carry no parent.
    Free,
    /// Must be attached under one of these types.
    Within(Vec<EntityType>),
}

/// An application type stored in a partition.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Registered type name. Must be unique within a schema.
    const TYPE_NAME: &'static str;

    fn parent_rule() -> ParentRule {
        ParentRule::Free
    }

    fn entity_type() -> EntityType {
        EntityType::new(Self::TYPE_NAME)
    }
}

/// Marker for types that act as security-role boundaries: content below a
/// role entity is sealed under its own key.
pub trait HasRoles: Entity {}

/// Anything that exposes mutable rights.
pub trait HasRights {
    fn rights(&self) -> &Rights;
    fn rights_mut(&mut self) -> &mut Rights;
}

impl HasRights for EntityMeta {
    fn rights(&self) -> &Rights {
        &self.rights
    }

    fn rights_mut(&mut self) -> &mut Rights {
        &mut self.rights
    }
}

/// Per-type registration.
#[derive(Debug, Clone)]
pub struct TypeRule {
    pub parents: ParentRule,
    pub roles: bool,
}

/// Registry of known entity types.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    types: HashMap<EntityType, TypeRule>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn rule(&self, entity_type: &EntityType) -> Option<&TypeRule> {
        self.types.get(entity_type)
    }

    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.types.contains_key(entity_type)
    }

    /// Whether entities of this type seal their own content key.
    pub fn is_role_boundary(&self, entity_type: &EntityType) -> bool {
        self.types.get(entity_type).map(|r| r.roles).unwrap_or(false)
    }

    /// Check that `child` may sit under a parent of type `parent`.
    pub fn check_parent(
        &self,
        child: &EntityType,
        parent: Option<&EntityType>,
    ) -> Result<(), ValidationError> {
        let rule = self
            .types
            .get(child)
            .ok_or_else(|| ValidationError::UnknownType(child.clone()))?;

        let legal = match (&rule.parents, parent) {
            (ParentRule::Free, None) => true,
            (ParentRule::Free, Some(_)) => false,
            (ParentRule::Within(_), None) => false,
            (ParentRule::Within(allowed), Some(p)) => allowed.contains(p),
        };
        if legal {
            Ok(())
        } else {
            Err(ValidationError::IllegalParent {
                child: child.clone(),
                parent: parent.cloned(),
            })
        }
    }
}

/// Collects type registrations.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: HashMap<EntityType, TypeRule>,
}

impl SchemaBuilder {
    pub fn entity<T: Entity>(mut self) -> Self {
        self.types.insert(
            T::entity_type(),
            TypeRule {
                parents: T::parent_rule(),
                roles: false,
            },
        );
        self
    }

    /// Register a role-bearing type.
    pub fn roles<T: HasRoles>(mut self) -> Self {
        self.types.insert(
            T::entity_type(),
            TypeRule {
                parents: T::parent_rule(),
                roles: true,
            },
        );
        self
    }

    pub fn build(self) -> Schema {
        Schema { types: self.types }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Serialize, Deserialize)]
    struct Ledger;

    impl Entity for Ledger {
        const TYPE_NAME: &'static str = "ledger";
    }

    impl HasRoles for Ledger {}

    #[derive(Clone, Serialize, Deserialize)]
    struct Entry;

    impl Entity for Entry {
        const TYPE_NAME: &'static str = "entry";

        fn parent_rule() -> ParentRule {
            ParentRule::Within(vec![Ledger::entity_type()])
        }
    }

    fn schema() -> Schema {
        Schema::builder().roles::<Ledger>().entity::<Entry>().build()
    }

    #[test]
    fn test_legal_placements() {
        let schema = schema();
        schema.check_parent(&Ledger::entity_type(), None).unwrap();
        schema
            .check_parent(&Entry::entity_type(), Some(&Ledger::entity_type()))
            .unwrap();
    }

    #[test]
    fn test_illegal_placements() {
        let schema = schema();
        assert!(matches!(
            schema.check_parent(&Entry::entity_type(), None),
            Err(ValidationError::IllegalParent { .. })
        ));
        assert!(matches!(
            schema.check_parent(&Ledger::entity_type(), Some(&Entry::entity_type())),
            Err(ValidationError::IllegalParent { .. })
        ));
        assert!(matches!(
            schema.check_parent(&EntityType::new("ghost"), None),
            Err(ValidationError::UnknownType(_))
        ));
    }

    #[test]
    fn test_role_boundaries() {
        let schema = schema();
        assert!(schema.is_role_boundary(&Ledger::entity_type()));
        assert!(!schema.is_role_boundary(&Entry::entity_type()));
    }
}
