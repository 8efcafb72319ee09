//! Read and write rights carried by entity metadata.
//!
//! Rights name keys by [`KeyHash`]. Each entity holds its own explicit
//! grants plus two inheritance flags. The effective set for an entity is the
//! union of explicit grants walking towards the root, stopping at the first
//! ancestor (inclusive) whose inherit flag for that access is off.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::KeyHash;

/// Which half of the rights model a question concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

/// Explicit grants and inheritance flags for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rights {
    /// Keys allowed to decrypt this entity.
    pub read: BTreeSet<KeyHash>,
    /// Keys allowed to author new versions of this entity.
    pub write: BTreeSet<KeyHash>,
    /// Named read grants, keyed by alias.
    pub allow_read: BTreeMap<String, KeyHash>,
    /// Named write grants, keyed by alias.
    pub allow_write: BTreeMap<String, KeyHash>,
    pub inherit_read: bool,
    pub inherit_write: bool,
}

impl Default for Rights {
    fn default() -> Self {
        Self {
            read: BTreeSet::new(),
            write: BTreeSet::new(),
            allow_read: BTreeMap::new(),
            allow_write: BTreeMap::new(),
            inherit_read: true,
            inherit_write: true,
        }
    }
}

impl Rights {
    /// Everything this entity grants on its own for `access`.
    pub fn explicit(&self, access: Access) -> BTreeSet<KeyHash> {
        let (set, named) = match access {
            Access::Read => (&self.read, &self.allow_read),
            Access::Write => (&self.write, &self.allow_write),
        };
        set.iter().chain(named.values()).copied().collect()
    }

    pub fn has_explicit(&self, access: Access) -> bool {
        match access {
            Access::Read => !self.read.is_empty() || !self.allow_read.is_empty(),
            Access::Write => !self.write.is_empty() || !self.allow_write.is_empty(),
        }
    }

    pub fn inherits(&self, access: Access) -> bool {
        match access {
            Access::Read => self.inherit_read,
            Access::Write => self.inherit_write,
        }
    }

    pub fn grant(&mut self, access: Access, key: KeyHash) -> bool {
        match access {
            Access::Read => self.read.insert(key),
            Access::Write => self.write.insert(key),
        }
    }

    /// Remove a key from both the plain and named grants.
    pub fn revoke(&mut self, access: Access, key: &KeyHash) -> bool {
        let (set, named) = match access {
            Access::Read => (&mut self.read, &mut self.allow_read),
            Access::Write => (&mut self.write, &mut self.allow_write),
        };
        let before = named.len();
        named.retain(|_, k| k != key);
        set.remove(key) || named.len() != before
    }

    /// Add or replace a named grant.
    pub fn allow(&mut self, access: Access, alias: impl Into<String>, key: KeyHash) {
        match access {
            Access::Read => self.allow_read.insert(alias.into(), key),
            Access::Write => self.allow_write.insert(alias.into(), key),
        };
    }

    pub fn disallow(&mut self, access: Access, alias: &str) -> Option<KeyHash> {
        match access {
            Access::Read => self.allow_read.remove(alias),
            Access::Write => self.allow_write.remove(alias),
        }
    }

    /// Turn inheritance back on.
    pub fn resume(&mut self, access: Access) {
        match access {
            Access::Read => self.inherit_read = true,
            Access::Write => self.inherit_write = true,
        }
    }

    /// Stop inheriting `access`, keeping whatever was inherited as explicit
    /// grants so nobody loses access at the moment of severing.
    pub fn sever(&mut self, access: Access, inherited: &BTreeSet<KeyHash>) {
        match access {
            Access::Read => {
                self.read.extend(inherited.iter().copied());
                self.inherit_read = false;
            }
            Access::Write => {
                self.write.extend(inherited.iter().copied());
                self.inherit_write = false;
            }
        }
    }
}

/// Fold a lineage (entity first, root last) into its effective set.
///
/// `roots` joins only when every entity on the lineage inherits `access`.
pub fn effective<'a, I>(lineage: I, access: Access, roots: &BTreeSet<KeyHash>) -> BTreeSet<KeyHash>
where
    I: IntoIterator<Item = &'a Rights>,
{
    let mut out = BTreeSet::new();
    for rights in lineage {
        out.extend(rights.explicit(access));
        if !rights.inherits(access) {
            return out;
        }
    }
    out.extend(roots.iter().copied());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> KeyHash {
        KeyHash::from_bytes([n; 32])
    }

    #[test]
    fn test_default_inherits_everything() {
        let rights = Rights::default();
        assert!(rights.inherit_read && rights.inherit_write);
        assert!(!rights.has_explicit(Access::Read));
    }

    #[test]
    fn test_effective_unions_up_to_root() {
        let mut child = Rights::default();
        child.grant(Access::Read, key(1));
        let mut parent = Rights::default();
        parent.grant(Access::Read, key(2));
        let roots = BTreeSet::from([key(9)]);

        let set = effective([&child, &parent], Access::Read, &roots);
        assert_eq!(set, BTreeSet::from([key(1), key(2), key(9)]));
    }

    #[test]
    fn test_effective_stops_at_severed_entity() {
        let mut child = Rights::default();
        child.grant(Access::Write, key(1));
        let mut middle = Rights::default();
        middle.grant(Access::Write, key(2));
        middle.inherit_write = false;
        let mut root = Rights::default();
        root.grant(Access::Write, key(3));

        let set = effective([&child, &middle, &root], Access::Write, &BTreeSet::from([key(9)]));
        assert_eq!(set, BTreeSet::from([key(1), key(2)]));
    }

    #[test]
    fn test_named_grants_count_and_revoke() {
        let mut rights = Rights::default();
        rights.allow(Access::Read, "auditor", key(4));
        assert!(rights.explicit(Access::Read).contains(&key(4)));
        assert!(rights.revoke(Access::Read, &key(4)));
        assert!(rights.explicit(Access::Read).is_empty());
        assert!(!rights.revoke(Access::Read, &key(4)));
    }

    #[test]
    fn test_sever_keeps_inherited_as_explicit() {
        let mut rights = Rights::default();
        let inherited = BTreeSet::from([key(5), key(6)]);
        rights.sever(Access::Read, &inherited);
        assert!(!rights.inherit_read);
        assert_eq!(effective([&rights], Access::Read, &BTreeSet::new()), inherited);
    }
}
