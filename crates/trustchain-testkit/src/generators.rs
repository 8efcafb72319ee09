//! Proptest generators.

use proptest::prelude::*;

use trustchain_core::{Entity, EntityMeta, KeyHash, Keypair, PartitionKey, Record, Rights};

use crate::entities::{Account, Note};
use crate::records;

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

pub fn key_hash() -> impl Strategy<Value = KeyHash> {
    any::<[u8; 32]>().prop_map(KeyHash::from_bytes)
}

/// Valid partition keys.
pub fn partition_key() -> impl Strategy<Value = PartitionKey> {
    ("[a-z][a-z0-9._#-]{0,24}", any::<u32>()).prop_map(|(topic, index)| {
        PartitionKey::new(topic, index).expect("generated topics are valid")
    })
}

/// Arbitrary explicit grants and inheritance flags.
pub fn rights() -> impl Strategy<Value = Rights> {
    (
        prop::collection::btree_set(key_hash(), 0..3),
        prop::collection::btree_set(key_hash(), 0..3),
        prop::collection::btree_map("[a-z]{1,6}", key_hash(), 0..2),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(read, write, allow_read, inherit_read, inherit_write)| Rights {
            read,
            write,
            allow_read,
            allow_write: Default::default(),
            inherit_read,
            inherit_write,
        })
}

/// One step of a generated partition history.
///
/// Indices pick among the entities still alive at that point, modulo the
/// number alive; steps that find nothing to act on are skipped.
#[derive(Debug, Clone)]
pub enum Step {
    CreateAccount,
    /// A new account whose first note is logged before the account itself.
    /// The note is always rejected.
    NoteBeforeParent,
    AddNote(usize),
    Update(usize),
    Remove(usize),
}

pub fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        2 => Just(Step::CreateAccount),
        1 => Just(Step::NoteBeforeParent),
        3 => any::<usize>().prop_map(Step::AddNote),
        3 => any::<usize>().prop_map(Step::Update),
        1 => any::<usize>().prop_map(Step::Remove),
    ]
}

pub fn steps(max: usize) -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(step(), 1..max)
}

/// Turn steps into signed records, authored by `author`.
pub fn history(author: &Keypair, steps: &[Step]) -> Vec<Record> {
    let mut alive: Vec<EntityMeta> = Vec::new();
    let mut out = Vec::new();

    for (n, step) in steps.iter().enumerate() {
        match step {
            Step::CreateAccount => {
                let (meta, record) = records::create(author, &Account::new("acct", n as i64));
                alive.push(meta);
                out.push(record);
            }
            Step::NoteBeforeParent => {
                let (meta, record) = records::create(author, &Account::new("late", n as i64));
                let (_, early) =
                    records::create_under(author, &meta, &Note::new(&format!("early {n}")));
                alive.push(meta);
                out.push(early);
                out.push(record);
            }
            Step::AddNote(i) if !alive.is_empty() => {
                let parent = alive[i % alive.len()].clone();
                let (meta, record) =
                    records::create_under(author, &parent, &Note::new(&format!("note {n}")));
                alive.push(meta);
                out.push(record);
            }
            Step::Update(i) if !alive.is_empty() => {
                let at = i % alive.len();
                let (meta, record) = if alive[at].entity_type == Account::entity_type() {
                    records::update(author, &alive[at], &Account::new("acct", n as i64))
                } else {
                    records::update(author, &alive[at], &Note::new(&format!("edit {n}")))
                };
                alive[at] = meta;
                out.push(record);
            }
            Step::Remove(i) if !alive.is_empty() => {
                let meta = alive.remove(i % alive.len());
                out.push(records::remove(author, &meta));
            }
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn prop_history_records_validate(seed in any::<[u8; 32]>(), steps in steps(12)) {
            let author = Keypair::from_seed(&seed);
            for record in history(&author, &steps) {
                prop_assert!(trustchain_core::validate_record(&record).is_ok());
            }
        }
    }
}
