//! Replay determinism across chains.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;

use trustchain_bridge::{LogEntry, RamNetwork, RecordSink};
use trustchain_core::{Keypair, Record, RecordId};
use trustchain_partition::{ChainConfig, PartitionChain};
use trustchain_testkit::{generators, partition, sample_schema};

fn fresh_chain() -> Arc<PartitionChain> {
    let network = RamNetwork::new();
    let key = partition("replay", 0);
    let bridge = Arc::new(network.bridge(&key, Default::default()));
    PartitionChain::new(key, Arc::new(sample_schema()), ChainConfig::default(), bridge)
}

fn entries(records: &[Record], first_offset: u64) -> Vec<LogEntry> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| LogEntry {
            offset: first_offset + i as u64,
            record: Arc::new(r.clone()),
        })
        .collect()
}

fn rejected_ids(chain: &PartitionChain) -> HashSet<RecordId> {
    chain.rejections().into_iter().map(|r| r.record_id).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_replay_is_idempotent(seed in any::<[u8; 32]>(), steps in generators::steps(24)) {
        let author = Keypair::from_seed(&seed);
        let records = generators::history(&author, &steps);

        let once = fresh_chain();
        once.feed(&entries(&records, 1));

        // The same log delivered twice: once in order, then again as
        // duplicates under later offsets.
        let twice = fresh_chain();
        twice.feed(&entries(&records, 1));
        twice.feed(&entries(&records, 1));
        twice.feed(&entries(&records, records.len() as u64 + 1));

        prop_assert_eq!(once.state_hash(), twice.state_hash());
        prop_assert_eq!(rejected_ids(&once), rejected_ids(&twice));
    }

    #[test]
    fn prop_batching_does_not_matter(
        seed in any::<[u8; 32]>(),
        steps in generators::steps(24),
        split in any::<usize>(),
    ) {
        let author = Keypair::from_seed(&seed);
        let records = generators::history(&author, &steps);
        let all = entries(&records, 1);

        let whole = fresh_chain();
        whole.feed(&all);

        let at = if all.is_empty() { 0 } else { split % all.len() };
        let batched = fresh_chain();
        batched.feed(&all[..at]);
        batched.feed(&all[at..]);

        prop_assert_eq!(whole.state_hash(), batched.state_hash());
    }
}

#[test]
fn test_generated_history_applies_cleanly() {
    let author = Keypair::from_seed(&[7; 32]);
    let steps = vec![
        generators::Step::CreateAccount,
        generators::Step::AddNote(0),
        generators::Step::AddNote(1),
        generators::Step::Update(0),
        generators::Step::Remove(2),
    ];
    let records = generators::history(&author, &steps);
    let chain = fresh_chain();
    chain.feed(&entries(&records, 1));

    assert!(chain.rejections().is_empty());
    assert_eq!(chain.all(None).len(), 2);
}

#[test]
fn test_early_child_stays_rejected_on_second_delivery() {
    let author = Keypair::from_seed(&[8; 32]);
    let steps = vec![
        generators::Step::NoteBeforeParent,
        generators::Step::AddNote(0),
    ];
    let records = generators::history(&author, &steps);
    let chain = fresh_chain();
    chain.feed(&entries(&records, 1));
    let once = chain.state_hash();
    assert_eq!(chain.all(None).len(), 2);

    chain.feed(&entries(&records, records.len() as u64 + 1));
    assert_eq!(chain.state_hash(), once);
    assert_eq!(chain.all(None).len(), 2);
    assert_eq!(chain.rejections().len(), 1);
}
