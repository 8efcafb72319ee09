//! Sealed payloads, reader grants and content key reuse.

use std::collections::BTreeSet;

use trustchain::{Io, Obj, StoreConfig, TrustError, TrustStore};
use trustchain_bridge::RamNetwork;
use trustchain_core::{Entity, EntityId, EntityMeta, ParentLink};
use trustchain_perms::{ContentKey, WrappedKey};
use trustchain_testkit::{init_tracing, partition, sample_schema, Account, Coin, Note, Party};

fn store() -> TrustStore {
    init_tracing();
    TrustStore::new(sample_schema(), RamNetwork::new(), StoreConfig::default())
}

async fn open(store: &TrustStore, party: &Party) -> Io {
    let scope = store.scope(party.signer.clone(), vec![party.reader.clone()]);
    store.io(&partition("vault", 0), scope).await.unwrap()
}

#[tokio::test]
async fn test_granted_reader_opens_sealed_entity() {
    let store = store();
    let (alice, bob, carol) = (Party::new(1), Party::new(2), Party::new(3));
    let mut as_alice = open(&store, &alice).await;

    let mut account = Obj::new(Account::new("alice", 500));
    as_alice
        .grant_read(&mut account, &bob.reader.public_key())
        .unwrap();
    as_alice.merge(&mut account).await.unwrap();

    let content = account.meta().content_key.expect("sealed");
    let chain = as_alice.backend();
    assert_eq!(chain.wrapped_readers(&content), BTreeSet::from([bob.read_hash()]));
    assert!(chain.public_key(&bob.read_hash()).is_some());

    let as_bob = open(&store, &bob).await;
    let seen = as_bob.get::<Account>(&account.id()).unwrap();
    assert_eq!(seen.data().balance, 500);

    let as_carol = open(&store, &carol).await;
    assert!(as_carol
        .get_or_null::<Account>(&account.id())
        .unwrap()
        .is_none());
    assert!(matches!(
        as_carol.get::<Account>(&account.id()),
        Err(TrustError::AuthorityMissing { .. })
    ));
}

#[tokio::test]
async fn test_resolver_caches_hits_and_misses() {
    let store = store();
    let (alice, bob, carol) = (Party::new(1), Party::new(2), Party::new(3));
    let mut as_alice = open(&store, &alice).await;

    let mut account = Obj::new(Account::new("alice", 1));
    as_alice
        .grant_read(&mut account, &bob.reader.public_key())
        .unwrap();
    as_alice.merge(&mut account).await.unwrap();

    let as_bob = open(&store, &bob).await;
    for _ in 0..3 {
        as_bob.get::<Account>(&account.id()).unwrap();
    }
    assert_eq!(as_bob.scope().resolver().unwrap_attempts(), 1);

    let as_carol = open(&store, &carol).await;
    for _ in 0..3 {
        assert!(as_carol
            .get_or_null::<Account>(&account.id())
            .unwrap()
            .is_none());
    }
    let resolver = as_carol.scope().resolver();
    assert_eq!(resolver.lookups(), 1);
    assert_eq!(resolver.unwrap_attempts(), 0);

    // The first sync of a handle retries every content key seen so far.
    as_carol.sync().await.unwrap();
    as_carol.get_or_null::<Account>(&account.id()).unwrap();
    assert_eq!(as_carol.scope().resolver().lookups(), 2);
}

#[tokio::test]
async fn test_children_share_their_boundary_key() {
    let store = store();
    let alice = Party::new(1);
    let mut io = open(&store, &alice).await;

    let mut account = Obj::new(Account::new("alice", 1));
    io.grant_read(&mut account, &alice.reader.public_key()).unwrap();
    io.merge(&mut account).await.unwrap();

    let mut note = Obj::with_parent(Note::new("inside"), &account);
    io.merge(&mut note).await.unwrap();

    let trust = io.trust();
    assert_eq!(
        trust.encryption_boundary(note.meta()).map(|m| m.id),
        Some(account.id())
    );
    assert!(account.meta().content_key.is_some());
    assert_eq!(note.meta().content_key, account.meta().content_key);

    io.decache(&note.id());
    assert_eq!(io.get::<Note>(&note.id()).unwrap().data().text, "inside");
}

#[tokio::test]
async fn test_changing_readers_rotates_key() {
    let store = store();
    let (alice, carol) = (Party::new(1), Party::new(3));
    let mut as_alice = open(&store, &alice).await;

    let mut account = Obj::new(Account::new("alice", 1));
    as_alice
        .grant_read(&mut account, &alice.reader.public_key())
        .unwrap();
    as_alice.merge(&mut account).await.unwrap();
    let before = account.meta().content_key;

    // Same readers, same key.
    let chosen = as_alice
        .trust()
        .get_encrypt_key(account.meta(), false, false)
        .unwrap()
        .expect("readers");
    assert!(!chosen.created);
    assert_eq!(Some(chosen.key.hash()), before);
    account.data_mut().unwrap().balance = 2;
    as_alice.merge(&mut account).await.unwrap();
    assert_eq!(account.meta().content_key, before);

    as_alice
        .grant_read(&mut account, &carol.reader.public_key())
        .unwrap();
    as_alice.merge(&mut account).await.unwrap();
    let after = account.meta().content_key.expect("sealed");
    assert_ne!(Some(after), before);
    assert_eq!(
        as_alice.backend().wrapped_readers(&after),
        BTreeSet::from([alice.read_hash(), carol.read_hash()])
    );

    let as_carol = open(&store, &carol).await;
    assert_eq!(
        as_carol
            .get::<Account>(&account.id())
            .unwrap()
            .data()
            .balance,
        2
    );
    // Older versions stay sealed under the old key.
    let first = as_alice.get_history(&account.id())[0].meta().version;
    assert!(as_carol
        .get_version_or_null::<Account>(&account.id(), &first)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_no_readers_means_plaintext() {
    let store = store();
    let mut io = open(&store, &Party::new(1)).await;

    let mut account = Obj::new(Account::new("open", 1));
    io.merge(&mut account).await.unwrap();
    assert!(account.meta().content_key.is_none());

    let raw = io.get_all_raw(None);
    assert_eq!(raw.len(), 1);
    let decoded: Account = ciborium::from_reader(&raw[0].payload[..]).unwrap();
    assert_eq!(decoded.owner, "open");
}

#[tokio::test]
async fn test_severed_child_keeps_inherited_readers() {
    let store = store();
    let (alice, k1) = (Party::new(1), Party::new(9));
    let mut io = open(&store, &alice).await;

    let mut a = Obj::new(Account::new("a", 0));
    io.grant_read(&mut a, &k1.reader.public_key()).unwrap();
    io.merge(&mut a).await.unwrap();

    let mut b = Obj::with_parent(Note::new("b"), &a);
    io.merge(&mut b).await.unwrap();
    assert_eq!(
        io.trust().effective_read(b.meta()),
        BTreeSet::from([k1.read_hash()])
    );

    io.set_inherit_read(&mut b, false);
    io.merge(&mut b).await.unwrap();
    assert!(!b.meta().rights.inherit_read);

    io.revoke_read(&mut a, &k1.read_hash());
    io.merge(&mut a).await.unwrap();

    let trust = io.trust();
    assert!(trust.effective_read(a.meta()).is_empty());
    assert_eq!(
        trust.effective_read(b.meta()),
        BTreeSet::from([k1.read_hash()])
    );

    // Turning inheritance back on picks up the parent's, now empty, set.
    io.set_inherit_read(&mut b, true);
    assert!(b.meta().rights.inherit_read);
    assert_eq!(
        io.trust().effective_read(b.meta()),
        BTreeSet::from([k1.read_hash()])
    );
}

#[tokio::test]
async fn test_named_read_grant() {
    let store = store();
    let (alice, bob) = (Party::new(1), Party::new(2));
    let mut as_alice = open(&store, &alice).await;

    let mut account = Obj::new(Account::new("alice", 3));
    as_alice
        .allow_read(&mut account, "auditor", &bob.reader.public_key())
        .unwrap();
    as_alice.merge(&mut account).await.unwrap();

    let as_bob = open(&store, &bob).await;
    assert_eq!(as_bob.get::<Account>(&account.id()).unwrap().data().balance, 3);
    assert!(as_bob.public_key_or_null(&bob.read_hash()).is_some());

    assert_eq!(as_alice.disallow_read(&mut account, "auditor"), Some(bob.read_hash()));
    assert_eq!(as_alice.disallow_read(&mut account, "auditor"), None);
    as_alice.merge(&mut account).await.unwrap();
    assert!(as_alice.trust().effective_read(account.meta()).is_empty());
    assert!(account.meta().content_key.is_none());
}

#[tokio::test]
async fn test_outsider_wrapped_key_does_not_rotate() {
    let store = store();
    let (alice, bob, mallory) = (Party::new(1), Party::new(2), Party::new(4));
    let mut as_alice = open(&store, &alice).await;

    let mut account = Obj::new(Account::new("alice", 1));
    as_alice
        .grant_read(&mut account, &bob.reader.public_key())
        .unwrap();
    as_alice.merge(&mut account).await.unwrap();
    let content = account.meta().content_key.expect("sealed");

    // A copy of some other key filed under Alice's content hash.
    let mut forged = WrappedKey::wrap(&ContentKey::generate(), &mallory.reader.public_key()).unwrap();
    forged.content = content;
    let as_mallory = open(&store, &mallory).await;
    as_mallory
        .backend()
        .send(&forged.to_record(&mallory.signer).unwrap())
        .await
        .unwrap();
    as_alice.sync().await.unwrap();

    assert!(as_alice.backend().rejections().is_empty());
    assert_eq!(
        as_alice.backend().wrapped_readers(&content),
        BTreeSet::from([bob.read_hash()])
    );

    account.data_mut().unwrap().balance = 2;
    as_alice.merge(&mut account).await.unwrap();
    assert_eq!(account.meta().content_key, Some(content));
    let as_bob = open(&store, &bob).await;
    assert_eq!(as_bob.get::<Account>(&account.id()).unwrap().data().balance, 2);
}

#[tokio::test]
async fn test_writes_keep_unrelated_misses_cached() {
    let store = store();
    let (alice, bob, carol) = (Party::new(1), Party::new(2), Party::new(3));
    let mut as_alice = open(&store, &alice).await;

    let mut account = Obj::new(Account::new("alice", 1));
    as_alice
        .grant_read(&mut account, &bob.reader.public_key())
        .unwrap();
    as_alice.merge(&mut account).await.unwrap();
    let content = account.meta().content_key.expect("sealed");

    let mut as_carol = open(&store, &carol).await;
    as_carol.sync().await.unwrap();
    assert!(as_carol.get_or_null::<Account>(&account.id()).unwrap().is_none());
    assert_eq!(as_carol.scope().resolver().lookups(), 1);

    // Carol's own plaintext write brings no wrapped keys for the account.
    let mut coin = Obj::new(Coin { denomination: 1 });
    as_carol.merge(&mut coin).await.unwrap();
    assert!(as_carol.get_or_null::<Account>(&account.id()).unwrap().is_none());
    assert_eq!(as_carol.scope().resolver().lookups(), 1);

    // A copy for Carol is picked up by her next sync.
    let key = as_alice
        .scope()
        .resolver()
        .resolve(&content, &**as_alice.backend())
        .expect("alice created the key");
    let for_carol = WrappedKey::wrap(&key, &carol.reader.public_key()).unwrap();
    as_alice
        .backend()
        .send(&for_carol.to_record(&alice.signer).unwrap())
        .await
        .unwrap();
    as_carol.sync().await.unwrap();
    assert_eq!(
        as_carol.get::<Account>(&account.id()).unwrap().data().balance,
        1
    );
    assert_eq!(as_carol.scope().resolver().lookups(), 2);
}

#[tokio::test]
async fn test_parent_walks_stop_at_loops() {
    let store = store();
    let mut io = open(&store, &Party::new(1)).await;

    let mut account = Obj::new(Account::new("root", 0));
    io.merge(&mut account).await.unwrap();
    let mut note = Obj::with_parent(Note::new("child"), &account);
    io.merge(&mut note).await.unwrap();

    let trust = io.trust();
    let mut own_parent = EntityMeta::new(Note::entity_type());
    own_parent.parent = Some(ParentLink {
        id: own_parent.id,
        entity_type: Note::entity_type(),
    });
    assert!(trust.get_parent(&own_parent).is_none());
    assert!(trust.get_parents(&own_parent).is_empty());

    // The account proposed under its own child.
    let mut moved = account.meta().clone();
    moved.parent = Some(ParentLink {
        id: note.id(),
        entity_type: Note::entity_type(),
    });
    let ids: Vec<EntityId> = trust.get_parents(&moved).iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![note.id()]);
    assert_eq!(trust.get_obj_and_parents(&moved).len(), 2);
    assert!(trust.effective_read(&moved).is_empty());
}
