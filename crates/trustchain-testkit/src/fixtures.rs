//! Test fixtures.

use trustchain_core::{KeyHash, Keypair, PartitionKey, Record};
use trustchain_perms::{PublicKey, ReaderKeyPair};

/// One participant: a signing identity plus a reader key.
#[derive(Debug, Clone)]
pub struct Party {
    pub signer: Keypair,
    pub reader: ReaderKeyPair,
}

impl Party {
    /// Deterministic party derived from `seed`.
    pub fn new(seed: u8) -> Self {
        let mut reader_seed = [seed; 32];
        reader_seed[0] ^= 0xa5;
        Self {
            signer: Keypair::from_seed(&[seed; 32]),
            reader: ReaderKeyPair::from_seed(reader_seed),
        }
    }

    pub fn random() -> Self {
        Self {
            signer: Keypair::generate(),
            reader: ReaderKeyPair::generate(),
        }
    }

    /// Hash naming this party in write rights.
    pub fn write_hash(&self) -> KeyHash {
        self.signer.key_hash()
    }

    /// Hash naming this party in read rights.
    pub fn read_hash(&self) -> KeyHash {
        self.reader.key_hash()
    }

    /// Self-signed publications of both public keys.
    pub fn key_records(&self) -> Vec<Record> {
        [
            PublicKey::from(self.signer.public_key()),
            PublicKey::from(self.reader.public_key()),
        ]
        .iter()
        .map(|key| {
            key.to_record(&self.signer)
                .expect("public key records always encode")
        })
        .collect()
    }
}

/// Several distinct deterministic parties.
pub fn parties(count: u8) -> Vec<Party> {
    (1..=count).map(Party::new).collect()
}

/// Shorthand for a valid partition key.
pub fn partition(topic: &str, index: u32) -> PartitionKey {
    PartitionKey::new(topic, index).expect("test topics are valid")
}

/// Install a test-friendly tracing subscriber. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
