//! Reader keys and content keys.
//!
//! Readers hold X25519 key pairs. Content is sealed with a random
//! ChaCha20-Poly1305 content key, which is wrapped once per reader.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use trustchain_core::KeyHash;

use crate::error::{PermsError, Result};

/// Derivation context for hashes of reader public keys.
pub const READER_KEY_CONTEXT: &str = "trustchain 2024 reader key hash";

/// Derivation context for hashes of content keys.
pub const CONTENT_KEY_CONTEXT: &str = "trustchain 2024 content key hash";

/// Derivation context for wrap keys.
const WRAP_KEY_CONTEXT: &str = "trustchain 2024 content key wrap";

/// Public half of a reader key pair.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReaderPublicKey(pub [u8; 32]);

impl ReaderPublicKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The hash under which read rights name this key.
    pub fn key_hash(&self) -> KeyHash {
        KeyHash::derive(READER_KEY_CONTEXT, &self.0)
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for ReaderPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReaderPub({})", &hex_prefix(&self.0))
    }
}

/// A reader's X25519 key pair.
#[derive(Clone)]
pub struct ReaderKeyPair {
    secret: StaticSecret,
    public: ReaderPublicKey,
}

impl ReaderKeyPair {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::from_seed(bytes)
    }

    pub fn from_seed(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = ReaderPublicKey(*PublicKey::from(&secret).as_bytes());
        Self { secret, public }
    }

    /// Pair a secret with an arbitrary public half. Only for exercising
    /// failure paths.
    #[cfg(test)]
    pub(crate) fn mismatched(secret_seed: [u8; 32], public: ReaderPublicKey) -> Self {
        Self {
            secret: StaticSecret::from(secret_seed),
            public,
        }
    }

    pub fn public_key(&self) -> ReaderPublicKey {
        self.public
    }

    pub fn key_hash(&self) -> KeyHash {
        self.public.key_hash()
    }

    pub(crate) fn agree(&self, peer: &ReaderPublicKey) -> SharedKey {
        SharedKey(*self.secret.diffie_hellman(&peer.to_dalek()).as_bytes())
    }
}

impl fmt::Debug for ReaderKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReaderKeyPair({:?})", self.public)
    }
}

/// Output of X25519 agreement.
pub(crate) struct SharedKey([u8; 32]);

impl SharedKey {
    /// Key that wraps one content key. `context` binds it to that content key.
    pub(crate) fn wrap_key(&self, context: &[u8]) -> ContentKey {
        let mut hasher = blake3::Hasher::new_derive_key(WRAP_KEY_CONTEXT);
        hasher.update(&self.0);
        hasher.update(context);
        ContentKey(*hasher.finalize().as_bytes())
    }
}

/// Single-use sender side of a key wrap.
pub(crate) struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: ReaderPublicKey,
}

impl EphemeralKeyPair {
    pub(crate) fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = ReaderPublicKey(*PublicKey::from(&secret).as_bytes());
        Self { secret, public }
    }

    pub(crate) fn public_key(&self) -> ReaderPublicKey {
        self.public
    }

    pub(crate) fn agree(self, peer: &ReaderPublicKey) -> SharedKey {
        SharedKey(*self.secret.diffie_hellman(&peer.to_dalek()).as_bytes())
    }
}

/// A 256-bit symmetric key for ChaCha20-Poly1305.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Public identity of this key. Safe to store in headers.
    pub fn hash(&self) -> KeyHash {
        KeyHash::derive(CONTENT_KEY_CONTEXT, &self.0)
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &SealNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| PermsError::EncryptionError(e.to_string()))?;
        cipher
            .encrypt(Nonce::from_slice(&nonce.0), plaintext)
            .map_err(|e| PermsError::EncryptionError(e.to_string()))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &SealNonce) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new_from_slice(&self.0)
            .map_err(|e| PermsError::DecryptionError(e.to_string()))?;
        cipher
            .decrypt(Nonce::from_slice(&nonce.0), ciphertext)
            .map_err(|e| PermsError::DecryptionError(e.to_string()))
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({:?})", self.hash())
    }
}

/// A 96-bit ChaCha20-Poly1305 nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealNonce(pub [u8; 12]);

impl SealNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes[..8].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ephemeral_agreement_matches_static() {
        let reader = ReaderKeyPair::generate();
        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();

        let sender_side = ephemeral.agree(&reader.public_key());
        let reader_side = reader.agree(&ephemeral_public);
        assert_eq!(sender_side.0, reader_side.0);
    }

    #[test]
    fn test_seal_and_open() {
        let key = ContentKey::generate();
        let nonce = SealNonce::generate();
        let ciphertext = key.encrypt(b"balance: 10", &nonce).unwrap();
        assert_ne!(ciphertext.as_slice(), b"balance: 10");
        assert_eq!(key.decrypt(&ciphertext, &nonce).unwrap(), b"balance: 10");
        assert!(ContentKey::generate().decrypt(&ciphertext, &nonce).is_err());
    }

    #[test]
    fn test_wrap_key_bound_to_context() {
        let shared = SharedKey([0x42; 32]);
        assert_eq!(shared.wrap_key(b"a"), shared.wrap_key(b"a"));
        assert_ne!(shared.wrap_key(b"a"), shared.wrap_key(b"b"));
    }

    #[test]
    fn test_reader_and_content_hashes_differ() {
        let bytes = [5u8; 32];
        assert_ne!(
            ReaderPublicKey::from_bytes(bytes).key_hash(),
            ContentKey::from_bytes(bytes).hash()
        );
    }
}
