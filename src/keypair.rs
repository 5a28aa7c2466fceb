//! Ed25519 keypair generation

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// The key source failed to produce a keypair
#[derive(Error, Debug)]
#[error("key generation failed: {0}")]
pub struct KeyGenerationError(pub String);

/// A raw Ed25519 keypair: the 32-byte seed and the 32-byte compressed point.
///
/// The seed is wiped when the pair is dropped, so a discarded candidate
/// leaves nothing behind.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    secret: [u8; 32],
    public: [u8; 32],
}

impl KeyPair {
    /// Derive the pair from a raw seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self {
            secret: *seed,
            public: signing_key.verifying_key().to_bytes(),
        }
    }

    /// The raw seed
    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    /// The raw public key
    pub fn public_bytes(&self) -> &[u8; 32] {
        &self.public
    }

    /// Tor's expanded secret: clamped scalar || nonce prefix.
    ///
    /// Both halves come from SHA-512 of the seed, the same way ed25519
    /// derives its signing scalar.
    pub fn expanded_secret(&self) -> Zeroizing<[u8; 64]> {
        let hash = Sha512::digest(self.secret);
        let mut expanded = Zeroizing::new([0u8; 64]);
        expanded.copy_from_slice(&hash);
        expanded[0] &= 248;
        expanded[31] &= 127;
        expanded[31] |= 64;
        expanded
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("secret", &"<redacted>")
            .field("public", &self.public)
            .finish()
    }
}

/// Source of fresh keypairs.
///
/// Shared by every search worker, hence `&self` and `Sync`.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> Result<KeyPair, KeyGenerationError>;
}

/// Generates keypairs from operating system entropy
#[derive(Debug, Clone, Copy, Default)]
pub struct OsKeyGenerator;

impl KeyGenerator for OsKeyGenerator {
    fn generate(&self) -> Result<KeyPair, KeyGenerationError> {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng
            .try_fill_bytes(&mut seed[..])
            .map_err(|e| KeyGenerationError(e.to_string()))?;
        Ok(KeyPair::from_seed(&seed))
    }
}
