//! Tor v3 vanity hidden service key generator
//!
//! Searches for an Ed25519 keypair whose onion address starts with a chosen
//! prefix and installs it in a hidden service directory.
//!
//! - `keypair`: Ed25519 key generation
//! - `onion`: address derivation, decoding and checksum validation
//! - `backend`: sequential and parallel search loops
//! - `store`: hidden service key files and reuse of an existing address
//! - `sink`: search progress events

pub mod backend;
pub mod config;
pub mod keypair;
pub mod logging;
pub mod onion;
pub mod sink;
pub mod store;

pub use backend::{
    select_backend, AttemptBudget, Backend, CancelToken, CpuBackend, Found, Prefix, PrefixError,
    SearchConfig, SearchError, SearchOutcome, SequentialBackend,
};
pub use config::{Config, ConfigError};
pub use keypair::{KeyGenerationError, KeyGenerator, KeyPair, OsKeyGenerator};
pub use onion::{AddressError, OnionAddress, VERSION};
pub use sink::{NullSink, Progress, SearchSink, TracingSink};
pub use store::{Existing, KeyStore, PersistenceError, SecretKeyFormat};

/// File prefix for Tor ed25519 secret key files
pub const SECRET_KEY_PREFIX: &[u8] = b"== ed25519v1-secret: type0 ==\0\0\0";

/// File prefix for Tor ed25519 public key files
pub const PUBKEY_PREFIX: &[u8] = b"== ed25519v1-public: type0 ==\0\0\0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_prefixes_are_32_bytes() {
        assert_eq!(SECRET_KEY_PREFIX.len(), 32);
        assert_eq!(PUBKEY_PREFIX.len(), 32);
    }
}
