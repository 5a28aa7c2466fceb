//! Tor v3 onion address derivation and validation
//!
//! The onion address format is: base32(pubkey || checksum || version).onion
//! where checksum = SHA3-256(".onion checksum" || pubkey || version)[0..2]
//! and version = 0x03

use sha3::{Digest, Sha3_256};
use std::fmt;
use thiserror::Error;

/// Address scheme generation embedded in every v3 address
pub const VERSION: u8 = 3;

/// Length of the base32 text (35 bytes encode to exactly 56 symbols, no padding)
pub const ADDRESS_LEN: usize = 56;

/// Suffix appended to the base32 text to form a hostname
pub const ONION_SUFFIX: &str = ".onion";

const CHECKSUM_DOMAIN: &[u8] = b".onion checksum";
const RAW_LEN: usize = 35;

/// Errors raised while decoding or validating an address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("unsupported onion address version: {0}")]
    UnsupportedVersion(u8),

    #[error("invalid onion address length: {0} (expected 56)")]
    InvalidLength(usize),

    #[error("onion address is not valid base32")]
    InvalidBase32,

    #[error("onion address checksum mismatch")]
    ChecksumMismatch,
}

/// A decoded v3 onion address together with its text form
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OnionAddress {
    text: String,
    public_key: [u8; 32],
    checksum: [u8; 2],
    version: u8,
}

/// Leading two bytes of SHA3-256(".onion checksum" || pubkey || version)
pub fn checksum(public_key: &[u8; 32], version: u8) -> [u8; 2] {
    let mut hasher = Sha3_256::new();
    hasher.update(CHECKSUM_DOMAIN);
    hasher.update(public_key);
    hasher.update([version]);
    let digest = hasher.finalize();
    [digest[0], digest[1]]
}

impl OnionAddress {
    /// Derive the address for an Ed25519 public key.
    ///
    /// Pure and deterministic: the same key and version always produce the
    /// same text.
    pub fn derive(public_key: &[u8; 32], version: u8) -> Self {
        let checksum = checksum(public_key, version);

        let mut raw = [0u8; RAW_LEN];
        raw[..32].copy_from_slice(public_key);
        raw[32..34].copy_from_slice(&checksum);
        raw[34] = version;

        Self {
            text: encode(&raw),
            public_key: *public_key,
            checksum,
            version,
        }
    }

    /// Decode address text without checking the checksum.
    ///
    /// Accepts either case and an optional `.onion` suffix. Use [`parse`] for
    /// a decode that also verifies the checksum.
    ///
    /// [`parse`]: OnionAddress::parse
    pub fn decode(text: &str) -> Result<Self, AddressError> {
        let text = text.trim();
        let text = strip_suffix(text).to_ascii_lowercase();

        if text.len() != ADDRESS_LEN {
            return Err(AddressError::InvalidLength(text.len()));
        }

        let raw = base32::decode(
            base32::Alphabet::Rfc4648 { padding: false },
            &text.to_ascii_uppercase(),
        )
        .ok_or(AddressError::InvalidBase32)?;
        if raw.len() != RAW_LEN {
            return Err(AddressError::InvalidBase32);
        }

        let version = raw[34];
        if version != VERSION {
            return Err(AddressError::UnsupportedVersion(version));
        }

        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&raw[..32]);

        Ok(Self {
            text,
            public_key,
            checksum: [raw[32], raw[33]],
            version,
        })
    }

    /// Decode and verify the checksum in one step
    pub fn parse(text: &str) -> Result<Self, AddressError> {
        let address = Self::decode(text)?;
        if address.validate()? {
            Ok(address)
        } else {
            Err(AddressError::ChecksumMismatch)
        }
    }

    /// Recompute the checksum from the embedded key and version and compare.
    ///
    /// Fails with [`AddressError::UnsupportedVersion`] for anything but v3.
    pub fn validate(&self) -> Result<bool, AddressError> {
        if self.version != VERSION {
            return Err(AddressError::UnsupportedVersion(self.version));
        }
        Ok(checksum(&self.public_key, self.version) == self.checksum)
    }

    /// The 56-character lower-case base32 text
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The text plus `.onion`, as written to the hostname file
    pub fn hostname(&self) -> String {
        format!("{}{}", self.text, ONION_SUFFIX)
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn checksum(&self) -> [u8; 2] {
        self.checksum
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    /// Raw 35-byte payload: pubkey || checksum || version
    pub fn to_bytes(&self) -> [u8; RAW_LEN] {
        let mut raw = [0u8; RAW_LEN];
        raw[..32].copy_from_slice(&self.public_key);
        raw[32..34].copy_from_slice(&self.checksum);
        raw[34] = self.version;
        raw
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.text, ONION_SUFFIX)
    }
}

impl fmt::Debug for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnionAddress({})", self.text)
    }
}

/// Strip a trailing `.onion` (any case) if present
fn strip_suffix(text: &str) -> &str {
    let split = text.len().saturating_sub(ONION_SUFFIX.len());
    match text.get(split..) {
        Some(tail) if tail.eq_ignore_ascii_case(ONION_SUFFIX) => &text[..split],
        _ => text,
    }
}

fn encode(raw: &[u8; RAW_LEN]) -> String {
    base32::encode(base32::Alphabet::Rfc4648 { padding: false }, raw).to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 8032 test 1 public key
    const RFC8032_PUBKEY: [u8; 32] = [
        0xd7, 0x5a, 0x98, 0x01, 0x82, 0xb1, 0x0a, 0xb7, 0xd5, 0x4b, 0xfe, 0xd3, 0xc9, 0x64, 0x07,
        0x3a, 0x0e, 0xe1, 0x72, 0xf3, 0xda, 0xa6, 0x23, 0x25, 0xaf, 0x02, 0x1a, 0x68, 0xf7, 0x07,
        0x51, 0x1a,
    ];

    #[test]
    fn test_known_addresses() {
        let zero = OnionAddress::derive(&[0u8; 32], VERSION);
        assert_eq!(
            zero.as_str(),
            "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaam2dqd"
        );
        assert_eq!(zero.checksum(), [0xcd, 0x0e]);

        let rfc = OnionAddress::derive(&RFC8032_PUBKEY, VERSION);
        assert_eq!(
            rfc.as_str(),
            "25njqamcweflpvkl73j4szahhihoc4xt3ktcgjnpaingr5yhkenl5sid"
        );
        assert_eq!(rfc.checksum(), [0xbe, 0xc9]);
    }

    #[test]
    fn test_onion_format() {
        let onion = OnionAddress::derive(&[7u8; 32], VERSION);
        assert_eq!(onion.as_str().len(), ADDRESS_LEN);
        assert!(onion
            .as_str()
            .chars()
            .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)));
        assert!(!onion.as_str().contains('='));
        assert_eq!(onion.hostname().len(), ADDRESS_LEN + 6);
        assert!(onion.to_string().ends_with(".onion"));
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = OnionAddress::derive(&RFC8032_PUBKEY, VERSION);
        let b = OnionAddress::derive(&RFC8032_PUBKEY, VERSION);
        assert_eq!(a, b);
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn test_round_trip() {
        for seed in 0u8..16 {
            let pubkey = [seed.wrapping_mul(37); 32];
            let derived = OnionAddress::derive(&pubkey, VERSION);
            let decoded = OnionAddress::decode(&derived.hostname()).unwrap();
            assert_eq!(decoded.public_key(), &pubkey);
            assert_eq!(decoded.checksum(), derived.checksum());
            assert_eq!(decoded.version(), VERSION);
            assert_eq!(decoded.as_str(), derived.as_str());
        }
    }

    #[test]
    fn test_decode_accepts_upper_case() {
        let derived = OnionAddress::derive(&RFC8032_PUBKEY, VERSION);
        let upper = derived.hostname().to_ascii_uppercase();
        assert_eq!(OnionAddress::parse(&upper).unwrap(), derived);
    }

    #[test]
    fn test_validate_detects_flipped_bytes() {
        let derived = OnionAddress::derive(&RFC8032_PUBKEY, VERSION);
        assert!(derived.validate().unwrap());

        for i in 0..34 {
            let mut raw = derived.to_bytes();
            raw[i] ^= 0x01;
            let tampered = OnionAddress::decode(&encode(&raw)).unwrap();
            assert!(!tampered.validate().unwrap(), "flip at byte {} undetected", i);
        }
    }

    #[test]
    fn test_unsupported_version() {
        let mut raw = OnionAddress::derive(&RFC8032_PUBKEY, VERSION).to_bytes();
        raw[34] = 2;
        assert_eq!(
            OnionAddress::decode(&encode(&raw)),
            Err(AddressError::UnsupportedVersion(2))
        );

        let foreign = OnionAddress::derive(&RFC8032_PUBKEY, 4);
        assert_eq!(foreign.validate(), Err(AddressError::UnsupportedVersion(4)));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(
            OnionAddress::decode("abc.onion"),
            Err(AddressError::InvalidLength(3))
        );
        let bad = "1".repeat(ADDRESS_LEN);
        assert_eq!(OnionAddress::decode(&bad), Err(AddressError::InvalidBase32));
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        let mut raw = OnionAddress::derive(&RFC8032_PUBKEY, VERSION).to_bytes();
        raw[32] ^= 0xff;
        assert_eq!(
            OnionAddress::parse(&encode(&raw)),
            Err(AddressError::ChecksumMismatch)
        );
    }

    #[test]
    fn test_strip_suffix() {
        assert_eq!(strip_suffix("abc.onion"), "abc");
        assert_eq!(strip_suffix("abc.ONION"), "abc");
        assert_eq!(strip_suffix("abc"), "abc");
        assert_eq!(strip_suffix(""), "");
    }
}
