//! SessionId derivation.
//!
//! A `SessionId` is the public address of an identity. It is a version
//! prefix byte followed by a BLAKE3 digest of both long-term public keys:
//!
//! ```text
//! prefix || BLAKE3(SESSION_ID_DOMAIN || kem_public || signing_public)
//! ```
//!
//! Textual form is 66 lowercase hex characters (`07` + 64). Wire form is a
//! fixed 33 bytes. Equality is constant-time over the digest.

use std::str::FromStr;

use pars_crypto::Hash256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;

use crate::{IdentityError, Result};

/// Domain separator for SessionId digests.
const SESSION_ID_DOMAIN: &[u8] = b"PARS-SESSION-ID-v1";

/// Default version prefix for post-quantum identities.
pub const DEFAULT_PREFIX: u8 = 0x07;

/// Public address of an identity.
#[derive(Clone, Copy)]
pub struct SessionId {
    prefix: u8,
    digest: Hash256,
}

impl SessionId {
    /// Size of the wire form in bytes.
    pub const WIRE_SIZE: usize = 1 + Hash256::SIZE;

    /// Length of the textual form.
    pub const HEX_LEN: usize = Self::WIRE_SIZE * 2;

    /// Derive the SessionId for a pair of public keys.
    pub fn derive(prefix: u8, kem_public: &[u8], signing_public: &[u8]) -> Self {
        let digest = Hash256::hash_many(&[SESSION_ID_DOMAIN, kem_public, signing_public]);
        Self { prefix, digest }
    }

    /// Version prefix byte.
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Digest of the public keys.
    pub fn digest(&self) -> &Hash256 {
        &self.digest
    }

    /// Fixed-width wire encoding.
    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut out = [0u8; Self::WIRE_SIZE];
        out[0] = self.prefix;
        out[1..].copy_from_slice(self.digest.as_bytes());
        out
    }

    /// Parse the fixed-width wire encoding.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSessionId` unless the input is exactly 33 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::WIRE_SIZE {
            return Err(IdentityError::InvalidSessionId(format!(
                "expected {} bytes, got {}",
                Self::WIRE_SIZE,
                bytes.len()
            )));
        }
        let digest = Hash256::from_bytes(&bytes[1..])?;
        Ok(Self {
            prefix: bytes[0],
            digest,
        })
    }

    /// Textual form: prefix hex followed by digest hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse the textual form.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSessionId` on wrong length or non-hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != Self::HEX_LEN {
            return Err(IdentityError::InvalidSessionId(format!(
                "expected {} hex characters, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }
        let mut bytes = [0u8; Self::WIRE_SIZE];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| IdentityError::InvalidSessionId(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Check that this id carries the expected version prefix.
    pub fn ensure_prefix(&self, expected: u8) -> Result<()> {
        if self.prefix != expected {
            return Err(IdentityError::PrefixMismatch {
                expected,
                actual: self.prefix,
            });
        }
        Ok(())
    }

    /// Whether this id was derived from the given public keys.
    pub fn matches_keys(&self, kem_public: &[u8], signing_public: &[u8]) -> bool {
        *self == Self::derive(self.prefix, kem_public, signing_public)
    }

    /// Short form for logs: prefix plus the first 8 digest characters.
    pub fn short(&self) -> String {
        let hex = self.to_hex();
        format!("{}...", &hex[..10])
    }
}

impl ConstantTimeEq for SessionId {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.prefix.ct_eq(&other.prefix) & self.digest.ct_eq(&other.digest)
    }
}

impl PartialEq for SessionId {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for SessionId {}

impl std::hash::Hash for SessionId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.prefix.hash(state);
        self.digest.hash(state);
    }
}

impl PartialOrd for SessionId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SessionId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl std::fmt::Debug for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionId({})", self.short())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for SessionId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn derivation_is_a_pure_function(kem: Vec<u8>, sig: Vec<u8>, prefix: u8) {
            let a = SessionId::derive(prefix, &kem, &sig);
            let b = SessionId::derive(prefix, &kem, &sig);
            prop_assert_eq!(a, b);
            prop_assert!(a.matches_keys(&kem, &sig));
        }

        #[test]
        fn textual_form_roundtrips(kem: Vec<u8>, sig: Vec<u8>) {
            let id = SessionId::derive(DEFAULT_PREFIX, &kem, &sig);
            prop_assert_eq!(SessionId::from_hex(&id.to_hex()).unwrap(), id);
        }

        #[test]
        fn different_keys_give_different_ids(kem: Vec<u8>, sig: Vec<u8>, extra: u8) {
            let mut other = kem.clone();
            other.push(extra);
            prop_assert_ne!(
                SessionId::derive(DEFAULT_PREFIX, &kem, &sig),
                SessionId::derive(DEFAULT_PREFIX, &other, &sig)
            );
        }

        #[test]
        fn from_hex_never_panics(s in "\\PC*") {
            let _ = SessionId::from_hex(&s);
        }
    }
}
