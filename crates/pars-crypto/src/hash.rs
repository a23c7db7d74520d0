//! BLAKE3 digests.
//!
//! Every identifier in the messaging core (SessionIds, conversation ids,
//! envelope ids) is a [`Hash256`] computed over length-prefixed inputs.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::{CryptoError, Result};

/// A 256-bit BLAKE3 digest.
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Digest size in bytes.
    pub const SIZE: usize = 32;

    /// Wrap an existing 32-byte digest.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a digest from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidHashLength {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Borrow the raw digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Copy out the raw digest.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Hash a single input.
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Hash several inputs as one unambiguous message.
    ///
    /// Each input is prefixed with its length so `["ab", "c"]` and
    /// `["a", "bc"]` never collide.
    pub fn hash_many(inputs: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for input in inputs {
            hasher.update(&(input.len() as u64).to_le_bytes());
            hasher.update(input);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Derive a 32-byte key from this digest under a context string.
    pub fn derive_key(&self, context: &str) -> [u8; 32] {
        blake3::derive_key(context, &self.0)
    }

    /// Constant-time check for the all-zero digest.
    pub fn is_zero(&self) -> bool {
        self.0.ct_eq(&[0u8; 32]).into()
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns an error on wrong length or non-hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != Self::SIZE * 2 {
            return Err(CryptoError::InvalidHashLength {
                expected: Self::SIZE * 2,
                actual: s.len(),
            });
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| CryptoError::InvalidHexFormat(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl ConstantTimeEq for Hash256 {
    fn ct_eq(&self, other: &Self) -> subtle::Choice {
        self.0.ct_eq(&other.0)
    }
}

impl PartialEq for Hash256 {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}

impl Eq for Hash256 {}

impl std::hash::Hash for Hash256 {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Bucket selection only.
        self.0.hash(state);
    }
}

impl PartialOrd for Hash256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hash256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash256({})", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(Hash256::hash(b"pars"), Hash256::hash(b"pars"));
        assert_ne!(Hash256::hash(b"pars"), Hash256::hash(b"lux"));
    }

    #[test]
    fn test_hash_many_is_length_prefixed() {
        let split = Hash256::hash_many(&[b"ab", b"c"]);
        let moved = Hash256::hash_many(&[b"a", b"bc"]);
        let joined = Hash256::hash_many(&[b"abc"]);
        assert_ne!(split, moved);
        assert_ne!(split, joined);
    }

    #[test]
    fn test_hex_roundtrip() {
        let h = Hash256::hash(b"mailbox");
        assert_eq!(Hash256::from_hex(&h.to_hex()).unwrap(), h);
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(matches!(
            Hash256::from_hex("abcd"),
            Err(CryptoError::InvalidHashLength { expected: 64, .. })
        ));
        let bad = "zz".repeat(32);
        assert!(matches!(
            Hash256::from_hex(&bad),
            Err(CryptoError::InvalidHexFormat(_))
        ));
    }

    #[test]
    fn test_from_bytes_invalid_length() {
        assert!(Hash256::from_bytes(&[0u8; 31]).is_err());
        assert!(Hash256::from_bytes(&[7u8; 32]).is_ok());
    }

    #[test]
    fn test_derive_key_context_separation() {
        let h = Hash256::hash(b"seed");
        assert_ne!(h.derive_key("layer"), h.derive_key("session"));
    }

    #[test]
    fn test_is_zero() {
        assert!(Hash256::default().is_zero());
        assert!(!Hash256::hash(b"x").is_zero());
    }

    #[test]
    fn test_ordering_matches_bytes() {
        let low = Hash256::new([0u8; 32]);
        let high = Hash256::new([1u8; 32]);
        assert!(low < high);
    }
}
