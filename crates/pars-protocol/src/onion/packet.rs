//! Onion packet layout.
//!
//! ```text
//! layer     = version(1) || u16 len || kem ciphertext || sealed body
//! body      = FORWARD(1) || next hop SessionId(33) || inner layer
//!           | FINAL(2)   || encoded envelope
//! ```
//!
//! The sealed body is AEAD under a key derived from the KEM shared secret,
//! with `version || kem ciphertext` as associated data.

use std::fmt;

use pars_crypto::{Hash256, KemCiphertext};

use crate::limits::{MAX_LAYER_KEM_CIPHERTEXT_LEN, MAX_PACKET_SIZE};
use crate::wire::{put_bytes_u16, WireError, WireReader, WireResult};

/// Layer format version.
pub const LAYER_VERSION: u8 = 1;

pub(crate) const TAG_FORWARD: u8 = 1;
pub(crate) const TAG_FINAL: u8 = 2;

/// One opaque onion layer.
#[derive(Clone, PartialEq, Eq)]
pub struct OnionPacket {
    bytes: Vec<u8>,
}

impl OnionPacket {
    /// Wrap raw packet bytes. Nothing is parsed until a relay unwraps it.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Packet size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the packet is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Digest of the packet bytes, used as the relay spool key.
    pub fn digest(&self) -> Hash256 {
        Hash256::hash(&self.bytes)
    }
}

impl fmt::Debug for OnionPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnionPacket({} bytes)", self.bytes.len())
    }
}

/// A parsed but still sealed layer.
pub(crate) struct LayerHeader<'a> {
    pub(crate) kem_ciphertext: KemCiphertext,
    pub(crate) aad: &'a [u8],
    pub(crate) sealed: &'a [u8],
}

pub(crate) fn parse_layer(bytes: &[u8]) -> WireResult<LayerHeader<'_>> {
    if bytes.len() > MAX_PACKET_SIZE {
        return Err(WireError("packet exceeds maximum size"));
    }
    let mut r = WireReader::new(bytes);
    if r.u8()? != LAYER_VERSION {
        return Err(WireError("unknown layer version"));
    }
    let ct = r.bytes_u16(MAX_LAYER_KEM_CIPHERTEXT_LEN)?;
    let header_len = bytes.len() - r.remaining();
    let sealed = r.rest();
    Ok(LayerHeader {
        kem_ciphertext: KemCiphertext::from_bytes(ct),
        aad: &bytes[..header_len],
        sealed,
    })
}

/// Serialize the unsealed header. Returned bytes double as the AAD.
pub(crate) fn layer_header(kem_ciphertext: &KemCiphertext) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + kem_ciphertext.len());
    out.push(LAYER_VERSION);
    put_bytes_u16(&mut out, kem_ciphertext.as_bytes());
    out
}
