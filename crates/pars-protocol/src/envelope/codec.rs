//! Envelope wire codec and signature validation.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! sender      33 bytes
//! recipient   33 bytes
//! ciphertext  u32 length || bytes
//! signature   u32 length || bytes
//! timestamp   u64
//! ttl         i64
//! ```
//!
//! Decoding is strict: truncation, trailing bytes, over-long fields and
//! out-of-range TTLs are all `MalformedEnvelope`, reported before any
//! cryptographic work.

use pars_crypto::{CryptoProvider, SigningPublicKey};
use pars_identity::SessionId;
use tracing::debug;

use super::message::MessageEnvelope;
use crate::limits::{DEFAULT_MAX_CIPHERTEXT_LEN, DEFAULT_MAX_TTL_SECS, MAX_SIGNATURE_LEN};
use crate::wire::{put_bytes_u32, WireReader};
use crate::{ProtocolError, Result};

/// Bounds enforced by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeLimits {
    /// Largest TTL accepted, in seconds.
    pub max_ttl_secs: i64,
    /// Largest ciphertext accepted.
    pub max_ciphertext_len: usize,
    /// Largest signature accepted.
    pub max_signature_len: usize,
}

impl Default for EnvelopeLimits {
    fn default() -> Self {
        Self {
            max_ttl_secs: DEFAULT_MAX_TTL_SECS,
            max_ciphertext_len: DEFAULT_MAX_CIPHERTEXT_LEN,
            max_signature_len: MAX_SIGNATURE_LEN,
        }
    }
}

/// Fixed bytes of every encoded envelope.
const FIXED_LEN: usize = 2 * SessionId::WIRE_SIZE + 4 + 4 + 8 + 8;

/// Encodes, decodes, and validates envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec {
    limits: EnvelopeLimits,
}

impl EnvelopeCodec {
    /// Codec with the given bounds.
    pub fn new(limits: EnvelopeLimits) -> Self {
        Self { limits }
    }

    /// Configured bounds.
    pub fn limits(&self) -> &EnvelopeLimits {
        &self.limits
    }

    /// Largest encoded envelope this codec accepts.
    pub fn max_encoded_len(&self) -> usize {
        FIXED_LEN + self.limits.max_ciphertext_len + self.limits.max_signature_len
    }

    fn check_ttl(&self, ttl: i64) -> Result<()> {
        if ttl < 0 {
            return Err(ProtocolError::MalformedEnvelope(format!(
                "negative ttl: {}",
                ttl
            )));
        }
        if ttl > self.limits.max_ttl_secs {
            return Err(ProtocolError::MalformedEnvelope(format!(
                "ttl {} exceeds maximum {}",
                ttl, self.limits.max_ttl_secs
            )));
        }
        Ok(())
    }

    /// Check field bounds without encoding.
    pub fn check(&self, envelope: &MessageEnvelope) -> Result<()> {
        if envelope.ciphertext().len() > self.limits.max_ciphertext_len {
            return Err(ProtocolError::MalformedEnvelope(format!(
                "ciphertext of {} bytes exceeds maximum {}",
                envelope.ciphertext().len(),
                self.limits.max_ciphertext_len
            )));
        }
        if envelope.signature().len() > self.limits.max_signature_len {
            return Err(ProtocolError::MalformedEnvelope(format!(
                "signature of {} bytes exceeds maximum {}",
                envelope.signature().len(),
                self.limits.max_signature_len
            )));
        }
        self.check_ttl(envelope.ttl())
    }

    /// Serialize an envelope.
    ///
    /// # Errors
    ///
    /// Returns `MalformedEnvelope` if a field is outside the codec bounds, so
    /// everything this produces will decode.
    pub fn encode(&self, envelope: &MessageEnvelope) -> Result<Vec<u8>> {
        self.check(envelope)?;

        let mut out = Vec::with_capacity(
            FIXED_LEN + envelope.ciphertext().len() + envelope.signature().len(),
        );
        out.extend_from_slice(&envelope.sender().to_bytes());
        out.extend_from_slice(&envelope.recipient().to_bytes());
        put_bytes_u32(&mut out, envelope.ciphertext());
        put_bytes_u32(&mut out, envelope.signature());
        out.extend_from_slice(&envelope.timestamp().to_be_bytes());
        out.extend_from_slice(&envelope.ttl().to_be_bytes());
        Ok(out)
    }

    /// Parse an envelope from untrusted bytes.
    pub fn decode(&self, bytes: &[u8]) -> Result<MessageEnvelope> {
        if bytes.len() > self.max_encoded_len() {
            return Err(ProtocolError::MalformedEnvelope(format!(
                "envelope of {} bytes exceeds maximum {}",
                bytes.len(),
                self.max_encoded_len()
            )));
        }

        let malformed = |e: crate::wire::WireError| ProtocolError::MalformedEnvelope(e.to_string());
        let mut r = WireReader::new(bytes);
        let sender = r.session_id().map_err(malformed)?;
        let recipient = r.session_id().map_err(malformed)?;
        let ciphertext = r
            .bytes_u32(self.limits.max_ciphertext_len)
            .map_err(malformed)?
            .to_vec();
        let signature = r
            .bytes_u32(self.limits.max_signature_len)
            .map_err(malformed)?
            .to_vec();
        let timestamp = r.u64().map_err(malformed)?;
        let ttl = r.i64().map_err(malformed)?;
        r.finish().map_err(malformed)?;

        self.check_ttl(ttl)?;

        Ok(MessageEnvelope::new(
            sender, recipient, ciphertext, signature, timestamp, ttl,
        ))
    }

    /// Verify the envelope signature against the sender's signing key.
    ///
    /// # Errors
    ///
    /// - `MalformedEnvelope` if the envelope is outside the codec bounds
    /// - `SignatureInvalid` if the signature does not verify
    pub fn validate(
        &self,
        envelope: &MessageEnvelope,
        sender_key: &SigningPublicKey,
        provider: &dyn CryptoProvider,
    ) -> Result<()> {
        self.check(envelope)?;
        if !provider.verify(sender_key, &envelope.signing_payload(), envelope.signature()) {
            debug!(
                envelope_id = %envelope.id().short(),
                sender = %envelope.sender().short(),
                "Envelope signature rejected"
            );
            return Err(ProtocolError::SignatureInvalid);
        }
        Ok(())
    }
}
