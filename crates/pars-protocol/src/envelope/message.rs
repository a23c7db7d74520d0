//! The message envelope and its canonical signing payload.

use pars_crypto::Hash256;
use pars_identity::SessionId;
use serde::{Deserialize, Serialize};

use crate::domain_separation::{build_domain_label, purposes};
use crate::time;
use crate::wire::put_bytes_u32;

/// Identifier of an envelope, derived from its contents.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvelopeId(Hash256);

impl EnvelopeId {
    /// Size in bytes.
    pub const SIZE: usize = Hash256::SIZE;

    /// Wrap a digest.
    pub fn from_hash(hash: Hash256) -> Self {
        Self(hash)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Hex form.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Short hex form for logs.
    pub fn short(&self) -> String {
        self.0.to_hex()[..12].to_string()
    }
}

impl std::fmt::Debug for EnvelopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EnvelopeId({})", self.short())
    }
}

impl std::fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Bytes covered by an envelope signature.
///
/// Exactly `(sender, recipient, ciphertext, timestamp)` in that order, under
/// the envelope-signature domain label. TTL is not signed; the codec bounds it.
pub fn signing_payload(
    sender: &SessionId,
    recipient: &SessionId,
    ciphertext: &[u8],
    timestamp: u64,
) -> Vec<u8> {
    let mut payload = build_domain_label(purposes::ENVELOPE_SIG, &[]);
    payload.reserve(2 * SessionId::WIRE_SIZE + 4 + ciphertext.len() + 8);
    payload.extend_from_slice(&sender.to_bytes());
    payload.extend_from_slice(&recipient.to_bytes());
    put_bytes_u32(&mut payload, ciphertext);
    payload.extend_from_slice(&timestamp.to_be_bytes());
    payload
}

/// A signed, encrypted message addressed from one SessionId to another.
///
/// Immutable: every field is set at construction and the id is derived
/// from the rest, so any change produces a different envelope.
#[derive(Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    id: EnvelopeId,
    sender: SessionId,
    recipient: SessionId,
    ciphertext: Vec<u8>,
    signature: Vec<u8>,
    timestamp: u64,
    ttl: i64,
}

impl MessageEnvelope {
    /// Assemble an envelope and derive its id.
    pub fn new(
        sender: SessionId,
        recipient: SessionId,
        ciphertext: Vec<u8>,
        signature: Vec<u8>,
        timestamp: u64,
        ttl: i64,
    ) -> Self {
        let id = Self::derive_id(&sender, &recipient, &ciphertext, &signature, timestamp, ttl);
        Self {
            id,
            sender,
            recipient,
            ciphertext,
            signature,
            timestamp,
            ttl,
        }
    }

    fn derive_id(
        sender: &SessionId,
        recipient: &SessionId,
        ciphertext: &[u8],
        signature: &[u8],
        timestamp: u64,
        ttl: i64,
    ) -> EnvelopeId {
        let label = build_domain_label(purposes::ENVELOPE_ID, &[]);
        EnvelopeId(Hash256::hash_many(&[
            &label,
            &sender.to_bytes(),
            &recipient.to_bytes(),
            ciphertext,
            signature,
            &timestamp.to_be_bytes(),
            &ttl.to_be_bytes(),
        ]))
    }

    /// Content-derived identifier.
    pub fn id(&self) -> EnvelopeId {
        self.id
    }

    /// Sender's SessionId.
    pub fn sender(&self) -> &SessionId {
        &self.sender
    }

    /// Recipient's SessionId.
    pub fn recipient(&self) -> &SessionId {
        &self.recipient
    }

    /// Encrypted payload.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Detached signature over [`signing_payload`].
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Creation time, Unix seconds.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Lifetime in seconds.
    pub fn ttl(&self) -> i64 {
        self.ttl
    }

    /// Time after which the envelope is dead.
    pub fn expires_at(&self) -> u64 {
        time::expiry(self.timestamp, self.ttl)
    }

    /// Whether the envelope has outlived its TTL at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at()
    }

    /// The bytes the sender signed.
    pub fn signing_payload(&self) -> Vec<u8> {
        signing_payload(&self.sender, &self.recipient, &self.ciphertext, self.timestamp)
    }
}

impl std::fmt::Debug for MessageEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageEnvelope")
            .field("id", &self.id)
            .field("sender", &self.sender)
            .field("recipient", &self.recipient)
            .field("ciphertext_len", &self.ciphertext.len())
            .field("signature_len", &self.signature.len())
            .field("timestamp", &self.timestamp)
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (SessionId, SessionId) {
        (
            SessionId::derive(7, b"a-kem", b"a-sig"),
            SessionId::derive(7, b"b-kem", b"b-sig"),
        )
    }

    #[test]
    fn test_id_depends_on_every_field() {
        let (a, b) = ids();
        let base = MessageEnvelope::new(a, b, vec![1, 2], vec![3], 100, 60);
        let variants = [
            MessageEnvelope::new(b, a, vec![1, 2], vec![3], 100, 60),
            MessageEnvelope::new(a, b, vec![1, 3], vec![3], 100, 60),
            MessageEnvelope::new(a, b, vec![1, 2], vec![4], 100, 60),
            MessageEnvelope::new(a, b, vec![1, 2], vec![3], 101, 60),
            MessageEnvelope::new(a, b, vec![1, 2], vec![3], 100, 61),
        ];
        for v in variants {
            assert_ne!(v.id(), base.id());
        }
        assert_eq!(
            MessageEnvelope::new(a, b, vec![1, 2], vec![3], 100, 60).id(),
            base.id()
        );
    }

    #[test]
    fn test_signing_payload_excludes_ttl() {
        let (a, b) = ids();
        let short = MessageEnvelope::new(a, b, vec![9], vec![], 100, 60);
        let long = MessageEnvelope::new(a, b, vec![9], vec![], 100, 6000);
        assert_eq!(short.signing_payload(), long.signing_payload());
    }

    #[test]
    fn test_signing_payload_field_order() {
        let (a, b) = ids();
        let forward = signing_payload(&a, &b, b"ct", 5);
        let reversed = signing_payload(&b, &a, b"ct", 5);
        assert_ne!(forward, reversed);
        assert!(forward.ends_with(&5u64.to_be_bytes()));
    }

    #[test]
    fn test_expiry() {
        let (a, b) = ids();
        let env = MessageEnvelope::new(a, b, vec![], vec![], 1_000, 30);
        assert_eq!(env.expires_at(), 1_030);
        assert!(!env.is_expired(1_029));
        assert!(env.is_expired(1_030));
    }

    #[test]
    fn test_debug_omits_payload() {
        let (a, b) = ids();
        let env = MessageEnvelope::new(a, b, vec![0xAA; 3], vec![], 1, 1);
        let debug = format!("{:?}", env);
        assert!(debug.contains("ciphertext_len: 3"));
    }
}
