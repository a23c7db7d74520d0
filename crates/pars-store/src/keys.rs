//! Storage key layout.
//!
//! ```text
//! mailbox/<recipient hex>/<envelope id hex>   committed envelopes
//! spool/<relay hex>/<packet digest hex>       packets held by a relay
//! ```

use pars_crypto::Hash256;
use pars_identity::SessionId;
use pars_protocol::EnvelopeId;

/// Prefix of every mailbox key.
pub const MAILBOX_PREFIX: &str = "mailbox/";

/// Prefix of every relay spool key.
pub const SPOOL_PREFIX: &str = "spool/";

/// Largest key accepted by the storage node.
pub const MAX_KEY_LEN: usize = 1024;

/// Prefix listing every envelope waiting for `recipient`.
pub fn mailbox_prefix(recipient: &SessionId) -> Vec<u8> {
    format!("{}{}/", MAILBOX_PREFIX, recipient.to_hex()).into_bytes()
}

/// Key for one envelope in `recipient`'s mailbox.
pub fn mailbox_key(recipient: &SessionId, envelope_id: &EnvelopeId) -> Vec<u8> {
    let mut key = mailbox_prefix(recipient);
    key.extend_from_slice(envelope_id.to_hex().as_bytes());
    key
}

/// Key under which `relay` holds a packet while unwrapping it.
pub fn spool_key(relay: &SessionId, packet_digest: &Hash256) -> Vec<u8> {
    format!("{}{}/{}", SPOOL_PREFIX, relay.to_hex(), packet_digest.to_hex()).into_bytes()
}

/// Printable form of a key for logs and errors.
pub fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> SessionId {
        SessionId::derive(7, b"kem", b"sig")
    }

    #[test]
    fn test_mailbox_key_under_prefix() {
        let id = EnvelopeId::from_hash(Hash256::hash(b"envelope"));
        let key = mailbox_key(&recipient(), &id);
        assert!(key.starts_with(&mailbox_prefix(&recipient())));
        assert!(key.ends_with(id.to_hex().as_bytes()));
        assert_eq!(key.len(), MAILBOX_PREFIX.len() + 66 + 1 + 64);
    }

    #[test]
    fn test_mailboxes_do_not_share_prefixes() {
        let other = SessionId::derive(7, b"kem2", b"sig2");
        let id = EnvelopeId::from_hash(Hash256::hash(b"envelope"));
        assert!(!mailbox_key(&other, &id).starts_with(&mailbox_prefix(&recipient())));
    }

    #[test]
    fn test_spool_key_format() {
        let key = spool_key(&recipient(), &Hash256::hash(b"packet"));
        let text = display_key(&key);
        assert!(text.starts_with("spool/07"));
        assert_eq!(text.matches('/').count(), 2);
    }
}
