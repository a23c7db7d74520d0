//! Domain separation for every hash, signature, and key derivation.
//!
//! Labels have the form `"PARS-v1." || purpose || "." || len(context) || context`
//! with the context length as 4-byte big-endian, so no output from one
//! purpose can be replayed as input to another.

/// Build a domain-separated label.
pub fn build_domain_label(purpose: &str, context: &[u8]) -> Vec<u8> {
    let mut label = Vec::with_capacity(PREFIX.len() + purpose.len() + 1 + 4 + context.len());
    label.extend_from_slice(PREFIX);
    label.extend_from_slice(purpose.as_bytes());
    label.push(b'.');
    label.extend_from_slice(&(context.len() as u32).to_be_bytes());
    label.extend_from_slice(context);
    label
}

const PREFIX: &[u8] = b"PARS-v1.";

/// Purposes used with [`build_domain_label`].
pub mod purposes {
    /// Canonical envelope signing payload.
    pub const ENVELOPE_SIG: &str = "ENVELOPE-SIG";
    /// Envelope identifier.
    pub const ENVELOPE_ID: &str = "ENVELOPE-ID";
    /// Conversation identifier.
    pub const CONVERSATION_ID: &str = "CONVERSATION-ID";
    /// Digest of a sorted participant set.
    pub const PARTICIPANT_SET: &str = "PARTICIPANT-SET";
}

/// BLAKE3 key-derivation contexts.
pub mod kdf {
    /// Two-party session key from a KEM shared secret.
    pub const SESSION_KEY: &str = "pars-v1 session key";
    /// Key wrapping a group session key for one member.
    pub const GROUP_KEY_WRAP: &str = "pars-v1 group key wrap";
    /// Onion layer key.
    pub const ONION_LAYER: &str = "pars-v1 onion layer key";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_format() {
        let label = build_domain_label(purposes::ENVELOPE_SIG, b"ctx");
        assert!(label.starts_with(b"PARS-v1.ENVELOPE-SIG."));
        let len_offset = PREFIX.len() + purposes::ENVELOPE_SIG.len() + 1;
        let len = u32::from_be_bytes(label[len_offset..len_offset + 4].try_into().unwrap());
        assert_eq!(len, 3);
        assert!(label.ends_with(b"ctx"));
    }

    #[test]
    fn test_purposes_separate() {
        assert_ne!(
            build_domain_label(purposes::ENVELOPE_SIG, b"x"),
            build_domain_label(purposes::ENVELOPE_ID, b"x")
        );
    }

    #[test]
    fn test_contexts_separate() {
        assert_ne!(
            build_domain_label(purposes::CONVERSATION_ID, b"a"),
            build_domain_label(purposes::CONVERSATION_ID, b"b")
        );
    }
}
