//! Framing of the bytes carried in an envelope's ciphertext field.
//!
//! ```text
//! SEALED     0x01 || conversation id (32) || AEAD(session key)
//! HANDSHAKE  0x02 || bincode(KeyExchange)
//! ```
//!
//! A handshake carries KEM output for the recipient's long-term key, since no
//! session key exists yet on the receiving side.

use pars_protocol::session::KeyExchange;
use pars_protocol::{ConversationId, ProtocolError};

/// Mode byte for messages encrypted under a session key.
pub const MODE_SEALED: u8 = 0x01;

/// Mode byte for key exchange messages.
pub const MODE_HANDSHAKE: u8 = 0x02;

const CONVERSATION_ID_LEN: usize = 32;

/// Decoded envelope payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Application data sealed under the session key.
    Sealed {
        /// Conversation the key belongs to.
        conversation: ConversationId,
        /// AEAD output.
        ciphertext: Vec<u8>,
    },
    /// Session key share for the recipient.
    Handshake(KeyExchange),
}

impl Payload {
    /// Serialize with the leading mode byte.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Payload::Sealed {
                conversation,
                ciphertext,
            } => {
                let mut out = Vec::with_capacity(1 + CONVERSATION_ID_LEN + ciphertext.len());
                out.push(MODE_SEALED);
                out.extend_from_slice(conversation.as_bytes());
                out.extend_from_slice(ciphertext);
                Ok(out)
            }
            Payload::Handshake(exchange) => {
                let body = exchange.to_bytes()?;
                let mut out = Vec::with_capacity(1 + body.len());
                out.push(MODE_HANDSHAKE);
                out.extend_from_slice(&body);
                Ok(out)
            }
        }
    }

    /// Parse untrusted bytes.
    ///
    /// # Errors
    ///
    /// `MalformedEnvelope` for an unknown mode or a truncated body,
    /// `InvalidKeyExchange` for an undecodable handshake.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (&mode, body) = bytes
            .split_first()
            .ok_or_else(|| ProtocolError::MalformedEnvelope("empty payload".into()))?;
        match mode {
            MODE_SEALED => {
                if body.len() < CONVERSATION_ID_LEN {
                    return Err(ProtocolError::MalformedEnvelope(format!(
                        "sealed payload of {} bytes is truncated",
                        bytes.len()
                    )));
                }
                let (id, ciphertext) = body.split_at(CONVERSATION_ID_LEN);
                Ok(Payload::Sealed {
                    conversation: ConversationId::from_bytes(id)?,
                    ciphertext: ciphertext.to_vec(),
                })
            }
            MODE_HANDSHAKE => Ok(Payload::Handshake(KeyExchange::from_bytes(body)?)),
            other => Err(ProtocolError::MalformedEnvelope(format!(
                "unknown payload mode {:#04x}",
                other
            ))),
        }
    }

    /// Conversation this payload belongs to.
    pub fn conversation(&self) -> ConversationId {
        match self {
            Payload::Sealed { conversation, .. } => *conversation,
            Payload::Handshake(exchange) => exchange.conversation_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pars_identity::SessionId;

    fn conversation() -> ConversationId {
        let mut ids = vec![
            SessionId::derive(7, b"k1", b"s1"),
            SessionId::derive(7, b"k2", b"s2"),
        ];
        ids.sort();
        ConversationId::derive(&ids, 0)
    }

    #[test]
    fn test_sealed_layout() {
        let payload = Payload::Sealed {
            conversation: conversation(),
            ciphertext: vec![0xaa; 20],
        };
        let bytes = payload.encode().unwrap();
        assert_eq!(bytes[0], MODE_SEALED);
        assert_eq!(&bytes[1..33], conversation().as_bytes());
        assert_eq!(bytes.len(), 1 + 32 + 20);
        assert_eq!(Payload::decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        assert!(matches!(
            Payload::decode(&[0x09, 1, 2, 3]),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            Payload::decode(&[]),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_truncated_sealed_rejected() {
        let mut bytes = vec![MODE_SEALED];
        bytes.extend_from_slice(&[0u8; 31]);
        assert!(matches!(
            Payload::decode(&bytes),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_garbage_handshake_rejected() {
        assert!(matches!(
            Payload::decode(&[MODE_HANDSHAKE, 0xff, 0xff]),
            Err(ProtocolError::InvalidKeyExchange(_))
        ));
    }
}
