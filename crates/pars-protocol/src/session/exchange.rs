//! Key exchange messages that carry a session key to each peer.

use pars_crypto::KemCiphertext;
use pars_identity::SessionId;
use serde::{Deserialize, Serialize};

use super::types::{ConversationId, Participant};
use crate::limits::MAX_KEY_EXCHANGE_SIZE;
use crate::{ProtocolError, Result};

/// The session key, encapsulated for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShare {
    /// Participant the share is addressed to.
    pub recipient: SessionId,
    /// KEM ciphertext for the recipient's long-term KEM key.
    pub kem_ciphertext: KemCiphertext,
    /// Group key sealed under the KEM-derived wrap key. `None` for two-party
    /// sessions, where the KEM secret itself derives the session key.
    pub wrapped_key: Option<Vec<u8>>,
}

/// Everything a responder needs to install a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchange {
    /// Conversation being established.
    pub conversation_id: ConversationId,
    /// Rekey generation.
    pub generation: u32,
    /// Participant who created the session.
    pub initiator: SessionId,
    /// All members, sorted by SessionId.
    pub participants: Vec<Participant>,
    /// Share for the recipient of this message.
    pub share: KeyShare,
}

impl KeyExchange {
    /// Serialize with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ProtocolError::InvalidKeyExchange(e.to_string()))
    }

    /// Deserialize untrusted bytes.
    ///
    /// Size is checked before decoding so a forged length field cannot force
    /// a large allocation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_KEY_EXCHANGE_SIZE {
            return Err(ProtocolError::InvalidKeyExchange(format!(
                "key exchange of {} bytes exceeds maximum {}",
                bytes.len(),
                MAX_KEY_EXCHANGE_SIZE
            )));
        }
        bincode::deserialize(bytes).map_err(|e| ProtocolError::InvalidKeyExchange(e.to_string()))
    }
}
