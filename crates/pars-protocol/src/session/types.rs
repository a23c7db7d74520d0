//! Session data types.

use std::fmt;

use pars_crypto::{Hash256, KemPublicKey};
use pars_identity::SessionId;
use serde::{Deserialize, Serialize};

use crate::domain_separation::{build_domain_label, purposes};

/// Identifier of a conversation.
///
/// Derived from the sorted participant set and a generation counter, so a
/// conversation keeps its id across restarts and a rekey gets a new one.
/// Distinct from any participant's [`SessionId`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(Hash256);

impl ConversationId {
    /// Derive the id for a sorted participant list.
    pub fn derive(sorted_participants: &[SessionId], generation: u32) -> Self {
        let label = build_domain_label(purposes::CONVERSATION_ID, &generation.to_be_bytes());
        let set = participant_set_digest(sorted_participants);
        Self(Hash256::hash_many(&[&label, set.as_bytes()]))
    }

    /// Wrap raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(Self(Hash256::from_bytes(bytes)?))
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

impl fmt::Debug for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConversationId({})", self.short())
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Digest identifying a participant set regardless of generation.
pub(crate) fn participant_set_digest(sorted_participants: &[SessionId]) -> Hash256 {
    let label = build_domain_label(purposes::PARTICIPANT_SET, &[]);
    let mut inputs: Vec<[u8; SessionId::WIRE_SIZE]> = Vec::with_capacity(sorted_participants.len());
    for id in sorted_participants {
        inputs.push(id.to_bytes());
    }
    let mut refs: Vec<&[u8]> = Vec::with_capacity(inputs.len() + 1);
    refs.push(&label);
    refs.extend(inputs.iter().map(|b| b.as_slice()));
    Hash256::hash_many(&refs)
}

/// Session state machine.
///
/// ```text
/// Pending -> Active -> Closed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Created, key not yet established.
    Pending,
    /// Key established; messages may be sent.
    Active,
    /// Terminal. Closed explicitly or expired.
    Closed,
}

impl SessionStatus {
    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "Pending (awaiting key)",
            SessionStatus::Active => "Active",
            SessionStatus::Closed => "Closed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// One member of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Member address.
    pub session_id: SessionId,
    /// Member's long-term KEM public key.
    pub kem_public: KemPublicKey,
}

/// Snapshot of a session. Carries no key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Conversation id.
    pub id: ConversationId,
    /// Members sorted by SessionId.
    pub participants: Vec<Participant>,
    /// Current status.
    pub status: SessionStatus,
    /// Creation time, Unix seconds.
    pub created_at: u64,
    /// Time after which the session reads as closed.
    pub expires_at: u64,
    /// Rekey generation, starting at 0.
    pub generation: u32,
}

impl Session {
    /// Whether `id` is a member.
    pub fn has_participant(&self, id: &SessionId) -> bool {
        self.participants.iter().any(|p| &p.session_id == id)
    }

    /// Members other than `local`.
    pub fn peers<'a>(&'a self, local: &'a SessionId) -> impl Iterator<Item = &'a Participant> + 'a {
        self.participants
            .iter()
            .filter(move |p| &p.session_id != local)
    }
}

/// Signed ciphertext handed to [`crate::session::SessionManager::send_message`].
#[derive(Debug, Clone)]
pub struct SealedMessage {
    /// Recipient address.
    pub recipient: SessionId,
    /// Encrypted payload.
    pub ciphertext: Vec<u8>,
    /// Sender's signature over the canonical payload.
    pub signature: Vec<u8>,
    /// Creation time, Unix seconds.
    pub timestamp: u64,
    /// Lifetime in seconds.
    pub ttl: i64,
}

/// Session counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Sessions awaiting a key.
    pub pending: usize,
    /// Sessions accepting messages.
    pub active: usize,
    /// Closed sessions not yet purged.
    pub closed: usize,
}
