//! Sessions between identities.
//!
//! A session binds a fixed participant set to a symmetric key. Two-party
//! sessions are keyed by a single KEM encapsulation to the peer; larger
//! groups get a random key wrapped for every member. Peers learn the key
//! from a [`KeyExchange`].

mod exchange;
mod manager;
mod types;

pub use exchange::{KeyExchange, KeyShare};
pub use manager::{SessionConfig, SessionManager};
pub use types::{
    ConversationId, Participant, SealedMessage, Session, SessionStats, SessionStatus,
};
