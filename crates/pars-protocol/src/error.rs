//! Error types for protocol operations.

use thiserror::Error;

/// Errors that can occur in the session, envelope, and onion layers.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Cryptographic provider failure.
    #[error("Crypto error: {0}")]
    Crypto(#[from] pars_crypto::CryptoError),

    /// Identity error.
    #[error("Identity error: {0}")]
    Identity(#[from] pars_identity::IdentityError),

    /// A participant id or key was rejected.
    #[error("Invalid participant: {0}")]
    InvalidParticipant(String),

    /// Envelope bytes or fields violate the wire format.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Envelope signature does not verify against the sender's key.
    #[error("Envelope signature is invalid")]
    SignatureInvalid,

    /// A layer or payload could not be decrypted.
    #[error("Decryption failed")]
    DecryptionFailed,

    /// A hop's public key failed validation.
    #[error("Invalid hop key: {0}")]
    InvalidHopKey(String),

    /// Fewer hops than the configured minimum.
    #[error("Path too short: need at least {min} hops, got {actual}")]
    PathTooShort {
        /// Configured minimum.
        min: usize,
        /// Hops supplied.
        actual: usize,
    },

    /// Not enough eligible relays to build a path.
    #[error("Not enough relays: need {needed}, have {available}")]
    NotEnoughRelays {
        /// Hops requested.
        needed: usize,
        /// Eligible relays.
        available: usize,
    },

    /// A selected path violates the selection contract.
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Session does not exist.
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Session is closed or expired.
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Session has no key yet.
    #[error("Session pending key establishment: {0}")]
    SessionPending(String),

    /// A key exchange message is inconsistent.
    #[error("Invalid key exchange: {0}")]
    InvalidKeyExchange(String),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
