//! Error types for messaging operations.
//!
//! Every lower-layer error converts into [`CoreError`] with `?`.
//! [`CoreError::kind`] collapses the chain into the handful of categories a
//! caller acts on, and [`CoreError::is_retryable`] answers whether trying
//! again later can help.

use std::fmt;

use pars_crypto::CryptoError;
use pars_identity::IdentityError;
use pars_protocol::ProtocolError;
use pars_store::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during messaging operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Cryptographic error.
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    /// Identity error.
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Storage error.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Component has not been started.
    #[error("{0} not running")]
    NotRunning(&'static str),

    /// Subsystem is disabled by configuration.
    #[error("Pars messaging is disabled")]
    Disabled,

    /// No public identity registered for a SessionId.
    #[error("Unknown contact: {0}")]
    UnknownContact(String),

    /// A relay could not be reached.
    #[error("Relay unreachable: {0}")]
    RelayUnreachable(String),

    /// The caller's deadline passed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Argument rejected before any work was done.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Category of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Crypto provider failure.
    CryptoFailure,
    /// Participant id or key rejected.
    InvalidParticipant,
    /// Wire data violates the format.
    MalformedEnvelope,
    /// Relay key rejected.
    InvalidHopKey,
    /// Session or storage key absent.
    NotFound,
    /// Session is closed or expired.
    SessionClosed,
    /// Session has no key yet.
    SessionPending,
    /// Signature does not verify.
    SignatureInvalid,
    /// Ciphertext does not authenticate.
    DecryptionFailed,
    /// Storage is full.
    CapacityExceeded,
    /// Relay path is too short or otherwise unusable.
    PathTooShort,
    /// Configuration rejected.
    Configuration,
    /// Component not running or disabled.
    NotRunning,
    /// Relay transport failure.
    Unavailable,
    /// Caller deadline passed.
    DeadlineExceeded,
    /// Caller input rejected.
    InvalidArgument,
}

impl ErrorKind {
    /// Short machine-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CryptoFailure => "crypto_failure",
            ErrorKind::InvalidParticipant => "invalid_participant",
            ErrorKind::MalformedEnvelope => "malformed_envelope",
            ErrorKind::InvalidHopKey => "invalid_hop_key",
            ErrorKind::NotFound => "not_found",
            ErrorKind::SessionClosed => "session_closed",
            ErrorKind::SessionPending => "session_pending",
            ErrorKind::SignatureInvalid => "signature_invalid",
            ErrorKind::DecryptionFailed => "decryption_failed",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::PathTooShort => "path_too_short",
            ErrorKind::Configuration => "configuration",
            ErrorKind::NotRunning => "not_running",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::InvalidArgument => "invalid_argument",
        }
    }

    /// Whether this kind signals tampering or a wrong key.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, ErrorKind::SignatureInvalid | ErrorKind::DecryptionFailed)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn crypto_kind(err: &CryptoError) -> ErrorKind {
    match err {
        CryptoError::Decryption | CryptoError::Decapsulation => ErrorKind::DecryptionFailed,
        CryptoError::SignatureVerification => ErrorKind::SignatureInvalid,
        _ => ErrorKind::CryptoFailure,
    }
}

fn identity_kind(err: &IdentityError) -> ErrorKind {
    match err {
        IdentityError::Crypto(e) => crypto_kind(e),
        IdentityError::InvalidSessionId(_)
        | IdentityError::PrefixMismatch { .. }
        | IdentityError::KeyBindingMismatch(_) => ErrorKind::InvalidParticipant,
    }
}

fn protocol_kind(err: &ProtocolError) -> ErrorKind {
    match err {
        ProtocolError::Crypto(e) => crypto_kind(e),
        ProtocolError::Identity(e) => identity_kind(e),
        ProtocolError::InvalidParticipant(_) => ErrorKind::InvalidParticipant,
        ProtocolError::MalformedEnvelope(_) | ProtocolError::InvalidKeyExchange(_) => {
            ErrorKind::MalformedEnvelope
        }
        ProtocolError::SignatureInvalid => ErrorKind::SignatureInvalid,
        ProtocolError::DecryptionFailed => ErrorKind::DecryptionFailed,
        ProtocolError::InvalidHopKey(_) => ErrorKind::InvalidHopKey,
        ProtocolError::PathTooShort { .. }
        | ProtocolError::NotEnoughRelays { .. }
        | ProtocolError::InvalidPath(_) => ErrorKind::PathTooShort,
        ProtocolError::NotFound(_) => ErrorKind::NotFound,
        ProtocolError::SessionClosed(_) => ErrorKind::SessionClosed,
        ProtocolError::SessionPending(_) => ErrorKind::SessionPending,
    }
}

fn store_kind(err: &StoreError) -> ErrorKind {
    match err {
        StoreError::NotFound(_) => ErrorKind::NotFound,
        StoreError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
        StoreError::InvalidKey(_) | StoreError::InvalidTtl(_) => ErrorKind::InvalidArgument,
        StoreError::InvalidConfig(_) => ErrorKind::Configuration,
    }
}

impl CoreError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Config(_) => ErrorKind::Configuration,
            CoreError::Crypto(e) => crypto_kind(e),
            CoreError::Identity(e) => identity_kind(e),
            CoreError::Protocol(e) => protocol_kind(e),
            CoreError::Store(e) => store_kind(e),
            CoreError::NotRunning(_) | CoreError::Disabled => ErrorKind::NotRunning,
            CoreError::UnknownContact(_) => ErrorKind::InvalidParticipant,
            CoreError::RelayUnreachable(_) => ErrorKind::Unavailable,
            CoreError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            CoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Whether retrying later may succeed.
    ///
    /// Authentication failures and session errors are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::CapacityExceeded | ErrorKind::Unavailable | ErrorKind::DeadlineExceeded
        )
    }
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, CoreError>;
