//! Error types for identity operations.

use thiserror::Error;

/// Errors that can occur during identity operations.
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Cryptographic operation failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] pars_crypto::CryptoError),

    /// SessionId text or bytes could not be parsed.
    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    /// SessionId carries a different version prefix than configured.
    #[error("Session id prefix mismatch: expected {expected:02x}, got {actual:02x}")]
    PrefixMismatch {
        /// Configured prefix.
        expected: u8,
        /// Prefix found in the id.
        actual: u8,
    },

    /// Public keys do not hash to the claimed SessionId.
    #[error("Public keys do not match session id {0}")]
    KeyBindingMismatch(String),
}

/// Result type for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;
