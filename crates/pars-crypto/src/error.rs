//! Error types for cryptographic operations.

use thiserror::Error;

/// Errors that can occur inside a crypto provider.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Key generation failed.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (invalid ciphertext, key, or associated data).
    #[error("Decryption failed: invalid ciphertext or key")]
    Decryption,

    /// Signature verification failed.
    #[error("Signature verification failed")]
    SignatureVerification,

    /// Signing failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Invalid key length.
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length.
        expected: usize,
        /// Actual key length.
        actual: usize,
    },

    /// Key bytes have the right length but are not a usable key.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Invalid hash length.
    #[error("Invalid hash length: expected {expected}, got {actual}")]
    InvalidHashLength {
        /// Expected hash length.
        expected: usize,
        /// Actual hash length.
        actual: usize,
    },

    /// Invalid hex string format.
    #[error("Invalid hex string: {0}")]
    InvalidHexFormat(String),

    /// Key encapsulation failed.
    #[error("Key encapsulation failed: {0}")]
    Encapsulation(String),

    /// Key decapsulation failed.
    #[error("Key decapsulation failed")]
    Decapsulation,

    /// Random number generation failed.
    #[error("Random number generation failed: {0}")]
    Rng(String),
}

impl CryptoError {
    /// Whether this error means authentication of the input failed.
    ///
    /// Authentication failures indicate tampering or a wrong key and are
    /// never worth retrying. Everything else is a provider failure.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            CryptoError::Decryption | CryptoError::Decapsulation | CryptoError::SignatureVerification
        )
    }
}

/// Result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
