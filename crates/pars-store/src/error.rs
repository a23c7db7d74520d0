//! Error types for storage operations.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Key is absent or its record has expired.
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Storing would exceed the configured maximum size.
    #[error("Storage capacity exceeded: need {requested} bytes, {available} available")]
    CapacityExceeded {
        /// Additional bytes the write needed.
        requested: u64,
        /// Bytes still free.
        available: u64,
    },

    /// Key is empty or too long.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// TTL must be positive.
    #[error("Invalid TTL: {0}")]
    InvalidTtl(i64),

    /// Configuration rejected.
    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Whether the caller may retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::CapacityExceeded { .. })
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_capacity_is_retryable() {
        assert!(StoreError::CapacityExceeded {
            requested: 10,
            available: 1
        }
        .is_retryable());
        assert!(!StoreError::NotFound("k".into()).is_retryable());
        assert!(!StoreError::InvalidTtl(0).is_retryable());
    }

    #[test]
    fn test_capacity_message() {
        let err = StoreError::CapacityExceeded {
            requested: 10,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            "Storage capacity exceeded: need 10 bytes, 1 available"
        );
    }
}
