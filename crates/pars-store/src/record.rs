//! Stored records.

/// Fixed per-record overhead charged against capacity.
pub const RECORD_OVERHEAD: u64 = 16;

/// One stored value and its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRecord {
    /// Stored bytes.
    pub data: Vec<u8>,
    /// Unix seconds when written.
    pub stored_at: u64,
    /// Unix seconds from which the record is unreachable.
    pub expires_at: u64,
}

impl StorageRecord {
    /// Whether the record is past its expiry at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Bytes charged for this record stored under a key of `key_len` bytes.
    pub fn charged_size(&self, key_len: usize) -> u64 {
        charged_size(key_len, self.data.len())
    }
}

/// Bytes charged for a record with the given key and value lengths.
pub fn charged_size(key_len: usize, data_len: usize) -> u64 {
    (key_len as u64)
        .saturating_add(data_len as u64)
        .saturating_add(RECORD_OVERHEAD)
}
