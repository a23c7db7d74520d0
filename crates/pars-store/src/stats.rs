//! Storage node counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters, updated lock-free.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Successful writes.
    pub records_stored: AtomicU64,
    /// Successful reads.
    pub records_retrieved: AtomicU64,
    /// Reads of absent or expired keys.
    pub retrieve_misses: AtomicU64,
    /// Explicit deletes that removed a record.
    pub records_deleted: AtomicU64,
    /// Records reclaimed after expiry.
    pub records_expired: AtomicU64,
    /// Writes refused for lack of space.
    pub capacity_rejections: AtomicU64,
    /// Completed sweeps.
    pub sweeps: AtomicU64,
}

impl StorageStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StorageStatsSnapshot {
        StorageStatsSnapshot {
            records_stored: self.records_stored.load(Ordering::Relaxed),
            records_retrieved: self.records_retrieved.load(Ordering::Relaxed),
            retrieve_misses: self.retrieve_misses.load(Ordering::Relaxed),
            records_deleted: self.records_deleted.load(Ordering::Relaxed),
            records_expired: self.records_expired.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`StorageStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStatsSnapshot {
    /// Successful writes.
    pub records_stored: u64,
    /// Successful reads.
    pub records_retrieved: u64,
    /// Reads of absent or expired keys.
    pub retrieve_misses: u64,
    /// Explicit deletes that removed a record.
    pub records_deleted: u64,
    /// Records reclaimed after expiry.
    pub records_expired: u64,
    /// Writes refused for lack of space.
    pub capacity_rejections: u64,
    /// Completed sweeps.
    pub sweeps: u64,
}

/// Space accounting for a storage node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    /// Bytes charged, including expired records not yet reclaimed.
    pub used_bytes: u64,
    /// Configured maximum.
    pub max_bytes: u64,
    /// Records held, including expired ones not yet reclaimed.
    pub records: usize,
}

impl StorageUsage {
    /// Bytes still free.
    pub fn available_bytes(&self) -> u64 {
        self.max_bytes.saturating_sub(self.used_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let stats = StorageStats::new();
        StorageStats::incr(&stats.records_stored);
        StorageStats::incr(&stats.records_stored);
        StorageStats::add(&stats.records_expired, 5);
        let snap = stats.snapshot();
        assert_eq!(snap.records_stored, 2);
        assert_eq!(snap.records_expired, 5);
        assert_eq!(snap.records_deleted, 0);
    }

    #[test]
    fn test_available_bytes_saturates() {
        let usage = StorageUsage {
            used_bytes: 10,
            max_bytes: 4,
            records: 1,
        };
        assert_eq!(usage.available_bytes(), 0);
    }
}
