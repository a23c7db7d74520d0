//! Time sources.
//!
//! Every TTL and expiry decision reads the current time through a
//! [`Clock`], so tests can move time forward without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};

/// Source of the current Unix time in seconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current Unix timestamp in seconds.
    fn now(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        // Pre-epoch system time reads as 0, which makes everything look expired.
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Start at `now` seconds.
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    /// Move forward by `secs`.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Expiry time for something created at `now` with a signed TTL.
///
/// Non-positive TTLs expire immediately.
pub fn expiry(now: u64, ttl_secs: i64) -> u64 {
    match u64::try_from(ttl_secs) {
        Ok(ttl) => now.saturating_add(ttl),
        Err(_) => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_recent() {
        // 2024-01-01
        assert!(SystemClock.now() > 1_704_067_200);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now(), 1_000);
        clock.advance(61);
        assert_eq!(clock.now(), 1_061);
        clock.set(5);
        assert_eq!(clock.now(), 5);
    }

    #[test]
    fn test_expiry() {
        assert_eq!(expiry(100, 60), 160);
        assert_eq!(expiry(100, 0), 100);
        assert_eq!(expiry(100, -5), 100);
        assert_eq!(expiry(u64::MAX - 1, 10), u64::MAX);
    }
}
