//! The storage node.
//!
//! Records live in a fixed number of shards, each behind its own
//! `tokio::sync::RwLock`, so writes to unrelated keys rarely contend. Space
//! is accounted in a single atomic counter: a write reserves its net growth
//! with compare-and-swap before inserting, so concurrent writers can never
//! overshoot the configured maximum together.
//!
//! Expiry is checked on every access. Physical reclamation happens lazily on
//! access, on a periodic sweep, and before a write is refused for space.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pars_protocol::time::{expiry, Clock, SystemClock};
use pars_protocol::{Lifecycle, LifecycleState};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::keys::{display_key, MAX_KEY_LEN};
use crate::record::{charged_size, StorageRecord};
use crate::stats::{StorageStats, StorageStatsSnapshot, StorageUsage};
use crate::{Result, StoreError};

/// Default capacity (10 GiB).
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Default number of shards.
pub const DEFAULT_SHARD_COUNT: usize = 16;

/// Default sweep interval in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Storage node configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Maximum bytes charged across all records.
    pub max_size_bytes: u64,
    /// Number of independently locked shards.
    pub shard_count: usize,
    /// Seconds between background sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            shard_count: DEFAULT_SHARD_COUNT,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

impl StorageConfig {
    /// Check that every field is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_size_bytes == 0 {
            return Err(StoreError::InvalidConfig(
                "max_size_bytes must be positive".into(),
            ));
        }
        if self.shard_count == 0 {
            return Err(StoreError::InvalidConfig(
                "shard_count must be positive".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(StoreError::InvalidConfig(
                "sweep_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Health summary of a storage node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageHealth {
    /// Whether the node is running.
    pub healthy: bool,
    /// Human-readable detail.
    pub message: String,
}

type Shard = RwLock<HashMap<Vec<u8>, StorageRecord>>;

/// TTL-bounded key-value store for ciphertext blobs.
pub struct StorageNode {
    config: StorageConfig,
    shards: Vec<Shard>,
    hasher: RandomState,
    used_bytes: AtomicU64,
    clock: Arc<dyn Clock>,
    stats: StorageStats,
    lifecycle: Lifecycle,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl StorageNode {
    /// Create a node reading time from the system clock.
    pub fn new(config: StorageConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a node with an explicit time source.
    pub fn with_clock(config: StorageConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        info!(
            max_size_bytes = config.max_size_bytes,
            shards = config.shard_count,
            sweep_interval_secs = config.sweep_interval_secs,
            "Creating storage node"
        );
        Ok(Self {
            shards: (0..config.shard_count)
                .map(|_| RwLock::new(HashMap::new()))
                .collect(),
            config,
            hasher: RandomState::new(),
            used_bytes: AtomicU64::new(0),
            clock,
            stats: StorageStats::new(),
            lifecycle: Lifecycle::new(),
            sweeper: Mutex::new(None),
        })
    }

    /// Current configuration.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Lifecycle state of the background sweeper.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    fn shard(&self, key: &[u8]) -> &Shard {
        let index = (self.hasher.hash_one(key) % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    fn check_key(key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".into()));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(StoreError::InvalidKey(format!(
                "key of {} bytes exceeds maximum {}",
                key.len(),
                MAX_KEY_LEN
            )));
        }
        Ok(())
    }

    /// Reserve `bytes` of capacity, or report how much is free.
    fn reserve(&self, bytes: u64) -> std::result::Result<(), u64> {
        let max = self.config.max_size_bytes;
        self.used_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= max)
            })
            .map(|_| ())
            .map_err(|used| max.saturating_sub(used))
    }

    fn release(&self, bytes: u64) {
        if bytes > 0 {
            self.used_bytes.fetch_sub(bytes, Ordering::AcqRel);
        }
    }

    /// Store `data` under `key` for `ttl_secs` seconds.
    ///
    /// Overwriting replaces both the data and the expiry. If the write does
    /// not fit, expired records are reclaimed and the check is retried once.
    ///
    /// # Errors
    ///
    /// - `InvalidKey` for an empty or oversized key
    /// - `InvalidTtl` unless `ttl_secs` is positive
    /// - `CapacityExceeded` if the write would exceed the configured maximum
    pub async fn store(&self, key: &[u8], data: Vec<u8>, ttl_secs: i64) -> Result<()> {
        Self::check_key(key)?;
        if ttl_secs <= 0 {
            return Err(StoreError::InvalidTtl(ttl_secs));
        }
        let size = charged_size(key.len(), data.len());

        let mut swept = false;
        loop {
            let now = self.clock.now();
            let mut shard = self.shard(key).write().await;
            let old = shard
                .get(key)
                .map(|record| record.charged_size(key.len()))
                .unwrap_or(0);

            if size > old {
                if let Err(available) = self.reserve(size - old) {
                    drop(shard);
                    if !swept {
                        swept = true;
                        self.sweep().await;
                        continue;
                    }
                    StorageStats::incr(&self.stats.capacity_rejections);
                    warn!(
                        key = %display_key(key),
                        requested = size - old,
                        available,
                        "Store rejected: capacity exceeded"
                    );
                    return Err(StoreError::CapacityExceeded {
                        requested: size - old,
                        available,
                    });
                }
            } else {
                self.release(old - size);
            }

            shard.insert(
                key.to_vec(),
                StorageRecord {
                    data,
                    stored_at: now,
                    expires_at: expiry(now, ttl_secs),
                },
            );
            StorageStats::incr(&self.stats.records_stored);
            debug!(key = %display_key(key), size, ttl_secs, "Record stored");
            return Ok(());
        }
    }

    /// Read the value under `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key was never stored, was deleted, or has expired.
    pub async fn retrieve(&self, key: &[u8]) -> Result<Vec<u8>> {
        let now = self.clock.now();
        let shard = self.shard(key);
        {
            let records = shard.read().await;
            match records.get(key) {
                Some(record) if !record.is_expired(now) => {
                    StorageStats::incr(&self.stats.records_retrieved);
                    return Ok(record.data.clone());
                }
                Some(_) => {}
                None => {
                    StorageStats::incr(&self.stats.retrieve_misses);
                    return Err(StoreError::NotFound(display_key(key)));
                }
            }
        }

        // Expired: reclaim now rather than waiting for the sweep.
        let mut records = shard.write().await;
        if let Some(record) = records.get(key) {
            if record.is_expired(now) {
                let freed = record.charged_size(key.len());
                records.remove(key);
                self.release(freed);
                StorageStats::incr(&self.stats.records_expired);
                debug!(key = %display_key(key), "Expired record reclaimed on access");
            }
        }
        StorageStats::incr(&self.stats.retrieve_misses);
        Err(StoreError::NotFound(display_key(key)))
    }

    /// Remove `key`. Removing an absent key succeeds.
    pub async fn delete(&self, key: &[u8]) -> Result<()> {
        let mut records = self.shard(key).write().await;
        if let Some(record) = records.remove(key) {
            self.release(record.charged_size(key.len()));
            StorageStats::incr(&self.stats.records_deleted);
            debug!(key = %display_key(key), "Record deleted");
        }
        Ok(())
    }

    /// Live records whose key starts with `prefix`, ordered by key.
    pub async fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let now = self.clock.now();
        let mut out = Vec::new();
        for shard in &self.shards {
            let records = shard.read().await;
            out.extend(
                records
                    .iter()
                    .filter(|(key, record)| key.starts_with(prefix) && !record.is_expired(now))
                    .map(|(key, record)| (key.clone(), record.data.clone())),
            );
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Reclaim every expired record. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0usize;
        let mut freed = 0u64;
        for shard in &self.shards {
            let mut records = shard.write().await;
            records.retain(|key, record| {
                if record.is_expired(now) {
                    removed += 1;
                    freed += record.charged_size(key.len());
                    false
                } else {
                    true
                }
            });
        }
        self.release(freed);
        StorageStats::add(&self.stats.records_expired, removed as u64);
        StorageStats::incr(&self.stats.sweeps);
        if removed > 0 {
            info!(removed, freed_bytes = freed, "Sweep reclaimed expired records");
        }
        removed
    }

    /// Start the periodic sweeper. Starting a running node is a no-op.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let weak = Arc::downgrade(self);
        let interval = Duration::from_secs(self.config.sweep_interval_secs);
        let started = self
            .lifecycle
            .start_with(move || async move {
                let handle = tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(interval);
                    // The first tick completes immediately.
                    ticker.tick().await;
                    loop {
                        ticker.tick().await;
                        let Some(node) = weak.upgrade() else { break };
                        node.sweep().await;
                    }
                });
                *self.sweeper.lock().await = Some(handle);
                Ok::<(), StoreError>(())
            })
            .await?;
        if started {
            info!("Storage node started");
        }
        Ok(())
    }

    /// Stop the periodic sweeper. Stored records are kept.
    pub async fn stop(&self) -> Result<()> {
        let stopped = self
            .lifecycle
            .stop_with(|| async {
                if let Some(handle) = self.sweeper.lock().await.take() {
                    handle.abort();
                }
                Ok::<(), StoreError>(())
            })
            .await?;
        if stopped {
            info!("Storage node stopped");
        }
        Ok(())
    }

    /// Operation counters.
    pub fn stats(&self) -> StorageStatsSnapshot {
        self.stats.snapshot()
    }

    /// Current space accounting.
    pub async fn usage(&self) -> StorageUsage {
        let mut records = 0;
        for shard in &self.shards {
            records += shard.read().await.len();
        }
        StorageUsage {
            used_bytes: self.used_bytes.load(Ordering::Acquire),
            max_bytes: self.config.max_size_bytes,
            records,
        }
    }

    /// Health for the host: healthy only while running.
    pub fn health(&self) -> StorageHealth {
        let state = self.lifecycle.state();
        if state != LifecycleState::Running {
            return StorageHealth {
                healthy: false,
                message: format!("storage {}", state),
            };
        }
        let used = self.used_bytes.load(Ordering::Acquire);
        StorageHealth {
            healthy: true,
            message: format!(
                "storage running, {}/{} bytes used",
                used, self.config.max_size_bytes
            ),
        }
    }
}

impl std::fmt::Debug for StorageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageNode")
            .field("config", &self.config)
            .field("state", &self.lifecycle.state())
            .field("used_bytes", &self.used_bytes.load(Ordering::Relaxed))
            .finish()
    }
}
