//! Configuration for the Pars messaging subsystem.
//!
//! Field names serialize in camelCase so a `pars` section of a node
//! configuration document deserializes directly.
//!
//! # Example
//!
//! ```
//! use pars_core::config::ParsConfig;
//!
//! // Use defaults
//! let config = ParsConfig::default();
//! assert!(config.validate().is_ok());
//!
//! // Or use the builder
//! let config = ParsConfig::builder()
//!     .with_max_storage(64 * 1024 * 1024)
//!     .with_hop_count(4)
//!     .with_retention_days(7)
//!     .build_validated()
//!     .unwrap();
//! assert_eq!(config.onion.hop_count, 4);
//! ```

use serde::{Deserialize, Serialize};

use pars_identity::session_id::DEFAULT_PREFIX;
use pars_protocol::limits::{
    DEFAULT_HOP_COUNT, DEFAULT_MAX_CIPHERTEXT_LEN, DEFAULT_MAX_TTL_SECS, DEFAULT_MIN_HOPS,
    MAX_CIPHERTEXT_LEN, MAX_HOPS,
};
use pars_protocol::session::SessionConfig;
use pars_protocol::EnvelopeLimits;
use pars_store::StorageConfig;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Default storage capacity (10 GiB).
const DEFAULT_MAX_STORAGE: u64 = 10 * 1024 * 1024 * 1024;

/// Default retention when a sender omits a TTL.
const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Default key rotation interval.
const DEFAULT_KEY_ROTATION_DAYS: u32 = 90;

/// Default number of consecutive crypto failures before health degrades.
const DEFAULT_CRYPTO_FAILURE_THRESHOLD: u32 = 5;

/// Main messaging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParsConfig {
    /// Subsystem gate. When false the VM reports "disabled" and does nothing.
    pub enabled: bool,

    /// Storage node settings.
    pub storage: StorageOptions,

    /// Onion routing settings.
    pub onion: OnionOptions,

    /// Session settings.
    pub session: SessionOptions,

    /// Envelope codec bounds.
    pub envelope: EnvelopeOptions,

    /// Consecutive crypto failures after which health reports degraded.
    pub crypto_failure_threshold: u32,
}

impl Default for ParsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: StorageOptions::default(),
            onion: OnionOptions::default(),
            session: SessionOptions::default(),
            envelope: EnvelopeOptions::default(),
            crypto_failure_threshold: DEFAULT_CRYPTO_FAILURE_THRESHOLD,
        }
    }
}

/// Storage node settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageOptions {
    /// Maximum bytes held by the storage node.
    pub max_size: u64,
    /// TTL applied when a sender does not supply one.
    pub retention_days: u32,
    /// Seconds between expiry sweeps.
    pub sweep_interval_secs: u64,
    /// Independently locked shards.
    pub shard_count: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        let store = StorageConfig::default();
        Self {
            max_size: DEFAULT_MAX_STORAGE,
            retention_days: DEFAULT_RETENTION_DAYS,
            sweep_interval_secs: store.sweep_interval_secs,
            shard_count: store.shard_count,
        }
    }
}

/// Onion routing settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OnionOptions {
    /// Route through relays. When false envelopes go straight to the mailbox.
    pub enabled: bool,
    /// Relays per path.
    pub hop_count: usize,
    /// Shortest path the router accepts.
    pub min_hops: usize,
}

impl Default for OnionOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            hop_count: DEFAULT_HOP_COUNT,
            min_hops: DEFAULT_MIN_HOPS,
        }
    }
}

/// Session settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOptions {
    /// SessionId version byte as two hex digits.
    pub id_prefix: String,
    /// Days before a session expires and must be rekeyed.
    pub key_rotation_days: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            id_prefix: format!("{:02x}", DEFAULT_PREFIX),
            key_rotation_days: DEFAULT_KEY_ROTATION_DAYS,
        }
    }
}

/// Envelope codec bounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnvelopeOptions {
    /// Largest TTL accepted on the wire.
    pub max_ttl_secs: i64,
    /// Largest ciphertext accepted on the wire.
    pub max_ciphertext_len: usize,
}

impl Default for EnvelopeOptions {
    fn default() -> Self {
        Self {
            max_ttl_secs: DEFAULT_MAX_TTL_SECS,
            max_ciphertext_len: DEFAULT_MAX_CIPHERTEXT_LEN,
        }
    }
}

impl ParsConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration builder.
    pub fn builder() -> ParsConfigBuilder {
        ParsConfigBuilder::new()
    }

    /// Parse a JSON document, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// The SessionId version byte.
    pub fn id_prefix(&self) -> Result<u8, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            field: "session.idPrefix".into(),
            reason: format!(
                "expected two hex digits, got {:?}",
                self.session.id_prefix
            ),
        };
        if self.session.id_prefix.len() != 2 {
            return Err(invalid());
        }
        let bytes = hex::decode(&self.session.id_prefix).map_err(|_| invalid())?;
        bytes.first().copied().ok_or_else(invalid)
    }

    /// TTL in seconds applied when a sender does not supply one.
    pub fn default_ttl_secs(&self) -> i64 {
        (u64::from(self.storage.retention_days) * SECS_PER_DAY) as i64
    }

    /// Session Manager configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            session_ttl_secs: u64::from(self.session.key_rotation_days) * SECS_PER_DAY,
            ..SessionConfig::default()
        }
    }

    /// Storage node configuration.
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            max_size_bytes: self.storage.max_size,
            shard_count: self.storage.shard_count,
            sweep_interval_secs: self.storage.sweep_interval_secs,
        }
    }

    /// Envelope codec bounds.
    pub fn envelope_limits(&self) -> EnvelopeLimits {
        EnvelopeLimits {
            max_ttl_secs: self.envelope.max_ttl_secs,
            max_ciphertext_len: self.envelope.max_ciphertext_len,
            ..EnvelopeLimits::default()
        }
    }

    /// Validate the configuration.
    ///
    /// Returns the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate storage
        if self.storage.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.maxSize".into(),
                reason: "storage capacity must be greater than zero".into(),
            });
        }
        if self.storage.retention_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.retentionDays".into(),
                reason: "retention must be at least one day".into(),
            });
        }
        if self.storage.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.sweepIntervalSecs".into(),
                reason: "sweep interval must be greater than zero".into(),
            });
        }
        if self.storage.shard_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage.shardCount".into(),
                reason: "shard count must be greater than zero".into(),
            });
        }

        // Validate envelope bounds
        if self.envelope.max_ttl_secs <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "envelope.maxTtlSecs".into(),
                reason: "maximum TTL must be positive".into(),
            });
        }
        if self.envelope.max_ciphertext_len == 0 {
            return Err(ConfigError::InvalidValue {
                field: "envelope.maxCiphertextLen".into(),
                reason: "maximum ciphertext length must be greater than zero".into(),
            });
        }
        if self.envelope.max_ciphertext_len > MAX_CIPHERTEXT_LEN {
            return Err(ConfigError::InvalidValue {
                field: "envelope.maxCiphertextLen".into(),
                reason: format!(
                    "maximum ciphertext length {} exceeds the onion packet limit of {}",
                    self.envelope.max_ciphertext_len, MAX_CIPHERTEXT_LEN
                ),
            });
        }
        if self.default_ttl_secs() > self.envelope.max_ttl_secs {
            return Err(ConfigError::InvalidValue {
                field: "storage.retentionDays".into(),
                reason: format!(
                    "retention of {} days exceeds the envelope TTL limit of {} seconds",
                    self.storage.retention_days, self.envelope.max_ttl_secs
                ),
            });
        }

        // Validate onion routing
        if self.onion.enabled {
            if self.onion.hop_count == 0 || self.onion.hop_count > MAX_HOPS {
                return Err(ConfigError::InvalidValue {
                    field: "onion.hopCount".into(),
                    reason: format!("hop count must be between 1 and {}", MAX_HOPS),
                });
            }
            if self.onion.min_hops == 0 || self.onion.min_hops > self.onion.hop_count {
                return Err(ConfigError::InvalidValue {
                    field: "onion.minHops".into(),
                    reason: "minimum hops must be between 1 and the hop count".into(),
                });
            }
        }

        // Validate sessions
        self.id_prefix()?;
        if self.session.key_rotation_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.keyRotationDays".into(),
                reason: "key rotation interval must be at least one day".into(),
            });
        }

        if self.crypto_failure_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cryptoFailureThreshold".into(),
                reason: "threshold must be greater than zero".into(),
            });
        }

        Ok(())
    }
}

/// Builder for constructing [`ParsConfig`] with custom values.
#[derive(Clone, Debug, Default)]
pub struct ParsConfigBuilder {
    config: ParsConfig,
}

impl ParsConfigBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: ParsConfig::default(),
        }
    }

    /// Build the final configuration.
    pub fn build(self) -> ParsConfig {
        self.config
    }

    /// Build and validate the configuration.
    pub fn build_validated(self) -> Result<ParsConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }

    /// Turn the subsystem off.
    pub fn disabled(mut self) -> Self {
        self.config.enabled = false;
        self
    }

    // ===== Storage =====

    /// Set the storage capacity in bytes.
    pub fn with_max_storage(mut self, bytes: u64) -> Self {
        self.config.storage.max_size = bytes;
        self
    }

    /// Set the default retention.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.config.storage.retention_days = days;
        self
    }

    /// Set the sweep interval.
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.config.storage.sweep_interval_secs = secs;
        self
    }

    // ===== Onion routing =====

    /// Deliver straight to mailboxes without relays.
    pub fn disable_onion(mut self) -> Self {
        self.config.onion.enabled = false;
        self
    }

    /// Set the number of relays per path.
    pub fn with_hop_count(mut self, hops: usize) -> Self {
        self.config.onion.hop_count = hops;
        self
    }

    /// Set the shortest accepted path.
    pub fn with_min_hops(mut self, hops: usize) -> Self {
        self.config.onion.min_hops = hops;
        self
    }

    // ===== Sessions =====

    /// Set the SessionId version byte as two hex digits.
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.session.id_prefix = prefix.into();
        self
    }

    /// Set the key rotation interval.
    pub fn with_key_rotation_days(mut self, days: u32) -> Self {
        self.config.session.key_rotation_days = days;
        self
    }

    // ===== Envelopes =====

    /// Set the largest TTL accepted on the wire.
    pub fn with_max_ttl_secs(mut self, secs: i64) -> Self {
        self.config.envelope.max_ttl_secs = secs;
        self
    }

    /// Set the largest ciphertext accepted on the wire.
    pub fn with_max_ciphertext_len(mut self, len: usize) -> Self {
        self.config.envelope.max_ciphertext_len = len;
        self
    }

    /// Set the crypto failure threshold for degraded health.
    pub fn with_crypto_failure_threshold(mut self, failures: u32) -> Self {
        self.config.crypto_failure_threshold = failures;
        self
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue {
        /// The field name.
        field: String,
        /// The reason it's invalid.
        reason: String,
    },

    /// Document could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_field(config: &ParsConfig) -> String {
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => field,
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let config = ParsConfig::default();
        assert!(config.enabled);
        assert_eq!(config.storage.max_size, 10 * 1024 * 1024 * 1024);
        assert_eq!(config.storage.retention_days, 30);
        assert!(config.onion.enabled);
        assert_eq!(config.onion.hop_count, 3);
        assert_eq!(config.session.id_prefix, "07");
        assert_eq!(config.session.key_rotation_days, 90);
        assert_eq!(config.id_prefix().unwrap(), 0x07);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_derived_component_configs() {
        let config = ParsConfig::default();
        assert_eq!(config.default_ttl_secs(), 30 * 86_400);
        assert_eq!(config.session_config().session_ttl_secs, 90 * 86_400);
        assert_eq!(config.storage_config().max_size_bytes, config.storage.max_size);
        assert_eq!(config.envelope_limits().max_ttl_secs, 30 * 86_400);
    }

    #[test]
    fn test_camel_case_json() {
        let config = ParsConfig::from_json(
            r#"{
                "enabled": true,
                "storage": { "maxSize": 1048576, "retentionDays": 7 },
                "onion": { "enabled": false, "hopCount": 5 },
                "session": { "idPrefix": "0a", "keyRotationDays": 30 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.storage.max_size, 1_048_576);
        assert_eq!(config.storage.retention_days, 7);
        assert_eq!(config.storage.shard_count, StorageOptions::default().shard_count);
        assert!(!config.onion.enabled);
        assert_eq!(config.onion.hop_count, 5);
        assert_eq!(config.id_prefix().unwrap(), 0x0a);

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"retentionDays\":7"));
        assert!(json.contains("\"idPrefix\":\"0a\""));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ParsConfig::from_json("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_prefix() {
        for prefix in ["7", "007", "zz", ""] {
            let config = ParsConfig::builder().with_id_prefix(prefix).build();
            assert_eq!(invalid_field(&config), "session.idPrefix");
        }
    }

    #[test]
    fn test_invalid_values() {
        let config = ParsConfig::builder().with_max_storage(0).build();
        assert_eq!(invalid_field(&config), "storage.maxSize");

        let config = ParsConfig::builder().with_retention_days(0).build();
        assert_eq!(invalid_field(&config), "storage.retentionDays");

        let config = ParsConfig::builder().with_retention_days(31).build();
        assert_eq!(invalid_field(&config), "storage.retentionDays");

        let config = ParsConfig::builder().with_hop_count(0).build();
        assert_eq!(invalid_field(&config), "onion.hopCount");

        let config = ParsConfig::builder().with_hop_count(MAX_HOPS + 1).build();
        assert_eq!(invalid_field(&config), "onion.hopCount");

        let config = ParsConfig::builder().with_hop_count(2).build();
        assert_eq!(invalid_field(&config), "onion.minHops");

        let config = ParsConfig::builder().with_key_rotation_days(0).build();
        assert_eq!(invalid_field(&config), "session.keyRotationDays");

        let config = ParsConfig::builder().with_max_ttl_secs(-1).build();
        assert_eq!(invalid_field(&config), "envelope.maxTtlSecs");

        let config = ParsConfig::builder().with_crypto_failure_threshold(0).build();
        assert_eq!(invalid_field(&config), "cryptoFailureThreshold");
    }

    #[test]
    fn test_ciphertext_len_bounded_by_packet_size() {
        let config = ParsConfig::builder()
            .with_max_ciphertext_len(MAX_CIPHERTEXT_LEN)
            .build();
        assert!(config.validate().is_ok());

        let config = ParsConfig::builder()
            .with_max_ciphertext_len(4 * 1024 * 1024)
            .build();
        assert_eq!(invalid_field(&config), "envelope.maxCiphertextLen");
        assert!(ParsConfig::builder()
            .with_max_ciphertext_len(MAX_CIPHERTEXT_LEN + 1)
            .build_validated()
            .is_err());
    }

    #[test]
    fn test_onion_bounds_ignored_when_disabled() {
        let config = ParsConfig::builder()
            .disable_onion()
            .with_hop_count(0)
            .build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_validated() {
        assert!(ParsConfig::builder().with_min_hops(1).with_hop_count(1).build_validated().is_ok());
        assert!(ParsConfig::builder().with_max_storage(0).build_validated().is_err());
    }
}
