//! Protocol limits and constants.
//!
//! All protocol limits are defined here for consistent enforcement.

// === Envelopes ===

/// Default maximum envelope TTL in seconds (30 days).
pub const DEFAULT_MAX_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Default maximum ciphertext length (1 MiB).
pub const DEFAULT_MAX_CIPHERTEXT_LEN: usize = 1024 * 1024;

/// Largest ciphertext length a configuration may allow. Envelopes above it
/// would not fit in an onion packet.
pub const MAX_CIPHERTEXT_LEN: usize = DEFAULT_MAX_CIPHERTEXT_LEN;

/// Maximum signature length. Large enough for ML-DSA-87 (4627 bytes).
pub const MAX_SIGNATURE_LEN: usize = 8 * 1024;

// === Onion routing ===

/// Default number of relay hops.
pub const DEFAULT_HOP_COUNT: usize = 3;

/// Default minimum number of relay hops.
pub const DEFAULT_MIN_HOPS: usize = 3;

/// Maximum number of relay hops.
pub const MAX_HOPS: usize = 8;

/// Maximum KEM ciphertext length inside a layer header.
/// Large enough for ML-KEM-1024 (1568 bytes).
pub const MAX_LAYER_KEM_CIPHERTEXT_LEN: usize = 4 * 1024;

/// Maximum size of a whole onion packet.
pub const MAX_PACKET_SIZE: usize = MAX_CIPHERTEXT_LEN + 64 * 1024;

// === Sessions ===

/// Default session lifetime before rekeying is required (90 days).
pub const DEFAULT_SESSION_TTL_SECS: u64 = 90 * 24 * 60 * 60;

/// Maximum participants in one session.
pub const MAX_PARTICIPANTS: usize = 64;

/// Maximum encoded size of a key exchange message.
pub const MAX_KEY_EXCHANGE_SIZE: usize = 512 * 1024;
