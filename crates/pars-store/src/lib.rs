//! # pars-store
//!
//! TTL-bounded storage for ciphertext blobs.
//!
//! Provides:
//! - [`StorageNode`]: sharded in-memory key-value store with per-record
//!   expiry, atomic capacity accounting, and a background sweeper
//! - Key layout for recipient mailboxes and relay spools
//!
//! A record past its expiry reads exactly like a key that was never
//! stored, whether or not it has been physically reclaimed yet.
//!
//! ```no_run
//! use pars_store::{StorageConfig, StorageNode};
//!
//! # async fn demo() -> pars_store::Result<()> {
//! let node = StorageNode::new(StorageConfig::default())?;
//! node.store(b"k1", b"ciphertext".to_vec(), 86_400).await?;
//! let data = node.retrieve(b"k1").await?;
//! node.delete(b"k1").await?;
//! # let _ = data;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod keys;
pub mod node;
pub mod record;
pub mod stats;

pub use error::{Result, StoreError};
pub use keys::{mailbox_key, mailbox_prefix, spool_key};
pub use node::{StorageConfig, StorageHealth, StorageNode};
pub use record::StorageRecord;
pub use stats::{StorageStats, StorageStatsSnapshot, StorageUsage};
