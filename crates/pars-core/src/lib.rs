//! # pars-core
//!
//! Messaging orchestration for Pars nodes.
//!
//! This crate ties the lower layers together:
//!
//! - [`Messenger`]: sessions, envelopes, onion routing, and mailboxes for one
//!   local identity
//! - [`Relay`] / [`RelayTransport`]: relay nodes and the transport between
//!   them, with [`LocalRelayNetwork`] for in-process use
//! - [`ParsVm`] / [`EvmVm`]: the [`Vm`] host contract with explicit
//!   lifecycles and health reporting
//! - [`ParsConfig`]: configuration with camelCase serde names
//! - [`logging::init_logging`]: tracing subscriber setup
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pars_core::{LocalRelayNetwork, Messenger, ParsConfig, ParsVm, SendOptions, Vm};
//! use pars_crypto::{CryptoProvider, Curve25519Provider};
//! use pars_identity::IdentityManager;
//! use pars_protocol::SystemClock;
//! use pars_store::StorageNode;
//!
//! # async fn run() -> pars_core::Result<()> {
//! let config = ParsConfig::builder().disable_onion().build_validated()?;
//! let provider: Arc<dyn CryptoProvider> = Arc::new(Curve25519Provider::new());
//! let identities = IdentityManager::new(provider, config.id_prefix()?);
//! let storage = Arc::new(StorageNode::new(config.storage_config())?);
//!
//! let local = Arc::new(identities.generate_identity()?);
//! let peer = identities.generate_identity()?.public_identity().clone();
//! let messenger = Messenger::new(
//!     config,
//!     identities,
//!     local,
//!     storage,
//!     Arc::new(LocalRelayNetwork::new()),
//!     Arc::new(SystemClock),
//! )?;
//!
//! let vm = ParsVm::new(Arc::new(messenger));
//! vm.start(None).await?;
//! let session = vm.create_session(&[peer]).await?;
//! vm.send_message(&session.id, b"hello", SendOptions::new()).await?;
//! vm.stop().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod messenger;
pub mod payload;
pub mod relay;
pub mod vm;

pub use config::{
    ConfigError, EnvelopeOptions, OnionOptions, ParsConfig, ParsConfigBuilder, SessionOptions,
    StorageOptions,
};
pub use error::{CoreError, ErrorKind, Result};
pub use logging::{init_logging, LogFormat};
pub use messenger::{
    Messenger, MessengerStatsSnapshot, ReceiveOutcome, ReceivedMessage, RejectedEnvelope,
    SendOptions,
};
pub use relay::{LocalRelayNetwork, Relay, RelayOutcome, RelayStatsSnapshot, RelayTransport};
pub use vm::{EvmVm, HealthStatus, ParsVm, Vm};

// Re-export commonly used types
pub use pars_identity::{PublicIdentity, SessionId};
pub use pars_protocol::{ConversationId, EnvelopeId};
