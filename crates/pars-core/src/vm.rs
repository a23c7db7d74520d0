//! Host contract for the virtual machines a node runs.
//!
//! Each VM moves through an explicit lifecycle:
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//! ```
//!
//! Transitions are serialized per VM; health reads never wait on them.
//! A start that misses its deadline is cancelled and leaves the VM stopped.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use pars_protocol::{ConversationId, EnvelopeId, Lifecycle, LifecycleState, Session};
use pars_identity::PublicIdentity;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::info;

use crate::config::ParsConfig;
use crate::error::{CoreError, Result};
use crate::messenger::{Messenger, ReceiveOutcome, SendOptions};

/// Health reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the VM is fit for work.
    pub healthy: bool,
    /// Human-readable detail.
    pub message: String,
}

impl HealthStatus {
    /// Healthy with a message.
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
        }
    }

    /// Unhealthy with a message.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            message: message.into(),
        }
    }

    /// Reported by a VM that is turned off in configuration.
    pub fn disabled() -> Self {
        Self::healthy("disabled")
    }

    /// Reported by an enabled VM that has not started.
    pub fn not_running() -> Self {
        Self::unhealthy("not running")
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.healthy { "healthy" } else { "unhealthy" };
        if self.message.is_empty() {
            f.write_str(status)
        } else {
            write!(f, "{}: {}", status, self.message)
        }
    }
}

/// A virtual machine hosted by the node.
#[async_trait]
pub trait Vm: Send + Sync {
    /// Stable name.
    fn name(&self) -> &str;

    /// Start the VM, giving up at `deadline`. Starting a running or
    /// disabled VM is a no-op.
    ///
    /// # Errors
    ///
    /// `DeadlineExceeded` if the deadline passes first; the VM is then
    /// stopped.
    async fn start(&self, deadline: Option<Instant>) -> Result<()>;

    /// Stop the VM. Stopping a stopped VM is a no-op.
    async fn stop(&self) -> Result<()>;

    /// Current health.
    async fn health(&self) -> HealthStatus;
}

/// The messaging VM.
pub struct ParsVm {
    enabled: bool,
    lifecycle: Lifecycle,
    messenger: Arc<Messenger>,
}

impl ParsVm {
    /// Name reported to the host.
    pub const NAME: &'static str = "pars";

    /// Wrap a messenger. Whether the VM runs is taken from the messenger's
    /// configuration.
    pub fn new(messenger: Arc<Messenger>) -> Self {
        Self {
            enabled: messenger.config().enabled,
            lifecycle: Lifecycle::new(),
            messenger,
        }
    }

    /// Lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Active configuration.
    pub fn config(&self) -> &ParsConfig {
        self.messenger.config()
    }

    /// The wrapped messenger.
    pub fn messenger(&self) -> &Arc<Messenger> {
        &self.messenger
    }

    fn ensure_running(&self) -> Result<&Messenger> {
        if !self.enabled {
            return Err(CoreError::Disabled);
        }
        if !self.lifecycle.is_running() {
            return Err(CoreError::NotRunning("ParsVm"));
        }
        Ok(&self.messenger)
    }

    /// Open a conversation with `peers`.
    pub async fn create_session(&self, peers: &[PublicIdentity]) -> Result<Session> {
        self.ensure_running()?.create_session(peers).await
    }

    /// Send a message in a conversation.
    ///
    /// # Errors
    ///
    /// `NotRunning` before [`Vm::start`], `Disabled` when turned off, and
    /// anything [`Messenger::send`] returns.
    pub async fn send_message(
        &self,
        conversation: &ConversationId,
        plaintext: &[u8],
        options: SendOptions,
    ) -> Result<Vec<EnvelopeId>> {
        self.ensure_running()?
            .send(conversation, plaintext, options)
            .await
    }

    /// Drain the local mailbox.
    pub async fn receive_messages(&self) -> Result<ReceiveOutcome> {
        self.ensure_running()?.receive().await
    }
}

#[async_trait]
impl Vm for ParsVm {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self, deadline: Option<Instant>) -> Result<()> {
        if !self.enabled {
            info!(vm = Self::NAME, "VM disabled, not starting");
            return Ok(());
        }
        let storage = self.messenger.storage().clone();
        let started = within(
            deadline,
            self.lifecycle.start_with(|| async move {
                storage.start().await?;
                Ok::<(), CoreError>(())
            }),
        )
        .await?;
        if started {
            info!(
                vm = Self::NAME,
                session_id = %self.messenger.session_id().short(),
                "VM started"
            );
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let storage = self.messenger.storage().clone();
        let stopped = self
            .lifecycle
            .stop_with(|| async move {
                storage.stop().await?;
                Ok::<(), CoreError>(())
            })
            .await?;
        if stopped {
            info!(vm = Self::NAME, "VM stopped");
        }
        Ok(())
    }

    async fn health(&self) -> HealthStatus {
        if !self.enabled {
            return HealthStatus::disabled();
        }
        if !self.lifecycle.is_running() {
            return HealthStatus::not_running();
        }

        let storage = self.messenger.storage().health();
        if !storage.healthy {
            return HealthStatus::unhealthy(storage.message);
        }
        if self.messenger.is_degraded() {
            return HealthStatus::unhealthy(format!(
                "degraded: {} consecutive crypto failures",
                self.messenger.consecutive_crypto_failures()
            ));
        }

        let sessions = self.messenger.sessions().stats().await;
        HealthStatus::healthy(format!(
            "running: {} active, {} pending sessions; {}; crypto {}",
            sessions.active,
            sessions.pending,
            storage.message,
            self.messenger.provider().scheme().kem
        ))
    }
}

impl fmt::Debug for ParsVm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParsVm")
            .field("enabled", &self.enabled)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Lifecycle shell for the contract VM. Execution is not provided here.
#[derive(Debug)]
pub struct EvmVm {
    enabled: bool,
    lifecycle: Lifecycle,
}

impl EvmVm {
    /// Name reported to the host.
    pub const NAME: &'static str = "evm";

    /// Create the shell.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Contract call entry point.
    ///
    /// # Errors
    ///
    /// `NotRunning` before start. A running shell has no contracts and
    /// returns empty output.
    pub async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>> {
        if !self.lifecycle.is_running() {
            return Err(CoreError::NotRunning("EVM"));
        }
        tracing::debug!(to, input_len = data.len(), "EVM call");
        Ok(Vec::new())
    }
}

#[async_trait]
impl Vm for EvmVm {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn start(&self, deadline: Option<Instant>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if within(
            deadline,
            self.lifecycle
                .start_with(|| async { Ok::<(), CoreError>(()) }),
        )
        .await?
        {
            info!(vm = Self::NAME, "VM started");
        }
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self
            .lifecycle
            .stop_with(|| async { Ok::<(), CoreError>(()) })
            .await?
        {
            info!(vm = Self::NAME, "VM stopped");
        }
        Ok(())
    }

    async fn health(&self) -> HealthStatus {
        if !self.enabled {
            return HealthStatus::disabled();
        }
        if !self.lifecycle.is_running() {
            return HealthStatus::not_running();
        }
        HealthStatus::healthy("")
    }
}

/// Run a lifecycle transition, cancelling it at `deadline`.
async fn within<T>(
    deadline: Option<Instant>,
    transition: impl Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        None => transition.await,
        Some(at) if Instant::now() >= at => Err(CoreError::DeadlineExceeded),
        Some(at) => tokio::time::timeout_at(at, transition)
            .await
            .map_err(|_| CoreError::DeadlineExceeded)?,
    }
}
