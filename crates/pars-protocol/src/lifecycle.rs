//! Component lifecycle state machine.
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//! ```
//!
//! Transitions are serialized by a per-component mutex. The current state is
//! mirrored in an atomic so health checks never wait behind a transition.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::Mutex;

/// Lifecycle state of a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Not running. Initial and terminal state.
    Stopped = 0,
    /// Start in progress.
    Starting = 1,
    /// Accepting work.
    Running = 2,
    /// Stop in progress.
    Stopping = 3,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LifecycleState::Starting,
            2 => LifecycleState::Running,
            3 => LifecycleState::Stopping,
            _ => LifecycleState::Stopped,
        }
    }

    /// Human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "not running",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Lifecycle tracker owned by one component.
#[derive(Debug)]
pub struct Lifecycle {
    transition: Mutex<()>,
    state: AtomicU8,
}

/// Restores a state if a transition future is dropped midway.
struct Revert<'a> {
    lifecycle: &'a Lifecycle,
    to: LifecycleState,
    armed: bool,
}

impl Drop for Revert<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.lifecycle.set(self.to);
        }
    }
}

impl Lifecycle {
    /// A stopped lifecycle.
    pub fn new() -> Self {
        Self {
            transition: Mutex::new(()),
            state: AtomicU8::new(LifecycleState::Stopped as u8),
        }
    }

    /// Current state without waiting for an in-flight transition.
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the component accepts work.
    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    fn set(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Run `start` and move to `Running` if it succeeds.
    ///
    /// Returns `Ok(false)` without calling `start` when already running. On
    /// error or cancellation the state returns to `Stopped`.
    pub async fn start_with<F, Fut, E>(&self, start: F) -> Result<bool, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let _guard = self.transition.lock().await;
        if self.state() == LifecycleState::Running {
            return Ok(false);
        }

        self.set(LifecycleState::Starting);
        let mut revert = Revert {
            lifecycle: self,
            to: LifecycleState::Stopped,
            armed: true,
        };
        start().await?;
        revert.armed = false;
        self.set(LifecycleState::Running);
        Ok(true)
    }

    /// Run `stop` and move to `Stopped` if it succeeds.
    ///
    /// Returns `Ok(false)` without calling `stop` when already stopped. On
    /// error or cancellation the state returns to `Running`.
    pub async fn stop_with<F, Fut, E>(&self, stop: F) -> Result<bool, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let _guard = self.transition.lock().await;
        if self.state() == LifecycleState::Stopped {
            return Ok(false);
        }

        self.set(LifecycleState::Stopping);
        let mut revert = Revert {
            lifecycle: self,
            to: LifecycleState::Running,
            armed: true,
        };
        stop().await?;
        revert.armed = false;
        self.set(LifecycleState::Stopped);
        Ok(true)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
