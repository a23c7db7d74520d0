//! # pars-protocol
//!
//! Message formats and session state for Pars messaging.
//!
//! This crate provides:
//! - **MessageEnvelope**: signed carrier for one encrypted payload, with a
//!   strict wire codec
//! - **SessionManager**: session lifecycle, keying, and rekeying
//! - **OnionRouter**: layered encryption over a relay path
//! - **Lifecycle**: start/stop state machine shared by long-running components
//!
//! ## Security
//!
//! Decoding is strict and bounded; every decode error is reported before
//! any cryptographic work. Session keys stay inside the Session Manager and
//! are zeroized when a session closes. A relay that cannot open a layer
//! forwards nothing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod domain_separation;
pub mod envelope;
pub mod error;
pub mod lifecycle;
pub mod limits;
pub mod onion;
pub mod session;
pub mod time;
mod wire;

#[cfg(test)]
mod proptests;

pub use envelope::{EnvelopeCodec, EnvelopeId, EnvelopeLimits, MessageEnvelope};
pub use error::{ProtocolError, Result};
pub use lifecycle::{Lifecycle, LifecycleState};
pub use onion::{HopSelector, OnionPacket, OnionRouter, RandomHopSelector, RelayHop, Unwrapped};
pub use session::{ConversationId, KeyExchange, Session, SessionManager, SessionStatus};
pub use time::{Clock, ManualClock, SystemClock};
