//! Message envelopes.
//!
//! A [`MessageEnvelope`] carries one encrypted payload from a sender to a
//! recipient with a detached signature over the canonical fields.
//! [`EnvelopeCodec`] turns envelopes into bytes and back and checks
//! signatures.

mod codec;
mod message;

pub use codec::{EnvelopeCodec, EnvelopeLimits};
pub use message::{signing_payload, EnvelopeId, MessageEnvelope};
