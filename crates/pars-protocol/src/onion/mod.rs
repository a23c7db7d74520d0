//! Multi-hop onion routing.
//!
//! The sender seals an envelope once per relay, innermost layer first. Each
//! relay removes exactly one layer and learns only the next hop, or finds
//! the envelope if it is the last.

mod packet;
mod router;
mod selector;

pub use packet::{OnionPacket, LAYER_VERSION};
pub use router::{OnionRouter, RelayHop, Unwrapped};
pub use selector::{validate_selection, HopSelector, RandomHopSelector};
