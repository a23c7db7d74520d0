//! # pars-identity
//!
//! Long-term identities for the Pars messaging core.
//!
//! Provides:
//! - [`SessionId`] derivation from KEM and signing public keys
//! - [`Identity`] / [`PublicIdentity`] containers
//! - [`IdentityManager`], the only path to secret-key operations

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod identity;
pub mod manager;
pub mod session_id;

pub use error::{IdentityError, Result};
pub use identity::{Identity, PublicIdentity};
pub use manager::IdentityManager;
pub use session_id::{SessionId, DEFAULT_PREFIX};
