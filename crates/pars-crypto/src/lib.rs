//! # pars-crypto
//!
//! Cryptographic capability for the Pars messaging core.
//!
//! The core talks to cryptography only through [`CryptoProvider`]:
//! - **KEM** for session keys and onion layer keys
//! - **Signatures** for envelope authentication
//! - **AEAD** (XChaCha20-Poly1305) for payloads and layers
//! - **BLAKE3** for identifiers
//!
//! [`Curve25519Provider`] is the bundled reference implementation. Post-quantum
//! providers (ML-KEM / ML-DSA) implement the same trait.
//!
//! ## Security
//!
//! Secret material is zeroized on drop and redacted from `Debug` output.
//! Digest comparisons are constant-time via `subtle`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod curve25519;
pub mod error;
pub mod hash;
pub mod provider;
pub mod symmetric;

#[cfg(test)]
mod proptests;

pub use curve25519::Curve25519Provider;
pub use error::{CryptoError, Result};
pub use hash::Hash256;
pub use provider::{
    CryptoProvider, KemCiphertext, KemKeyPair, KemPublicKey, KemSecretKey, SchemeParams,
    SharedSecret, SignKeyPair, Signature, SigningPublicKey, SigningSecretKey,
};
pub use symmetric::{SymmetricKey, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
