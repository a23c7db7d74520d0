//! The crypto provider capability.
//!
//! The messaging core never names a concrete algorithm. It calls through
//! [`CryptoProvider`], and keys travel as scheme-agnostic byte containers
//! whose expected lengths come from [`SchemeParams`]. A lattice-based
//! provider (ML-KEM / ML-DSA) plugs in by implementing the trait.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hash::Hash256;
use crate::symmetric::SymmetricKey;
use crate::{CryptoError, Result};

/// Size of the shared secret every KEM must produce.
pub const SHARED_SECRET_SIZE: usize = 32;

/// Names and fixed sizes of the algorithms behind a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemeParams {
    /// KEM algorithm name.
    pub kem: &'static str,
    /// Signature algorithm name.
    pub signature: &'static str,
    /// KEM public key length in bytes.
    pub kem_public_key_len: usize,
    /// KEM ciphertext length in bytes.
    pub kem_ciphertext_len: usize,
    /// Signing public key length in bytes.
    pub signing_public_key_len: usize,
    /// Signature length in bytes.
    pub signature_len: usize,
}

impl SchemeParams {
    /// Check a KEM public key length.
    pub fn check_kem_public_key_len(&self, len: usize) -> Result<()> {
        check_len(self.kem_public_key_len, len)
    }

    /// Check a KEM ciphertext length.
    pub fn check_kem_ciphertext_len(&self, len: usize) -> Result<()> {
        check_len(self.kem_ciphertext_len, len)
    }

    /// Check a signing public key length.
    pub fn check_signing_public_key_len(&self, len: usize) -> Result<()> {
        check_len(self.signing_public_key_len, len)
    }
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(CryptoError::InvalidKeyLength { expected, actual });
    }
    Ok(())
}

macro_rules! public_bytes {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Vec<u8>);

        impl $name {
            /// Wrap raw bytes. Length is checked against the provider scheme at use.
            pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
                Self(bytes.into())
            }

            /// Borrow the raw bytes.
            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            /// Length in bytes.
            pub fn len(&self) -> usize {
                self.0.len()
            }

            /// Whether the container is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let head = &self.0[..self.0.len().min(4)];
                write!(f, "{}({}.., {} bytes)", stringify!($name), hex::encode(head), self.0.len())
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

macro_rules! secret_bytes {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Zeroize, ZeroizeOnDrop)]
        pub struct $name(Vec<u8>);

        impl $name {
            /// Wrap raw secret bytes.
            pub fn from_bytes(bytes: Vec<u8>) -> Self {
                Self(bytes)
            }

            /// Borrow the secret bytes. Never log or persist them.
            pub fn expose(&self) -> &[u8] {
                &self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}([REDACTED])", stringify!($name))
            }
        }
    };
}

public_bytes!(
    /// Public half of a KEM keypair.
    KemPublicKey
);
public_bytes!(
    /// KEM ciphertext produced by encapsulation.
    KemCiphertext
);
public_bytes!(
    /// Public half of a signing keypair.
    SigningPublicKey
);
public_bytes!(
    /// Detached signature.
    Signature
);

secret_bytes!(
    /// Secret half of a KEM keypair.
    KemSecretKey
);
secret_bytes!(
    /// Secret half of a signing keypair.
    SigningSecretKey
);

/// A KEM keypair.
#[derive(Debug)]
pub struct KemKeyPair {
    /// Public key, shareable.
    pub public: KemPublicKey,
    /// Secret key.
    pub secret: KemSecretKey,
}

/// A signing keypair.
#[derive(Debug)]
pub struct SignKeyPair {
    /// Public key, shareable.
    pub public: SigningPublicKey,
    /// Secret key.
    pub secret: SigningSecretKey,
}

/// Secret agreed through a KEM. Feed it to a KDF, never use it directly.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: [u8; SHARED_SECRET_SIZE],
}

impl SharedSecret {
    /// Wrap raw shared secret bytes.
    pub fn from_array(bytes: [u8; SHARED_SECRET_SIZE]) -> Self {
        Self { bytes }
    }

    /// Borrow the raw secret.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.bytes
    }

    /// Derive an AEAD key bound to `context` and `binding`.
    ///
    /// `binding` ties the key to the object it protects (a conversation id,
    /// a KEM ciphertext) so keys never repeat across objects.
    pub fn derive_key(&self, context: &str, binding: &[u8]) -> SymmetricKey {
        let mut material = Vec::with_capacity(SHARED_SECRET_SIZE + binding.len());
        material.extend_from_slice(&self.bytes);
        material.extend_from_slice(binding);
        let key = blake3::derive_key(context, &material);
        material.zeroize();
        SymmetricKey::from_array(key)
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

/// Cryptographic capability consumed by the messaging core.
///
/// Implementations must be safe to call from many tasks at once.
pub trait CryptoProvider: Send + Sync {
    /// Algorithm names and sizes.
    fn scheme(&self) -> SchemeParams;

    /// Generate a fresh KEM keypair.
    fn generate_kem_keypair(&self) -> Result<KemKeyPair>;

    /// Generate a fresh signing keypair.
    fn generate_sign_keypair(&self) -> Result<SignKeyPair>;

    /// Encapsulate a fresh shared secret to `peer`.
    fn encapsulate(&self, peer: &KemPublicKey) -> Result<(SharedSecret, KemCiphertext)>;

    /// Recover the shared secret from `ciphertext`.
    fn decapsulate(&self, secret: &KemSecretKey, ciphertext: &KemCiphertext)
        -> Result<SharedSecret>;

    /// AEAD-encrypt with a fresh nonce embedded in the output.
    fn aead_encrypt(&self, key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// AEAD-decrypt output of [`CryptoProvider::aead_encrypt`].
    fn aead_decrypt(&self, key: &SymmetricKey, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// Produce a detached signature.
    fn sign(&self, secret: &SigningSecretKey, message: &[u8]) -> Result<Signature>;

    /// Verify a detached signature. Malformed inputs verify as `false`.
    fn verify(&self, public: &SigningPublicKey, message: &[u8], signature: &[u8]) -> bool;

    /// Collision-resistant hash.
    fn hash(&self, data: &[u8]) -> Hash256 {
        Hash256::hash(data)
    }

    /// Fill `dest` with cryptographically secure random bytes.
    fn random_bytes(&self, dest: &mut [u8]) -> Result<()>;

    /// Basic format validation of a KEM public key.
    fn check_kem_public_key(&self, key: &KemPublicKey) -> Result<()> {
        self.scheme().check_kem_public_key_len(key.len())
    }
}
