//! Long-term identities.
//!
//! An [`Identity`] owns a KEM keypair and a signing keypair. Its secret
//! halves live in a private container that only [`crate::IdentityManager`]
//! can reach; callers get signatures and decapsulated secrets, never keys.

use pars_crypto::{
    KemPublicKey, KemSecretKey, SchemeParams, SigningPublicKey, SigningSecretKey,
};
use serde::{Deserialize, Serialize};

use crate::session_id::SessionId;
use crate::{IdentityError, Result};

/// The shareable half of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentity {
    /// Address derived from the two public keys.
    pub session_id: SessionId,
    /// Long-term KEM public key.
    pub kem_public: KemPublicKey,
    /// Long-term signing public key.
    pub signing_public: SigningPublicKey,
}

impl PublicIdentity {
    /// Check that the keys hash to the claimed SessionId and have the
    /// lengths the scheme expects.
    ///
    /// # Errors
    ///
    /// - `PrefixMismatch` if the id was derived under another version prefix
    /// - `Crypto(InvalidKeyLength)` if a key has the wrong size
    /// - `KeyBindingMismatch` if the keys do not derive the id
    pub fn verify_binding(&self, prefix: u8, scheme: &SchemeParams) -> Result<()> {
        self.session_id.ensure_prefix(prefix)?;
        scheme.check_kem_public_key_len(self.kem_public.len())?;
        scheme.check_signing_public_key_len(self.signing_public.len())?;
        if !self
            .session_id
            .matches_keys(self.kem_public.as_bytes(), self.signing_public.as_bytes())
        {
            return Err(IdentityError::KeyBindingMismatch(self.session_id.short()));
        }
        Ok(())
    }
}

/// Secret halves of an identity. Both keys zeroize on drop.
pub(crate) struct SecretKeys {
    pub(crate) kem: KemSecretKey,
    pub(crate) signing: SigningSecretKey,
}

/// A local identity with its secret keys.
///
/// Not `Clone`: there is exactly one owner of the secret material.
pub struct Identity {
    public: PublicIdentity,
    pub(crate) secrets: SecretKeys,
}

impl Identity {
    pub(crate) fn new(public: PublicIdentity, secrets: SecretKeys) -> Self {
        Self { public, secrets }
    }

    /// This identity's address.
    pub fn session_id(&self) -> SessionId {
        self.public.session_id
    }

    /// The shareable half.
    pub fn public_identity(&self) -> &PublicIdentity {
        &self.public
    }

    /// Long-term KEM public key.
    pub fn kem_public(&self) -> &KemPublicKey {
        &self.public.kem_public
    }

    /// Long-term signing public key.
    pub fn signing_public(&self) -> &SigningPublicKey {
        &self.public.signing_public
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("session_id", &self.public.session_id)
            .field("secrets", &"[REDACTED]")
            .finish()
    }
}
