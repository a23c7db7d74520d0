//! Identity Manager: generation and every operation that needs a secret key.

use std::sync::Arc;

use pars_crypto::{CryptoProvider, KemCiphertext, SharedSecret, Signature};
use tracing::debug;

use crate::identity::{Identity, PublicIdentity, SecretKeys};
use crate::session_id::SessionId;
use crate::Result;

/// Creates identities and performs signing and decapsulation on their behalf.
#[derive(Clone)]
pub struct IdentityManager {
    provider: Arc<dyn CryptoProvider>,
    prefix: u8,
}

impl IdentityManager {
    /// Create a manager that derives SessionIds under `prefix`.
    pub fn new(provider: Arc<dyn CryptoProvider>, prefix: u8) -> Self {
        Self { provider, prefix }
    }

    /// Configured SessionId version prefix.
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// The provider backing this manager.
    pub fn provider(&self) -> &Arc<dyn CryptoProvider> {
        &self.provider
    }

    /// Generate a fresh identity.
    ///
    /// # Errors
    ///
    /// Returns `Crypto` if the provider cannot produce a keypair.
    pub fn generate_identity(&self) -> Result<Identity> {
        let kem = self.provider.generate_kem_keypair()?;
        let signing = self.provider.generate_sign_keypair()?;
        let session_id =
            SessionId::derive(self.prefix, kem.public.as_bytes(), signing.public.as_bytes());

        debug!(session_id = %session_id.short(), "Generated identity");

        Ok(Identity::new(
            PublicIdentity {
                session_id,
                kem_public: kem.public,
                signing_public: signing.public,
            },
            SecretKeys {
                kem: kem.secret,
                signing: signing.secret,
            },
        ))
    }

    /// Sign `message` with the identity's long-term signing key.
    pub fn sign(&self, identity: &Identity, message: &[u8]) -> Result<Signature> {
        Ok(self.provider.sign(&identity.secrets.signing, message)?)
    }

    /// Recover a KEM shared secret addressed to the identity.
    pub fn decapsulate(
        &self,
        identity: &Identity,
        ciphertext: &KemCiphertext,
    ) -> Result<SharedSecret> {
        Ok(self.provider.decapsulate(&identity.secrets.kem, ciphertext)?)
    }

    /// Check a counterparty's public identity against this manager's prefix
    /// and the provider's key sizes.
    pub fn verify_public(&self, public: &PublicIdentity) -> Result<()> {
        public.verify_binding(self.prefix, &self.provider.scheme())
    }
}

impl std::fmt::Debug for IdentityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityManager")
            .field("prefix", &format_args!("{:02x}", self.prefix))
            .field("scheme", &self.provider.scheme().kem)
            .finish()
    }
}
