//! Reference [`CryptoProvider`] built from classical curve primitives.
//!
//! - KEM: X25519 DH-KEM. The ciphertext is an ephemeral public key and the
//!   shared secret is a BLAKE3 derivation over the DH output and both keys.
//! - Signatures: Ed25519 (strict verification).
//! - AEAD: XChaCha20-Poly1305.
//! - Hash: BLAKE3.
//!
//! This provider carries the same contract a lattice provider must meet and
//! is what the test-suite runs against.

use std::sync::Mutex;

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::provider::{
    CryptoProvider, KemCiphertext, KemKeyPair, KemPublicKey, KemSecretKey, SchemeParams,
    SharedSecret, SignKeyPair, Signature, SigningPublicKey, SigningSecretKey,
};
use crate::symmetric::{self, SymmetricKey, NONCE_SIZE};
use crate::{CryptoError, Result};

/// X25519 key and ciphertext size.
pub const X25519_KEY_SIZE: usize = 32;

/// Ed25519 public key size.
pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;

/// Ed25519 signature size.
pub const ED25519_SIGNATURE_SIZE: usize = 64;

const KEM_DERIVE_CONTEXT: &str = "pars x25519-kem shared secret v1";

/// Curve25519 points of small order, plus the non-canonical encoding of one.
///
/// DH against any of these yields a predictable secret.
const LOW_ORDER_POINTS: [[u8; 32]; 7] = [
    [0u8; 32],
    [
        1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0,
    ],
    [
        0xe0, 0xeb, 0x7a, 0x7c, 0x3b, 0x41, 0xb8, 0xae, 0x16, 0x56, 0xe3, 0xfa, 0xf1, 0x9f, 0xc4,
        0x6a, 0xda, 0x09, 0x8d, 0xeb, 0x9c, 0x32, 0xb1, 0xfd, 0x86, 0x62, 0x05, 0x16, 0x5f, 0x49,
        0xb8, 0x00,
    ],
    [
        0x5f, 0x9c, 0x95, 0xbc, 0xa3, 0x50, 0x8c, 0x24, 0xb1, 0xd0, 0xb1, 0x55, 0x9c, 0x83, 0xef,
        0x5b, 0x04, 0x44, 0x5c, 0xc4, 0x58, 0x1c, 0x8e, 0x86, 0xd8, 0x22, 0x4e, 0xdd, 0xd0, 0x9f,
        0x11, 0x57,
    ],
    [
        0xec, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
    [
        0xed, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
    [
        0xee, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
        0xff, 0x7f,
    ],
];

fn is_low_order(point: &[u8; 32]) -> bool {
    let mut hit = subtle::Choice::from(0u8);
    for candidate in &LOW_ORDER_POINTS {
        hit |= point.ct_eq(candidate);
    }
    hit.into()
}

fn to_array(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: 32,
        actual: bytes.len(),
    })
}

/// Where the provider draws randomness from.
enum RngSource {
    Os,
    Seeded(Mutex<ChaCha20Rng>),
}

impl RngSource {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        match self {
            RngSource::Os => OsRng
                .try_fill_bytes(dest)
                .map_err(|e| CryptoError::Rng(e.to_string())),
            RngSource::Seeded(rng) => {
                let mut rng = rng
                    .lock()
                    .map_err(|_| CryptoError::Rng("seeded generator lock poisoned".into()))?;
                rng.try_fill_bytes(dest)
                    .map_err(|e| CryptoError::Rng(e.to_string()))
            }
        }
    }

    fn array32(&self) -> Result<[u8; 32]> {
        let mut out = [0u8; 32];
        self.fill(&mut out)?;
        Ok(out)
    }
}

/// X25519 / Ed25519 / XChaCha20-Poly1305 / BLAKE3 provider.
pub struct Curve25519Provider {
    rng: RngSource,
}

impl Curve25519Provider {
    /// Provider drawing from the operating system's entropy source.
    pub fn new() -> Self {
        Self { rng: RngSource::Os }
    }

    /// Provider with a deterministic ChaCha20 generator.
    ///
    /// Two providers built from the same seed generate the same keys in the
    /// same order. Only for tests and reproducible fixtures.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            rng: RngSource::Seeded(Mutex::new(ChaCha20Rng::from_seed(seed))),
        }
    }

    fn kem_shared_secret(dh: &[u8; 32], ciphertext: &[u8; 32], recipient: &[u8; 32]) -> SharedSecret {
        let mut material = [0u8; 96];
        material[..32].copy_from_slice(dh);
        material[32..64].copy_from_slice(ciphertext);
        material[64..].copy_from_slice(recipient);
        let secret = blake3::derive_key(KEM_DERIVE_CONTEXT, &material);
        material.zeroize();
        SharedSecret::from_array(secret)
    }
}

impl Default for Curve25519Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Curve25519Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rng = match self.rng {
            RngSource::Os => "os",
            RngSource::Seeded(_) => "seeded",
        };
        f.debug_struct("Curve25519Provider").field("rng", &rng).finish()
    }
}

impl CryptoProvider for Curve25519Provider {
    fn scheme(&self) -> SchemeParams {
        SchemeParams {
            kem: "X25519-KEM",
            signature: "Ed25519",
            kem_public_key_len: X25519_KEY_SIZE,
            kem_ciphertext_len: X25519_KEY_SIZE,
            signing_public_key_len: ED25519_PUBLIC_KEY_SIZE,
            signature_len: ED25519_SIGNATURE_SIZE,
        }
    }

    fn generate_kem_keypair(&self) -> Result<KemKeyPair> {
        let mut seed = self
            .rng
            .array32()
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let secret = StaticSecret::from(seed);
        seed.zeroize();
        let public = PublicKey::from(&secret);
        Ok(KemKeyPair {
            public: KemPublicKey::from_bytes(public.to_bytes().to_vec()),
            secret: KemSecretKey::from_bytes(secret.to_bytes().to_vec()),
        })
    }

    fn generate_sign_keypair(&self) -> Result<SignKeyPair> {
        let mut seed = self
            .rng
            .array32()
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let signing = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(SignKeyPair {
            public: SigningPublicKey::from_bytes(signing.verifying_key().to_bytes().to_vec()),
            secret: SigningSecretKey::from_bytes(signing.to_bytes().to_vec()),
        })
    }

    fn encapsulate(&self, peer: &KemPublicKey) -> Result<(SharedSecret, KemCiphertext)> {
        self.check_kem_public_key(peer)?;
        let peer_bytes = to_array(peer.as_bytes())?;

        let mut seed = self
            .rng
            .array32()
            .map_err(|e| CryptoError::Encapsulation(e.to_string()))?;
        let ephemeral = StaticSecret::from(seed);
        seed.zeroize();
        let ciphertext = PublicKey::from(&ephemeral).to_bytes();

        let dh = ephemeral.diffie_hellman(&PublicKey::from(peer_bytes));
        if !dh.was_contributory() {
            return Err(CryptoError::Encapsulation(
                "non-contributory key exchange".into(),
            ));
        }
        let shared = Self::kem_shared_secret(dh.as_bytes(), &ciphertext, &peer_bytes);
        Ok((shared, KemCiphertext::from_bytes(ciphertext.to_vec())))
    }

    fn decapsulate(
        &self,
        secret: &KemSecretKey,
        ciphertext: &KemCiphertext,
    ) -> Result<SharedSecret> {
        let ct = to_array(ciphertext.as_bytes()).map_err(|_| CryptoError::Decapsulation)?;
        if is_low_order(&ct) {
            return Err(CryptoError::Decapsulation);
        }
        let mut sk = to_array(secret.expose())?;
        let static_secret = StaticSecret::from(sk);
        sk.zeroize();
        let recipient = PublicKey::from(&static_secret).to_bytes();

        let dh = static_secret.diffie_hellman(&PublicKey::from(ct));
        if !dh.was_contributory() {
            return Err(CryptoError::Decapsulation);
        }
        Ok(Self::kem_shared_secret(dh.as_bytes(), &ct, &recipient))
    }

    fn aead_encrypt(&self, key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce)?;
        symmetric::seal(key, &nonce, plaintext, aad)
    }

    fn aead_decrypt(&self, key: &SymmetricKey, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        symmetric::open(key, ciphertext, aad)
    }

    fn sign(&self, secret: &SigningSecretKey, message: &[u8]) -> Result<Signature> {
        let mut seed = to_array(secret.expose())
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        let signing = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Ok(Signature::from_bytes(signing.sign(message).to_bytes().to_vec()))
    }

    fn verify(&self, public: &SigningPublicKey, message: &[u8], signature: &[u8]) -> bool {
        let Ok(key_bytes) = to_array(public.as_bytes()) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
            return false;
        };
        key.verify_strict(message, &sig).is_ok()
    }

    fn random_bytes(&self, dest: &mut [u8]) -> Result<()> {
        self.rng.fill(dest)
    }

    fn check_kem_public_key(&self, key: &KemPublicKey) -> Result<()> {
        self.scheme().check_kem_public_key_len(key.len())?;
        let bytes = to_array(key.as_bytes())?;
        if is_low_order(&bytes) {
            return Err(CryptoError::InvalidKey("low-order X25519 point".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> Curve25519Provider {
        Curve25519Provider::from_seed([42u8; 32])
    }

    #[test]
    fn test_kem_roundtrip() {
        let p = provider();
        let bob = p.generate_kem_keypair().unwrap();
        let (sent, ct) = p.encapsulate(&bob.public).unwrap();
        let received = p.decapsulate(&bob.secret, &ct).unwrap();
        assert_eq!(sent.as_bytes(), received.as_bytes());
        assert_eq!(ct.len(), X25519_KEY_SIZE);
    }

    #[test]
    fn test_kem_wrong_secret_disagrees() {
        let p = provider();
        let bob = p.generate_kem_keypair().unwrap();
        let eve = p.generate_kem_keypair().unwrap();
        let (sent, ct) = p.encapsulate(&bob.public).unwrap();
        let received = p.decapsulate(&eve.secret, &ct).unwrap();
        assert_ne!(sent.as_bytes(), received.as_bytes());
    }

    #[test]
    fn test_encapsulate_rejects_low_order_key() {
        let p = provider();
        for point in LOW_ORDER_POINTS {
            let key = KemPublicKey::from_bytes(point.to_vec());
            assert!(p.encapsulate(&key).is_err());
        }
    }

    #[test]
    fn test_decapsulate_rejects_low_order_ciphertext() {
        let p = provider();
        let bob = p.generate_kem_keypair().unwrap();
        let ct = KemCiphertext::from_bytes(vec![0u8; 32]);
        assert!(matches!(
            p.decapsulate(&bob.secret, &ct),
            Err(CryptoError::Decapsulation)
        ));
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        let p = provider();
        let short = KemPublicKey::from_bytes(vec![9u8; 16]);
        assert!(matches!(
            p.check_kem_public_key(&short),
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn test_sign_verify() {
        let p = provider();
        let kp = p.generate_sign_keypair().unwrap();
        let sig = p.sign(&kp.secret, b"canonical payload").unwrap();
        assert_eq!(sig.len(), ED25519_SIGNATURE_SIZE);
        assert!(p.verify(&kp.public, b"canonical payload", sig.as_bytes()));
        assert!(!p.verify(&kp.public, b"other payload", sig.as_bytes()));
    }

    #[test]
    fn test_verify_rejects_malformed_inputs() {
        let p = provider();
        let kp = p.generate_sign_keypair().unwrap();
        assert!(!p.verify(&kp.public, b"m", &[0u8; 10]));
        let bad_key = SigningPublicKey::from_bytes(vec![1u8; 5]);
        assert!(!p.verify(&bad_key, b"m", &[0u8; 64]));
    }

    #[test]
    fn test_aead_roundtrip_and_nonce_freshness() {
        let p = provider();
        let key = SymmetricKey::from_array([8u8; 32]);
        let a = p.aead_encrypt(&key, b"hello", b"ctx").unwrap();
        let b = p.aead_encrypt(&key, b"hello", b"ctx").unwrap();
        assert_ne!(a, b);
        assert_eq!(p.aead_decrypt(&key, &a, b"ctx").unwrap(), b"hello");
        assert!(p.aead_decrypt(&key, &a, b"other").is_err());
    }

    #[test]
    fn test_seeded_providers_are_deterministic() {
        let a = Curve25519Provider::from_seed([1u8; 32]);
        let b = Curve25519Provider::from_seed([1u8; 32]);
        let ka = a.generate_sign_keypair().unwrap();
        let kb = b.generate_sign_keypair().unwrap();
        assert_eq!(ka.public, kb.public);

        let c = Curve25519Provider::from_seed([2u8; 32]);
        assert_ne!(ka.public, c.generate_sign_keypair().unwrap().public);
    }

    #[test]
    fn test_os_provider_generates_distinct_keys() {
        let p = Curve25519Provider::new();
        let a = p.generate_kem_keypair().unwrap();
        let b = p.generate_kem_keypair().unwrap();
        assert_ne!(a.public, b.public);
    }
}
