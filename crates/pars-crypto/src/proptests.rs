//! Property-based tests for the reference provider.
//!
//! Focus on the properties the messaging core relies on:
//! - AEAD and KEM agreement for arbitrary inputs
//! - Any single bit flip in a signed message or signature breaks verification
//! - Hash framing never collides across different splits

use proptest::prelude::*;

use crate::{CryptoProvider, Curve25519Provider, Hash256, SymmetricKey};

fn provider(seed: u8) -> Curve25519Provider {
    Curve25519Provider::from_seed([seed; 32])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Sealing then opening returns the plaintext for any input and aad.
    #[test]
    fn aead_roundtrip(plaintext: Vec<u8>, aad: Vec<u8>, key in any::<[u8; 32]>()) {
        let p = provider(1);
        let key = SymmetricKey::from_array(key);
        let sealed = p.aead_encrypt(&key, &plaintext, &aad).unwrap();
        prop_assert_eq!(p.aead_decrypt(&key, &sealed, &aad).unwrap(), plaintext);
    }

    /// Flipping any bit of a sealed blob makes it fail to open.
    #[test]
    fn aead_bit_flip_fails(
        plaintext in prop::collection::vec(any::<u8>(), 0..64),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let p = provider(2);
        let key = SymmetricKey::from_array([5u8; 32]);
        let mut sealed = p.aead_encrypt(&key, &plaintext, b"").unwrap();
        let i = index.index(sealed.len());
        sealed[i] ^= 1 << bit;
        prop_assert!(p.aead_decrypt(&key, &sealed, b"").is_err());
    }

    /// Both sides of the KEM agree for every generated keypair.
    #[test]
    fn kem_agreement(seed: u8) {
        let p = provider(seed);
        let recipient = p.generate_kem_keypair().unwrap();
        let (sent, ct) = p.encapsulate(&recipient.public).unwrap();
        let received = p.decapsulate(&recipient.secret, &ct).unwrap();
        prop_assert_eq!(sent.as_bytes(), received.as_bytes());
    }

    /// A signature never verifies over a message with one bit changed.
    #[test]
    fn signature_bit_flip_in_message_fails(
        message in prop::collection::vec(any::<u8>(), 1..128),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let p = provider(3);
        let kp = p.generate_sign_keypair().unwrap();
        let sig = p.sign(&kp.secret, &message).unwrap();
        let mut tampered = message.clone();
        let i = index.index(tampered.len());
        tampered[i] ^= 1 << bit;
        prop_assert!(p.verify(&kp.public, &message, sig.as_bytes()));
        prop_assert!(!p.verify(&kp.public, &tampered, sig.as_bytes()));
    }

    /// A signature with one bit changed never verifies.
    #[test]
    fn signature_bit_flip_in_signature_fails(
        message in prop::collection::vec(any::<u8>(), 0..64),
        index in 0usize..64,
        bit in 0u8..8,
    ) {
        let p = provider(4);
        let kp = p.generate_sign_keypair().unwrap();
        let mut sig = p.sign(&kp.secret, &message).unwrap().as_bytes().to_vec();
        sig[index] ^= 1 << bit;
        prop_assert!(!p.verify(&kp.public, &message, &sig));
    }

    /// Moving the split point between two inputs changes the digest.
    #[test]
    fn hash_many_split_sensitivity(data in prop::collection::vec(any::<u8>(), 2..64), split in 1usize..63) {
        let split = split.min(data.len() - 1);
        let (a, b) = data.split_at(split);
        prop_assert_ne!(Hash256::hash_many(&[a, b]), Hash256::hash_many(&[&data]));
    }
}
