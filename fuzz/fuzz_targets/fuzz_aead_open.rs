//! Fuzz target for AEAD decryption.
//!
//! Tests that decrypting arbitrary bytes is handled safely.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pars_crypto::{CryptoProvider, Curve25519Provider, SymmetricKey};

fuzz_target!(|data: &[u8]| {
    let provider = Curve25519Provider::from_seed([1u8; 32]);
    let key = SymmetricKey::from_array([0x42u8; 32]);
    let (aad, ciphertext) = data.split_at(data.len().min(16));

    if let Ok(plaintext) = provider.aead_decrypt(&key, ciphertext, aad) {
        // Only a sealed message can open; re-sealing must open again.
        let sealed = provider.aead_encrypt(&key, &plaintext, aad).unwrap();
        assert_eq!(provider.aead_decrypt(&key, &sealed, aad).unwrap(), plaintext);
    }
});
