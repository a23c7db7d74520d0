//! Fuzz target for OnionRouter::unwrap_one_layer.
//!
//! A relay handed arbitrary bytes must reject them without panicking.

#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use pars_crypto::{CryptoProvider, Curve25519Provider};
use pars_identity::IdentityManager;
use pars_protocol::{OnionPacket, OnionRouter};

fuzz_target!(|data: &[u8]| {
    let provider: Arc<dyn CryptoProvider> = Arc::new(Curve25519Provider::from_seed([7u8; 32]));
    let identities = IdentityManager::new(provider, 0x07);
    let relay = identities.generate_identity().unwrap();
    let router = OnionRouter::with_defaults(identities);

    let packet = OnionPacket::from_bytes(data.to_vec());
    // Forged layers cannot authenticate under the relay's key.
    assert!(router.unwrap_one_layer(&packet, &relay).is_err());
});
