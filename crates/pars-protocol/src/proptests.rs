//! Property-based tests for protocol components.
//!
//! - Envelope encoding is lossless and keeps the envelope id
//! - Decoding arbitrary bytes never panics
//! - Any change to a signed field breaks the signature
//! - Onion layers peel in path order for every path length

use std::sync::Arc;

use proptest::prelude::*;

use pars_crypto::{CryptoProvider, Curve25519Provider};
use pars_identity::{Identity, IdentityManager, SessionId};

use crate::envelope::{signing_payload, EnvelopeCodec, MessageEnvelope};
use crate::limits::DEFAULT_MAX_TTL_SECS;
use crate::onion::{OnionRouter, RelayHop, Unwrapped};
use crate::ProtocolError;

fn session_id() -> impl Strategy<Value = SessionId> {
    (any::<[u8; 8]>(), any::<[u8; 8]>()).prop_map(|(k, s)| SessionId::derive(7, &k, &s))
}

fn envelope() -> impl Strategy<Value = MessageEnvelope> {
    (
        session_id(),
        session_id(),
        prop::collection::vec(any::<u8>(), 0..512),
        prop::collection::vec(any::<u8>(), 0..128),
        any::<u64>(),
        0..=DEFAULT_MAX_TTL_SECS,
    )
        .prop_map(|(from, to, ct, sig, ts, ttl)| MessageEnvelope::new(from, to, ct, sig, ts, ttl))
}

fn identities(seed: u8) -> IdentityManager {
    let provider: Arc<dyn CryptoProvider> = Arc::new(Curve25519Provider::from_seed([seed; 32]));
    IdentityManager::new(provider, 7)
}

// ==================== Envelope Property Tests ====================

proptest! {
    /// Encoding then decoding returns the same envelope and id.
    #[test]
    fn envelope_encoding_is_lossless(env in envelope()) {
        let codec = EnvelopeCodec::default();
        let decoded = codec.decode(&codec.encode(&env).unwrap()).unwrap();
        prop_assert_eq!(decoded.id(), env.id());
        prop_assert_eq!(decoded, env);
    }

    /// Arbitrary bytes either decode or fail with MalformedEnvelope.
    #[test]
    fn decode_arbitrary_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..400)) {
        match EnvelopeCodec::default().decode(&bytes) {
            Ok(_) | Err(ProtocolError::MalformedEnvelope(_)) => {}
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }

    /// Every truncation of a valid encoding is rejected.
    #[test]
    fn truncated_encoding_rejected(env in envelope(), cut in any::<prop::sample::Index>()) {
        let codec = EnvelopeCodec::default();
        let bytes = codec.encode(&env).unwrap();
        let at = cut.index(bytes.len());
        prop_assert!(codec.decode(&bytes[..at]).is_err());
    }

    /// Flipping one bit of the ciphertext or timestamp invalidates the signature.
    #[test]
    fn signed_field_bit_flip_rejected(
        ct in prop::collection::vec(any::<u8>(), 1..256),
        ts in any::<u64>(),
        flip_ct in any::<bool>(),
        bit in any::<prop::sample::Index>(),
    ) {
        let provider = Curve25519Provider::from_seed([5u8; 32]);
        let keys = provider.generate_sign_keypair().unwrap();
        let from = SessionId::derive(7, b"from", b"f");
        let to = SessionId::derive(7, b"to", b"t");
        let sig = provider.sign(&keys.secret, &signing_payload(&from, &to, &ct, ts)).unwrap();

        let (ct2, ts2) = if flip_ct {
            let mut ct2 = ct.clone();
            let i = bit.index(ct2.len() * 8);
            ct2[i / 8] ^= 1 << (i % 8);
            (ct2, ts)
        } else {
            (ct.clone(), ts ^ (1u64 << bit.index(64)))
        };
        let env = MessageEnvelope::new(from, to, ct2, sig.as_bytes().to_vec(), ts2, 60);
        prop_assert!(matches!(
            EnvelopeCodec::default().validate(&env, &keys.public, &provider),
            Err(ProtocolError::SignatureInvalid)
        ));
    }
}

// ==================== Onion Property Tests ====================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// A path of any allowed length delivers the envelope at its last hop.
    #[test]
    fn onion_layers_peel_in_order(hop_count in 3usize..=6, env in envelope()) {
        let identities = identities(hop_count as u8);
        let relays: Vec<Identity> = (0..hop_count)
            .map(|_| identities.generate_identity().unwrap())
            .collect();
        let path: Vec<RelayHop> = relays
            .iter()
            .map(|r| RelayHop { address: r.session_id(), kem_public: r.kem_public().clone() })
            .collect();
        let router = OnionRouter::with_defaults(identities);

        let mut packet = router.wrap_for_path(&env, &path).unwrap();
        for (i, relay) in relays.iter().enumerate() {
            match router.unwrap_one_layer(&packet, relay).unwrap() {
                Unwrapped::Forward { next_hop, packet: inner } => {
                    prop_assert!(i + 1 < hop_count);
                    prop_assert_eq!(next_hop, relays[i + 1].session_id());
                    packet = inner;
                }
                Unwrapped::Final(delivered) => {
                    prop_assert_eq!(i, hop_count - 1);
                    prop_assert_eq!(delivered.id(), env.id());
                }
            }
        }
    }
}
