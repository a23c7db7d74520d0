//! Layered encryption over a relay path.

use std::collections::HashSet;

use pars_crypto::{KemPublicKey, SharedSecret, SymmetricKey};
use pars_identity::{Identity, IdentityManager, SessionId};
use tracing::{debug, trace};

use super::packet::{layer_header, parse_layer, OnionPacket, TAG_FINAL, TAG_FORWARD};
use crate::domain_separation::kdf;
use crate::envelope::{EnvelopeCodec, MessageEnvelope};
use crate::limits::{DEFAULT_MIN_HOPS, MAX_HOPS, MAX_PACKET_SIZE};
use crate::{ProtocolError, Result};

/// A relay on a path: where to send, and whose key to seal to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayHop {
    /// Relay address.
    pub address: SessionId,
    /// Relay KEM public key.
    pub kem_public: KemPublicKey,
}

/// Result of removing one layer.
#[derive(Debug)]
pub enum Unwrapped {
    /// Pass `packet` on to `next_hop`.
    Forward {
        /// Next relay.
        next_hop: SessionId,
        /// Remaining layers.
        packet: OnionPacket,
    },
    /// This was the last layer.
    Final(MessageEnvelope),
}

/// Wraps envelopes for a path and peels layers at relays.
#[derive(Clone)]
pub struct OnionRouter {
    identities: IdentityManager,
    codec: EnvelopeCodec,
    min_hops: usize,
}

impl OnionRouter {
    /// Create a router.
    pub fn new(identities: IdentityManager, codec: EnvelopeCodec, min_hops: usize) -> Self {
        Self {
            identities,
            codec,
            min_hops,
        }
    }

    /// Router with the default minimum path length.
    pub fn with_defaults(identities: IdentityManager) -> Self {
        Self::new(identities, EnvelopeCodec::default(), DEFAULT_MIN_HOPS)
    }

    /// Shortest path accepted by [`Self::wrap_for_path`].
    pub fn min_hops(&self) -> usize {
        self.min_hops
    }

    /// Codec used for the innermost payload.
    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    fn check_path(&self, path: &[RelayHop]) -> Result<()> {
        if path.len() < self.min_hops {
            return Err(ProtocolError::PathTooShort {
                min: self.min_hops,
                actual: path.len(),
            });
        }
        if path.len() > MAX_HOPS {
            return Err(ProtocolError::InvalidPath(format!(
                "{} hops exceeds maximum {}",
                path.len(),
                MAX_HOPS
            )));
        }

        let provider = self.identities.provider();
        let mut seen = HashSet::with_capacity(path.len());
        for hop in path {
            provider
                .check_kem_public_key(&hop.kem_public)
                .map_err(|e| ProtocolError::InvalidHopKey(format!("{}: {}", hop.address.short(), e)))?;
            if !seen.insert(hop.address) {
                return Err(ProtocolError::InvalidHopKey(format!(
                    "duplicate hop {}",
                    hop.address.short()
                )));
            }
        }
        Ok(())
    }

    fn seal_layer(&self, hop: &RelayHop, body: &[u8]) -> Result<Vec<u8>> {
        let provider = self.identities.provider();
        let (shared, ciphertext) = provider.encapsulate(&hop.kem_public)?;
        let key = layer_key(&shared, ciphertext.as_bytes());
        let mut layer = layer_header(&ciphertext);
        let sealed = provider.aead_encrypt(&key, body, &layer)?;
        layer.extend_from_slice(&sealed);
        Ok(layer)
    }

    /// Encrypt an envelope in one layer per hop, innermost first.
    ///
    /// The first hop in `path` peels the outermost layer; the last hop finds
    /// the envelope.
    ///
    /// # Errors
    ///
    /// - `PathTooShort` below the configured minimum
    /// - `InvalidHopKey` for a malformed key or a repeated hop
    /// - `MalformedEnvelope` if the envelope does not encode or the packet
    ///   would exceed [`MAX_PACKET_SIZE`]
    pub fn wrap_for_path(&self, envelope: &MessageEnvelope, path: &[RelayHop]) -> Result<OnionPacket> {
        self.check_path(path)?;

        let encoded = self.codec.encode(envelope)?;
        let mut body = Vec::with_capacity(1 + encoded.len());
        body.push(TAG_FINAL);
        body.extend_from_slice(&encoded);

        let mut layer = Vec::new();
        for (i, hop) in path.iter().enumerate().rev() {
            if i + 1 < path.len() {
                let next = path[i + 1].address.to_bytes();
                body = Vec::with_capacity(1 + next.len() + layer.len());
                body.push(TAG_FORWARD);
                body.extend_from_slice(&next);
                body.extend_from_slice(&layer);
            }
            layer = self.seal_layer(hop, &body)?;
        }
        if layer.len() > MAX_PACKET_SIZE {
            return Err(ProtocolError::MalformedEnvelope(format!(
                "onion packet of {} bytes exceeds maximum {}",
                layer.len(),
                MAX_PACKET_SIZE
            )));
        }

        debug!(
            envelope_id = %envelope.id().short(),
            hops = path.len(),
            size = layer.len(),
            "Envelope wrapped"
        );
        Ok(OnionPacket::from_bytes(layer))
    }

    /// Remove the layer addressed to `local`.
    ///
    /// # Errors
    ///
    /// - `DecryptionFailed` if the layer does not parse or authenticate
    ///   under the local key
    /// - `MalformedEnvelope` if the final payload does not decode
    pub fn unwrap_one_layer(&self, packet: &OnionPacket, local: &Identity) -> Result<Unwrapped> {
        let header = parse_layer(packet.as_bytes()).map_err(|e| {
            trace!(error = %e, "Layer header rejected");
            ProtocolError::DecryptionFailed
        })?;
        let shared = self
            .identities
            .decapsulate(local, &header.kem_ciphertext)
            .map_err(|_| ProtocolError::DecryptionFailed)?;
        let key = layer_key(&shared, header.kem_ciphertext.as_bytes());
        let body = self
            .identities
            .provider()
            .aead_decrypt(&key, header.sealed, header.aad)
            .map_err(|_| ProtocolError::DecryptionFailed)?;

        match body.split_first() {
            Some((&TAG_FORWARD, rest)) if rest.len() > SessionId::WIRE_SIZE => {
                let (next, inner) = rest.split_at(SessionId::WIRE_SIZE);
                let next_hop =
                    SessionId::from_bytes(next).map_err(|_| ProtocolError::DecryptionFailed)?;
                Ok(Unwrapped::Forward {
                    next_hop,
                    packet: OnionPacket::from_bytes(inner.to_vec()),
                })
            }
            Some((&TAG_FINAL, encoded)) => Ok(Unwrapped::Final(self.codec.decode(encoded)?)),
            _ => Err(ProtocolError::DecryptionFailed),
        }
    }
}

fn layer_key(shared: &SharedSecret, kem_ciphertext: &[u8]) -> SymmetricKey {
    shared.derive_key(kdf::ONION_LAYER, kem_ciphertext)
}

impl std::fmt::Debug for OnionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnionRouter")
            .field("min_hops", &self.min_hops)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pars_crypto::{CryptoProvider, Curve25519Provider};
    use std::sync::Arc;

    struct Net {
        router: OnionRouter,
        relays: Vec<Identity>,
        sender: Identity,
        recipient: Identity,
    }

    fn net(relay_count: usize) -> Net {
        let provider: Arc<dyn CryptoProvider> = Arc::new(Curve25519Provider::from_seed([21u8; 32]));
        let identities = IdentityManager::new(provider, 0x07);
        let relays = (0..relay_count)
            .map(|_| identities.generate_identity().unwrap())
            .collect();
        let sender = identities.generate_identity().unwrap();
        let recipient = identities.generate_identity().unwrap();
        Net {
            router: OnionRouter::with_defaults(identities),
            relays,
            sender,
            recipient,
        }
    }

    fn hops(relays: &[Identity]) -> Vec<RelayHop> {
        relays
            .iter()
            .map(|r| RelayHop {
                address: r.session_id(),
                kem_public: r.kem_public().clone(),
            })
            .collect()
    }

    fn envelope(net: &Net) -> MessageEnvelope {
        MessageEnvelope::new(
            net.sender.session_id(),
            net.recipient.session_id(),
            b"opaque ciphertext".to_vec(),
            vec![7u8; 64],
            1_700_000_000,
            600,
        )
    }

    #[test]
    fn test_three_hop_path_delivers_envelope() {
        let net = net(3);
        let env = envelope(&net);
        let path = hops(&net.relays);
        let mut packet = net.router.wrap_for_path(&env, &path).unwrap();

        for (i, relay) in net.relays.iter().enumerate() {
            match net.router.unwrap_one_layer(&packet, relay).unwrap() {
                Unwrapped::Forward { next_hop, packet: inner } => {
                    assert!(i + 1 < net.relays.len());
                    assert_eq!(next_hop, net.relays[i + 1].session_id());
                    assert!(inner.len() < packet.len());
                    packet = inner;
                }
                Unwrapped::Final(delivered) => {
                    assert_eq!(i, net.relays.len() - 1);
                    assert_eq!(delivered, env);
                    assert_eq!(delivered.id(), env.id());
                    return;
                }
            }
        }
        panic!("packet never reached the final layer");
    }

    #[test]
    fn test_wrong_relay_cannot_unwrap() {
        let net = net(4);
        let packet = net
            .router
            .wrap_for_path(&envelope(&net), &hops(&net.relays[..3]))
            .unwrap();
        assert!(matches!(
            net.router.unwrap_one_layer(&packet, &net.relays[1]),
            Err(ProtocolError::DecryptionFailed)
        ));
        assert!(matches!(
            net.router.unwrap_one_layer(&packet, &net.relays[3]),
            Err(ProtocolError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_tampered_layer_rejected() {
        let net = net(3);
        let packet = net
            .router
            .wrap_for_path(&envelope(&net), &hops(&net.relays))
            .unwrap();
        for at in [0, 1, 10, packet.len() / 2, packet.len() - 1] {
            let mut bytes = packet.clone().into_bytes();
            bytes[at] ^= 0x01;
            assert!(matches!(
                net.router
                    .unwrap_one_layer(&OnionPacket::from_bytes(bytes), &net.relays[0]),
                Err(ProtocolError::DecryptionFailed)
            ));
        }
    }

    #[test]
    fn test_oversized_packet_refused_before_sending() {
        let net = net(3);
        let router = OnionRouter::new(
            net.router.identities.clone(),
            EnvelopeCodec::new(crate::envelope::EnvelopeLimits {
                max_ciphertext_len: 4 * 1024 * 1024,
                ..Default::default()
            }),
            DEFAULT_MIN_HOPS,
        );
        let env = MessageEnvelope::new(
            net.sender.session_id(),
            net.recipient.session_id(),
            vec![0u8; 2 * 1024 * 1024],
            vec![7u8; 64],
            1_700_000_000,
            600,
        );
        assert!(matches!(
            router.wrap_for_path(&env, &hops(&net.relays)),
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_garbage_packet_rejected() {
        let net = net(1);
        for bytes in [vec![], vec![1], vec![1, 0, 0], vec![0xff; 200]] {
            assert!(matches!(
                net.router
                    .unwrap_one_layer(&OnionPacket::from_bytes(bytes), &net.relays[0]),
                Err(ProtocolError::DecryptionFailed)
            ));
        }
    }

    #[test]
    fn test_short_path_rejected() {
        let net = net(2);
        assert!(matches!(
            net.router.wrap_for_path(&envelope(&net), &hops(&net.relays)),
            Err(ProtocolError::PathTooShort { min: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_duplicate_hop_rejected() {
        let net = net(2);
        let mut path = hops(&net.relays);
        path.push(path[0].clone());
        assert!(matches!(
            net.router.wrap_for_path(&envelope(&net), &path),
            Err(ProtocolError::InvalidHopKey(_))
        ));
    }

    #[test]
    fn test_bad_hop_key_rejected() {
        let net = net(3);
        let mut path = hops(&net.relays);
        path[1].kem_public = KemPublicKey::from_bytes(vec![1u8; 31]);
        assert!(matches!(
            net.router.wrap_for_path(&envelope(&net), &path),
            Err(ProtocolError::InvalidHopKey(_))
        ));

        // All-zero is a low-order point.
        path[1].kem_public = KemPublicKey::from_bytes(vec![0u8; 32]);
        assert!(matches!(
            net.router.wrap_for_path(&envelope(&net), &path),
            Err(ProtocolError::InvalidHopKey(_))
        ));
    }

    #[test]
    fn test_layers_do_not_repeat_across_wraps() {
        let net = net(3);
        let env = envelope(&net);
        let path = hops(&net.relays);
        let a = net.router.wrap_for_path(&env, &path).unwrap();
        let b = net.router.wrap_for_path(&env, &path).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), b.len());
    }
}
