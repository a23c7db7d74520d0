//! Relay nodes and the transport that moves onion packets between them.
//!
//! A [`Relay`] owns an identity whose KEM key seals one layer of every path
//! it appears on. On receipt it spools the packet, peels its layer, drops the
//! spool record, and either hands back a forwarding instruction or commits
//! the envelope to the recipient's mailbox. The mailbox record is written
//! only at the final hop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use pars_identity::{Identity, SessionId};
use pars_protocol::{
    Clock, EnvelopeCodec, EnvelopeId, MessageEnvelope, OnionPacket, OnionRouter, RelayHop,
    Unwrapped,
};
use pars_store::{mailbox_key, spool_key, StorageNode};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};

/// Lifetime of a spooled packet. Spool records are removed as soon as the
/// layer is peeled; this only bounds leftovers from interrupted relays.
pub const SPOOL_TTL_SECS: i64 = 300;

/// What a relay did with a packet.
#[derive(Debug)]
pub enum RelayOutcome {
    /// Pass `packet` to `next_hop`.
    Forward {
        /// Next relay.
        next_hop: SessionId,
        /// Remaining layers.
        packet: OnionPacket,
    },
    /// Envelope committed to the recipient's mailbox.
    Delivered {
        /// Mailbox owner.
        recipient: SessionId,
        /// Committed envelope.
        envelope_id: EnvelopeId,
    },
    /// Envelope had already expired and was dropped.
    Expired(EnvelopeId),
}

/// Write an envelope to its recipient's mailbox for the rest of its TTL.
///
/// Returns `false` without writing if the envelope has already expired.
pub(crate) async fn commit_envelope(
    storage: &StorageNode,
    codec: &EnvelopeCodec,
    envelope: &MessageEnvelope,
    now: u64,
) -> Result<bool> {
    let expires_at = envelope.expires_at();
    if now >= expires_at {
        return Ok(false);
    }
    let remaining = i64::try_from(expires_at - now).unwrap_or(i64::MAX);
    let key = mailbox_key(envelope.recipient(), &envelope.id());
    storage.store(&key, codec.encode(envelope)?, remaining).await?;
    debug!(
        recipient = %envelope.recipient().short(),
        envelope_id = %envelope.id().short(),
        ttl = remaining,
        "Envelope committed to mailbox"
    );
    Ok(true)
}

/// Relay packet counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    packets_received: AtomicU64,
    packets_forwarded: AtomicU64,
    envelopes_delivered: AtomicU64,
    packets_dropped: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    /// Packets accepted for processing.
    pub packets_received: u64,
    /// Layers peeled and passed on.
    pub packets_forwarded: u64,
    /// Envelopes committed at the final hop.
    pub envelopes_delivered: u64,
    /// Packets that failed to unwrap or had expired.
    pub packets_dropped: u64,
}

impl RelayStats {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_forwarded: self.packets_forwarded.load(Ordering::Relaxed),
            envelopes_delivered: self.envelopes_delivered.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
        }
    }
}

/// A relay node.
pub struct Relay {
    identity: Arc<Identity>,
    router: OnionRouter,
    storage: Arc<StorageNode>,
    clock: Arc<dyn Clock>,
    stats: RelayStats,
}

impl Relay {
    /// Create a relay for `identity` persisting into `storage`.
    pub fn new(
        identity: Arc<Identity>,
        router: OnionRouter,
        storage: Arc<StorageNode>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identity,
            router,
            storage,
            clock,
            stats: RelayStats::default(),
        }
    }

    /// Relay address.
    pub fn address(&self) -> SessionId {
        self.identity.session_id()
    }

    /// Directory entry senders use to build paths through this relay.
    pub fn hop(&self) -> RelayHop {
        RelayHop {
            address: self.address(),
            kem_public: self.identity.kem_public().clone(),
        }
    }

    /// Packet counters.
    pub fn stats(&self) -> RelayStatsSnapshot {
        self.stats.snapshot()
    }

    /// Process one packet addressed to this relay.
    ///
    /// # Errors
    ///
    /// - `Store` if the spool or mailbox write fails
    /// - `Protocol(DecryptionFailed)` if the layer is not ours or was altered
    /// - `Protocol(MalformedEnvelope)` if the final layer holds garbage
    pub async fn receive(&self, packet: OnionPacket) -> Result<RelayOutcome> {
        RelayStats::incr(&self.stats.packets_received);
        let address = self.address();
        let spool = spool_key(&address, &packet.digest());
        self.storage
            .store(&spool, packet.as_bytes().to_vec(), SPOOL_TTL_SECS)
            .await?;

        let peeled = self.router.unwrap_one_layer(&packet, &self.identity);
        self.storage.delete(&spool).await?;

        let unwrapped = match peeled {
            Ok(unwrapped) => unwrapped,
            Err(e) => {
                RelayStats::incr(&self.stats.packets_dropped);
                warn!(relay = %address.short(), error = %e, "Dropping packet");
                return Err(e.into());
            }
        };

        match unwrapped {
            Unwrapped::Forward { next_hop, packet } => {
                RelayStats::incr(&self.stats.packets_forwarded);
                debug!(
                    relay = %address.short(),
                    next_hop = %next_hop.short(),
                    remaining = packet.len(),
                    "Layer peeled"
                );
                Ok(RelayOutcome::Forward { next_hop, packet })
            }
            Unwrapped::Final(envelope) => {
                let now = self.clock.now();
                let id = envelope.id();
                if !commit_envelope(&self.storage, self.router.codec(), &envelope, now).await? {
                    RelayStats::incr(&self.stats.packets_dropped);
                    debug!(
                        relay = %address.short(),
                        envelope_id = %id.short(),
                        expired_at = envelope.expires_at(),
                        "Expired envelope dropped"
                    );
                    return Ok(RelayOutcome::Expired(id));
                }
                RelayStats::incr(&self.stats.envelopes_delivered);
                Ok(RelayOutcome::Delivered {
                    recipient: *envelope.recipient(),
                    envelope_id: id,
                })
            }
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("address", &self.address().short())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Moves packets to relays.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Hand `packet` to the relay at `hop` and see it through to delivery.
    async fn deliver(&self, hop: &SessionId, packet: OnionPacket) -> Result<()>;

    /// Relays currently known to the transport, for path selection.
    async fn relays(&self) -> Vec<RelayHop>;
}

/// In-process relay network.
///
/// `deliver` walks the packet through each relay in turn until the final
/// hop commits it.
#[derive(Default)]
pub struct LocalRelayNetwork {
    relays: RwLock<HashMap<SessionId, Arc<Relay>>>,
}

impl LocalRelayNetwork {
    /// Empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a relay. Replaces any relay with the same address.
    pub async fn add_relay(&self, relay: Arc<Relay>) {
        let address = relay.address();
        self.relays.write().await.insert(address, relay);
        info!(relay = %address.short(), "Relay joined");
    }

    /// Remove a relay. Returns whether it was present.
    pub async fn remove_relay(&self, address: &SessionId) -> bool {
        let removed = self.relays.write().await.remove(address).is_some();
        if removed {
            info!(relay = %address.short(), "Relay left");
        }
        removed
    }

    /// Look up a relay.
    pub async fn relay(&self, address: &SessionId) -> Option<Arc<Relay>> {
        self.relays.read().await.get(address).cloned()
    }

    /// Number of relays.
    pub async fn len(&self) -> usize {
        self.relays.read().await.len()
    }

    /// Whether the network has no relays.
    pub async fn is_empty(&self) -> bool {
        self.relays.read().await.is_empty()
    }
}

#[async_trait]
impl RelayTransport for LocalRelayNetwork {
    async fn deliver(&self, hop: &SessionId, packet: OnionPacket) -> Result<()> {
        let mut address = *hop;
        let mut packet = packet;
        loop {
            let relay = self
                .relay(&address)
                .await
                .ok_or_else(|| CoreError::RelayUnreachable(address.short()))?;
            match relay.receive(packet).await? {
                RelayOutcome::Forward { next_hop, packet: next } => {
                    address = next_hop;
                    packet = next;
                }
                RelayOutcome::Delivered { .. } | RelayOutcome::Expired(_) => return Ok(()),
            }
        }
    }

    async fn relays(&self) -> Vec<RelayHop> {
        let mut hops: Vec<RelayHop> = self.relays.read().await.values().map(|r| r.hop()).collect();
        hops.sort_by(|a, b| a.address.cmp(&b.address));
        hops
    }
}

impl std::fmt::Debug for LocalRelayNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRelayNetwork").finish_non_exhaustive()
    }
}
