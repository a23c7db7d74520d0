//! Messenger: sends and receives messages for one local identity.
//!
//! # Send path
//!
//! ```text
//! send(conversation, plaintext)
//!   -> SessionManager::seal            (session key, AEAD)
//!   -> sign (sender, recipient, ciphertext, timestamp)
//!   -> SessionManager::send_message    (membership + status check)
//!   -> HopSelector + OnionRouter       (one layer per relay)
//!   -> RelayTransport::deliver         (final hop commits to mailbox)
//! ```
//!
//! With onion routing disabled the envelope is committed to the recipient's
//! mailbox directly.
//!
//! # Receive path
//!
//! [`Messenger::receive`] drains the local mailbox. Handshakes are processed
//! before sealed messages so a session key that arrives in the same batch as
//! the first messages is installed in time. Opened records are deleted.
//! Records that fail validation are reported in [`ReceiveOutcome::rejected`];
//! they are deleted when the failure is final and left in the mailbox until
//! their TTL when a later receive may succeed (unknown contact, session not
//! yet installed).
//!
//! # Health
//!
//! Consecutive crypto provider failures on either path are counted and
//! drive [`Messenger::is_degraded`]. Authentication failures (bad
//! signature, bad ciphertext) are tampering, not provider trouble, and only
//! show up in rejections and stats.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pars_crypto::CryptoProvider;
use pars_identity::{Identity, IdentityManager, PublicIdentity, SessionId};
use pars_protocol::envelope::signing_payload;
use pars_protocol::onion::validate_selection;
use pars_protocol::session::SealedMessage;
use pars_protocol::{
    Clock, ConversationId, EnvelopeCodec, EnvelopeId, HopSelector, MessageEnvelope, OnionRouter,
    ProtocolError, RandomHopSelector, Session, SessionManager, SessionStatus,
};
use pars_store::keys::display_key;
use pars_store::{mailbox_prefix, StorageNode};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ParsConfig};
use crate::error::{CoreError, ErrorKind, Result};
use crate::payload::Payload;
use crate::relay::{commit_envelope, RelayTransport};

/// Per-call send options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Envelope lifetime. Defaults to the configured retention period.
    pub ttl_secs: Option<i64>,

    /// Upper bound on the whole send, including relay delivery.
    pub deadline: Option<Duration>,
}

impl SendOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the envelope lifetime.
    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = Some(ttl_secs);
        self
    }

    /// Bound the send by `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A message opened from the local mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Envelope the message arrived in.
    pub envelope_id: EnvelopeId,
    /// Conversation it belongs to.
    pub conversation: ConversationId,
    /// Verified sender.
    pub sender: SessionId,
    /// Decrypted payload.
    pub plaintext: Vec<u8>,
    /// Sender timestamp, Unix seconds.
    pub timestamp: u64,
}

/// A mailbox record that failed validation.
#[derive(Debug)]
pub struct RejectedEnvelope {
    /// Storage key the record was found under.
    pub key: String,
    /// Envelope id, if the record decoded.
    pub envelope_id: Option<EnvelopeId>,
    /// Why it was rejected.
    pub error: CoreError,
    /// Whether the record was left in the mailbox for a later receive.
    pub retained: bool,
}

/// Result of draining the mailbox.
#[derive(Debug, Default)]
pub struct ReceiveOutcome {
    /// Messages opened, oldest first.
    pub messages: Vec<ReceivedMessage>,
    /// Conversations installed from handshakes.
    pub sessions_accepted: Vec<ConversationId>,
    /// Records that failed validation.
    pub rejected: Vec<RejectedEnvelope>,
}

impl ReceiveOutcome {
    /// Whether nothing was found.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.sessions_accepted.is_empty() && self.rejected.is_empty()
    }
}

/// Messenger counters.
#[derive(Debug, Default)]
struct MessengerStats {
    envelopes_sent: AtomicU64,
    handshakes_sent: AtomicU64,
    messages_received: AtomicU64,
    sessions_accepted: AtomicU64,
    envelopes_rejected: AtomicU64,
    authentication_failures: AtomicU64,
}

/// Point-in-time copy of the messenger counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessengerStatsSnapshot {
    /// Message envelopes handed to the transport or committed.
    pub envelopes_sent: u64,
    /// Handshake envelopes sent.
    pub handshakes_sent: u64,
    /// Messages opened.
    pub messages_received: u64,
    /// Sessions installed from handshakes.
    pub sessions_accepted: u64,
    /// Mailbox records rejected.
    pub envelopes_rejected: u64,
    /// Rejections caused by a bad signature or ciphertext.
    pub authentication_failures: u64,
}

impl MessengerStats {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MessengerStatsSnapshot {
        MessengerStatsSnapshot {
            envelopes_sent: self.envelopes_sent.load(Ordering::Relaxed),
            handshakes_sent: self.handshakes_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            sessions_accepted: self.sessions_accepted.load(Ordering::Relaxed),
            envelopes_rejected: self.envelopes_rejected.load(Ordering::Relaxed),
            authentication_failures: self.authentication_failures.load(Ordering::Relaxed),
        }
    }
}

enum Opened {
    Message(ReceivedMessage),
    Accepted(ConversationId),
}

/// Orchestrates sessions, envelopes, routing, and storage for one identity.
pub struct Messenger {
    config: ParsConfig,
    identities: IdentityManager,
    local: Arc<Identity>,
    sessions: SessionManager,
    router: OnionRouter,
    selector: Arc<dyn HopSelector>,
    storage: Arc<StorageNode>,
    transport: Arc<dyn RelayTransport>,
    clock: Arc<dyn Clock>,
    contacts: RwLock<HashMap<SessionId, PublicIdentity>>,
    crypto_failures: AtomicU32,
    stats: MessengerStats,
}

impl Messenger {
    /// Create a messenger acting for `local`.
    ///
    /// # Errors
    ///
    /// `Config` if the configuration is invalid or its SessionId prefix
    /// differs from the identity manager's.
    pub fn new(
        config: ParsConfig,
        identities: IdentityManager,
        local: Arc<Identity>,
        storage: Arc<StorageNode>,
        transport: Arc<dyn RelayTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let prefix = config.id_prefix()?;
        if prefix != identities.prefix() {
            return Err(ConfigError::InvalidValue {
                field: "session.idPrefix".into(),
                reason: format!(
                    "configured prefix {:02x} differs from identity manager prefix {:02x}",
                    prefix,
                    identities.prefix()
                ),
            }
            .into());
        }
        local.session_id().ensure_prefix(prefix)?;

        let codec = EnvelopeCodec::new(config.envelope_limits());
        let router = OnionRouter::new(identities.clone(), codec, config.onion.min_hops);
        let sessions = SessionManager::new(
            identities.clone(),
            local.clone(),
            clock.clone(),
            config.session_config(),
        );

        info!(
            session_id = %local.session_id().short(),
            onion = config.onion.enabled,
            hops = config.onion.hop_count,
            "Messenger created"
        );

        Ok(Self {
            config,
            identities,
            local,
            sessions,
            router,
            selector: Arc::new(RandomHopSelector::new()),
            storage,
            transport,
            clock,
            contacts: RwLock::new(HashMap::new()),
            crypto_failures: AtomicU32::new(0),
            stats: MessengerStats::default(),
        })
    }

    /// Replace the relay path selector.
    pub fn with_selector(mut self, selector: Arc<dyn HopSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Local address.
    pub fn session_id(&self) -> SessionId {
        self.local.session_id()
    }

    /// Local public identity, for handing to contacts.
    pub fn public_identity(&self) -> PublicIdentity {
        self.local.public_identity().clone()
    }

    /// Active configuration.
    pub fn config(&self) -> &ParsConfig {
        &self.config
    }

    /// Session manager for this identity.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Storage node holding mailboxes.
    pub fn storage(&self) -> &Arc<StorageNode> {
        &self.storage
    }

    /// Crypto provider in use.
    pub fn provider(&self) -> &Arc<dyn CryptoProvider> {
        self.identities.provider()
    }

    /// Counters.
    pub fn stats(&self) -> MessengerStatsSnapshot {
        self.stats.snapshot()
    }

    // ========================================================================
    // Contacts
    // ========================================================================

    /// Register a counterparty after checking that its keys derive its id.
    pub async fn add_contact(&self, contact: PublicIdentity) -> Result<()> {
        self.identities.verify_public(&contact)?;
        let id = contact.session_id;
        self.contacts.write().await.insert(id, contact);
        debug!(contact = %id.short(), "Contact registered");
        Ok(())
    }

    /// Forget a counterparty. Returns whether it was registered.
    pub async fn remove_contact(&self, id: &SessionId) -> bool {
        self.contacts.write().await.remove(id).is_some()
    }

    /// Look up a registered counterparty.
    pub async fn contact(&self, id: &SessionId) -> Result<PublicIdentity> {
        if *id == self.session_id() {
            return Ok(self.public_identity());
        }
        self.contacts
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownContact(id.short()))
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Open a conversation with `peers` and send each of them a handshake.
    ///
    /// Two-party sessions derive their key from a KEM encapsulation to the
    /// peer; larger groups get a random key wrapped for every member.
    /// Calling again for the same live participant set resends the
    /// handshakes for the existing session.
    pub async fn create_session(&self, peers: &[PublicIdentity]) -> Result<Session> {
        if peers.is_empty() {
            return Err(CoreError::InvalidArgument(
                "a session needs at least one peer".into(),
            ));
        }
        for peer in peers {
            self.add_contact(peer.clone()).await?;
        }

        let mut ids = Vec::with_capacity(peers.len() + 1);
        let mut keys = Vec::with_capacity(peers.len() + 1);
        ids.push(self.session_id());
        keys.push(self.local.kem_public().clone());
        for peer in peers {
            ids.push(peer.session_id);
            keys.push(peer.kem_public.clone());
        }

        let mut session = self.sessions.create_session(&ids, &keys).await?;
        if session.status == SessionStatus::Pending {
            session = self.track(self.sessions.establish_group_key(&session.id).await)?;
        }

        let ttl = self.config.default_ttl_secs();
        for exchange in self.sessions.key_exchanges(&session.id).await? {
            let recipient = exchange.share.recipient;
            let payload = Payload::Handshake(exchange).encode()?;
            let envelope = self.build_envelope(&session.id, recipient, payload, ttl).await?;
            self.route(envelope).await?;
            MessengerStats::add(&self.stats.handshakes_sent, 1);
        }

        info!(
            conversation = %session.id.short(),
            members = session.participants.len(),
            "Conversation opened"
        );
        Ok(session)
    }

    /// Close a conversation locally.
    pub async fn close_session(&self, conversation: &ConversationId) -> Result<()> {
        Ok(self.sessions.close_session(conversation).await?)
    }

    // ========================================================================
    // Send
    // ========================================================================

    /// Encrypt `plaintext` for every other member of `conversation`.
    ///
    /// Returns one envelope id per recipient.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a TTL outside `1..=envelope.maxTtlSecs`
    /// - `DeadlineExceeded` if `options.deadline` passes first
    /// - session, routing, and storage errors from the layers below
    pub async fn send(
        &self,
        conversation: &ConversationId,
        plaintext: &[u8],
        options: SendOptions,
    ) -> Result<Vec<EnvelopeId>> {
        let ttl = options
            .ttl_secs
            .unwrap_or_else(|| self.config.default_ttl_secs());
        if ttl <= 0 || ttl > self.config.envelope.max_ttl_secs {
            return Err(CoreError::InvalidArgument(format!(
                "ttl {} outside 1..={}",
                ttl, self.config.envelope.max_ttl_secs
            )));
        }

        match options.deadline {
            None => self.send_inner(conversation, plaintext, ttl, None).await,
            Some(limit) => {
                let deadline = Instant::now() + limit;
                tokio::time::timeout_at(
                    deadline,
                    self.send_inner(conversation, plaintext, ttl, Some(deadline)),
                )
                .await
                .map_err(|_| CoreError::DeadlineExceeded)?
            }
        }
    }

    async fn send_inner(
        &self,
        conversation: &ConversationId,
        plaintext: &[u8],
        ttl: i64,
        deadline: Option<Instant>,
    ) -> Result<Vec<EnvelopeId>> {
        check_deadline(deadline)?;
        let session = self.sessions.get_session(conversation).await?;
        let ciphertext = self.track(self.sessions.seal(conversation, plaintext).await)?;
        let payload = Payload::Sealed {
            conversation: *conversation,
            ciphertext,
        }
        .encode()?;

        let local = self.session_id();
        let mut sent = Vec::with_capacity(session.participants.len().saturating_sub(1));
        for peer in session.peers(&local) {
            check_deadline(deadline)?;
            let envelope = self
                .build_envelope(conversation, peer.session_id, payload.clone(), ttl)
                .await?;
            let id = envelope.id();
            self.route(envelope).await?;
            MessengerStats::add(&self.stats.envelopes_sent, 1);
            sent.push(id);
        }

        debug!(
            conversation = %conversation.short(),
            envelopes = sent.len(),
            "Message sent"
        );
        Ok(sent)
    }

    async fn build_envelope(
        &self,
        conversation: &ConversationId,
        recipient: SessionId,
        payload: Vec<u8>,
        ttl: i64,
    ) -> Result<MessageEnvelope> {
        let sender = self.session_id();
        let timestamp = self.clock.now();
        let signature = self.track(self.identities.sign(
            &self.local,
            &signing_payload(&sender, &recipient, &payload, timestamp),
        ))?;
        let envelope = self
            .sessions
            .send_message(
                conversation,
                &sender,
                SealedMessage {
                    recipient,
                    ciphertext: payload,
                    signature: signature.as_bytes().to_vec(),
                    timestamp,
                    ttl,
                },
            )
            .await?;
        self.router.codec().check(&envelope)?;
        Ok(envelope)
    }

    async fn route(&self, envelope: MessageEnvelope) -> Result<()> {
        if !self.config.onion.enabled {
            commit_envelope(&self.storage, self.router.codec(), &envelope, self.clock.now())
                .await?;
            return Ok(());
        }

        let candidates = self.transport.relays().await;
        let hop_count = self.config.onion.hop_count;
        let path = self.selector.select(
            &candidates,
            hop_count,
            envelope.sender(),
            envelope.recipient(),
        )?;
        validate_selection(&path, hop_count, envelope.sender(), envelope.recipient())?;
        let packet = self.track(self.router.wrap_for_path(&envelope, &path))?;
        debug!(
            envelope_id = %envelope.id().short(),
            hops = path.len(),
            bytes = packet.len(),
            "Envelope wrapped"
        );
        self.transport.deliver(&path[0].address, packet).await
    }

    // ========================================================================
    // Receive
    // ========================================================================

    /// Drain the local mailbox.
    pub async fn receive(&self) -> Result<ReceiveOutcome> {
        let local = self.session_id();
        let records = self.storage.scan_prefix(&mailbox_prefix(&local)).await;
        let mut outcome = ReceiveOutcome::default();
        if records.is_empty() {
            return Ok(outcome);
        }

        let mut decoded = Vec::with_capacity(records.len());
        for (key, bytes) in records {
            match self.router.codec().decode(&bytes) {
                Ok(envelope) => decoded.push((key, envelope)),
                Err(e) => {
                    self.storage.delete(&key).await?;
                    self.reject(&mut outcome, &key, None, e.into(), false);
                }
            }
        }
        decoded.sort_by_key(|(_, envelope)| {
            (!is_handshake(envelope), envelope.timestamp(), envelope.id())
        });

        for (key, envelope) in decoded {
            match self.open_envelope(&envelope).await {
                Ok(Opened::Message(message)) => {
                    self.storage.delete(&key).await?;
                    MessengerStats::add(&self.stats.messages_received, 1);
                    outcome.messages.push(message);
                }
                Ok(Opened::Accepted(conversation)) => {
                    self.storage.delete(&key).await?;
                    MessengerStats::add(&self.stats.sessions_accepted, 1);
                    outcome.sessions_accepted.push(conversation);
                }
                Err(e) => {
                    let retained = is_recoverable(&e);
                    if !retained {
                        self.storage.delete(&key).await?;
                    }
                    self.reject(&mut outcome, &key, Some(envelope.id()), e, retained);
                }
            }
        }

        debug!(
            messages = outcome.messages.len(),
            accepted = outcome.sessions_accepted.len(),
            rejected = outcome.rejected.len(),
            "Mailbox drained"
        );
        Ok(outcome)
    }

    fn reject(
        &self,
        outcome: &mut ReceiveOutcome,
        key: &[u8],
        envelope_id: Option<EnvelopeId>,
        error: CoreError,
        retained: bool,
    ) {
        if error.kind().is_authentication_failure() {
            MessengerStats::add(&self.stats.authentication_failures, 1);
            warn!(key = %display_key(key), error = %error, "Envelope failed authentication");
        } else if retained {
            debug!(key = %display_key(key), error = %error, "Envelope kept for a later receive");
        } else {
            warn!(key = %display_key(key), error = %error, "Envelope rejected");
        }
        MessengerStats::add(&self.stats.envelopes_rejected, 1);
        outcome.rejected.push(RejectedEnvelope {
            key: display_key(key),
            envelope_id,
            error,
            retained,
        });
    }

    /// Feed the result of a crypto provider call into the failure counter.
    ///
    /// Success resets the count; a `CryptoFailure` extends it. Other errors,
    /// authentication failures included, leave it alone.
    fn track<T, E>(&self, result: std::result::Result<T, E>) -> Result<T>
    where
        E: Into<CoreError>,
    {
        match result {
            Ok(value) => {
                self.crypto_failures.store(0, Ordering::Release);
                Ok(value)
            }
            Err(e) => {
                let error: CoreError = e.into();
                if error.kind() == ErrorKind::CryptoFailure {
                    let failures = self.crypto_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    warn!(
                        error = %error,
                        consecutive_failures = failures,
                        "Crypto provider call failed"
                    );
                }
                Err(error)
            }
        }
    }

    async fn open_envelope(&self, envelope: &MessageEnvelope) -> Result<Opened> {
        let local = self.session_id();
        if *envelope.recipient() != local {
            return Err(ProtocolError::InvalidParticipant(format!(
                "envelope addressed to {}",
                envelope.recipient().short()
            ))
            .into());
        }

        let sender = self.contact(envelope.sender()).await?;
        self.track(self.router.codec().validate(
            envelope,
            &sender.signing_public,
            self.identities.provider().as_ref(),
        ))?;

        match Payload::decode(envelope.ciphertext())? {
            Payload::Handshake(exchange) => {
                if exchange.initiator != sender.session_id {
                    return Err(ProtocolError::InvalidKeyExchange(
                        "handshake signed by someone other than its initiator".into(),
                    )
                    .into());
                }
                let session = self.track(self.sessions.accept_session(&exchange).await)?;
                info!(
                    conversation = %session.id.short(),
                    initiator = %sender.session_id.short(),
                    "Handshake accepted"
                );
                Ok(Opened::Accepted(session.id))
            }
            Payload::Sealed {
                conversation,
                ciphertext,
            } => {
                let session = self.sessions.get_session(&conversation).await?;
                if !session.has_participant(&sender.session_id) {
                    return Err(ProtocolError::InvalidParticipant(format!(
                        "sender {} is not a member",
                        sender.session_id.short()
                    ))
                    .into());
                }
                let plaintext = self.track(self.sessions.open(&conversation, &ciphertext).await)?;
                Ok(Opened::Message(ReceivedMessage {
                    envelope_id: envelope.id(),
                    conversation,
                    sender: sender.session_id,
                    plaintext,
                    timestamp: envelope.timestamp(),
                }))
            }
        }
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Crypto provider failures since the last successful provider call.
    pub fn consecutive_crypto_failures(&self) -> u32 {
        self.crypto_failures.load(Ordering::Acquire)
    }

    /// Whether provider failures have reached the configured threshold.
    pub fn is_degraded(&self) -> bool {
        self.consecutive_crypto_failures() >= self.config.crypto_failure_threshold
    }
}

impl std::fmt::Debug for Messenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Messenger")
            .field("session_id", &self.session_id().short())
            .field("onion", &self.config.onion.enabled)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn is_handshake(envelope: &MessageEnvelope) -> bool {
    envelope.ciphertext().first() == Some(&crate::payload::MODE_HANDSHAKE)
}

/// Failures a later receive can resolve: the sender is not registered yet,
/// or the session its message belongs to has not been installed.
fn is_recoverable(error: &CoreError) -> bool {
    matches!(error, CoreError::UnknownContact(_))
        || matches!(error.kind(), ErrorKind::NotFound | ErrorKind::SessionPending)
}

fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(at) if Instant::now() >= at => Err(CoreError::DeadlineExceeded),
        _ => Ok(()),
    }
}
