//! Session Manager.
//!
//! Owns every session the local identity takes part in, along with the
//! session keys. Keys never leave this type: callers seal and open payloads
//! through it.
//!
//! ## Locking
//!
//! The registry lock is held only to look up or insert a session handle.
//! Each session has its own `tokio::sync::Mutex`, and every status
//! transition and send check happens under it, so a send that starts after
//! a close has been observed always fails with `SessionClosed`.

use std::collections::HashMap;
use std::sync::Arc;

use pars_crypto::{CryptoError, Hash256, KemPublicKey, SymmetricKey, KEY_SIZE};
use pars_identity::{Identity, IdentityManager, SessionId};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use super::exchange::{KeyExchange, KeyShare};
use super::types::{
    participant_set_digest, ConversationId, Participant, SealedMessage, Session, SessionStats,
    SessionStatus,
};
use crate::domain_separation::kdf;
use crate::envelope::MessageEnvelope;
use crate::limits::{DEFAULT_SESSION_TTL_SECS, MAX_PARTICIPANTS};
use crate::time::Clock;
use crate::{ProtocolError, Result};

/// Session Manager configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Lifetime of a session before it must be rekeyed.
    pub session_ttl_secs: u64,
    /// Largest participant set accepted.
    pub max_participants: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            max_participants: MAX_PARTICIPANTS,
        }
    }
}

struct SessionEntry {
    id: ConversationId,
    participants: Vec<Participant>,
    status: SessionStatus,
    created_at: u64,
    expires_at: u64,
    generation: u32,
    initiator: SessionId,
    key: Option<SymmetricKey>,
    shares: Vec<KeyShare>,
}

impl SessionEntry {
    /// Apply expiry, then report the status.
    fn refresh(&mut self, now: u64) -> SessionStatus {
        if self.status != SessionStatus::Closed && now >= self.expires_at {
            debug!(conversation = %self.id.short(), "Session expired");
            self.close();
        }
        self.status
    }

    fn close(&mut self) {
        self.status = SessionStatus::Closed;
        // Dropping the key zeroizes it.
        self.key = None;
        self.shares.clear();
    }

    fn has_participant(&self, id: &SessionId) -> bool {
        self.participants.iter().any(|p| &p.session_id == id)
    }

    fn snapshot(&self) -> Session {
        Session {
            id: self.id,
            participants: self.participants.clone(),
            status: self.status,
            created_at: self.created_at,
            expires_at: self.expires_at,
            generation: self.generation,
        }
    }

    fn active_key(&self) -> Result<&SymmetricKey> {
        match (self.status, &self.key) {
            (SessionStatus::Closed, _) => Err(ProtocolError::SessionClosed(self.id.to_hex())),
            (SessionStatus::Active, Some(key)) => Ok(key),
            _ => Err(ProtocolError::SessionPending(self.id.to_hex())),
        }
    }
}

type EntryHandle = Arc<Mutex<SessionEntry>>;

#[derive(Default)]
struct Registry {
    sessions: HashMap<ConversationId, EntryHandle>,
    /// Newest conversation for each participant set.
    latest: HashMap<Hash256, ConversationId>,
}

/// Creates, tracks, and closes sessions for one local identity.
pub struct SessionManager {
    identities: IdentityManager,
    local: Arc<Identity>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    registry: RwLock<Registry>,
}

impl SessionManager {
    /// Create a manager acting for `local`.
    pub fn new(
        identities: IdentityManager,
        local: Arc<Identity>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            identities,
            local,
            clock,
            config,
            registry: RwLock::new(Registry::default()),
        }
    }

    /// The local identity's address.
    pub fn local_id(&self) -> SessionId {
        self.local.session_id()
    }

    async fn entry(&self, id: &ConversationId) -> Result<EntryHandle> {
        self.registry
            .read()
            .await
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| ProtocolError::NotFound(id.to_hex()))
    }

    fn validate_participants(
        &self,
        participant_ids: &[SessionId],
        kem_public_keys: &[KemPublicKey],
    ) -> Result<Vec<Participant>> {
        if participant_ids.len() != kem_public_keys.len() {
            return Err(ProtocolError::InvalidParticipant(format!(
                "{} ids but {} keys",
                participant_ids.len(),
                kem_public_keys.len()
            )));
        }
        if participant_ids.len() < 2 {
            return Err(ProtocolError::InvalidParticipant(
                "a session needs at least two participants".into(),
            ));
        }
        if participant_ids.len() > self.config.max_participants {
            return Err(ProtocolError::InvalidParticipant(format!(
                "{} participants exceeds maximum {}",
                participant_ids.len(),
                self.config.max_participants
            )));
        }

        let provider = self.identities.provider();
        let local_id = self.local_id();
        let mut participants = Vec::with_capacity(participant_ids.len());
        for (id, key) in participant_ids.iter().zip(kem_public_keys) {
            id.ensure_prefix(self.identities.prefix())
                .map_err(|e| ProtocolError::InvalidParticipant(format!("{}: {}", id.short(), e)))?;
            provider
                .check_kem_public_key(key)
                .map_err(|e| ProtocolError::InvalidParticipant(format!("{}: {}", id.short(), e)))?;
            if *id == local_id && key != self.local.kem_public() {
                return Err(ProtocolError::InvalidParticipant(
                    "key supplied for the local identity is not its own".into(),
                ));
            }
            participants.push(Participant {
                session_id: *id,
                kem_public: key.clone(),
            });
        }

        participants.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        if participants
            .windows(2)
            .any(|w| w[0].session_id == w[1].session_id)
        {
            return Err(ProtocolError::InvalidParticipant(
                "duplicate participant".into(),
            ));
        }
        Ok(participants)
    }

    /// Create a session between the given participants.
    ///
    /// With two participants of which one is the local identity, the peer's
    /// share is encapsulated immediately and the session starts `Active`.
    /// Otherwise it starts `Pending`. If a live session already exists for
    /// the same participant set it is returned unchanged; after that session
    /// closes the next generation is created instead.
    ///
    /// # Errors
    ///
    /// - `InvalidParticipant` for unparseable ids, bad keys, duplicates, or
    ///   mismatched list lengths
    /// - `Crypto` if encapsulation fails
    pub async fn create_session(
        &self,
        participant_ids: &[SessionId],
        kem_public_keys: &[KemPublicKey],
    ) -> Result<Session> {
        let participants = self.validate_participants(participant_ids, kem_public_keys)?;
        let sorted_ids: Vec<SessionId> = participants.iter().map(|p| p.session_id).collect();
        let set = participant_set_digest(&sorted_ids);
        let now = self.clock.now();

        let mut registry = self.registry.write().await;

        let mut generation = 0;
        if let Some(previous) = registry.latest.get(&set).copied() {
            if let Some(handle) = registry.sessions.get(&previous).cloned() {
                let mut entry = handle.lock().await;
                if entry.refresh(now) != SessionStatus::Closed {
                    debug!(conversation = %previous.short(), "Reusing live session");
                    return Ok(entry.snapshot());
                }
                generation = entry.generation.saturating_add(1);
            }
        }

        let id = ConversationId::derive(&sorted_ids, generation);
        let local_id = self.local_id();
        let mut entry = SessionEntry {
            id,
            participants,
            status: SessionStatus::Pending,
            created_at: now,
            expires_at: now.saturating_add(self.config.session_ttl_secs),
            generation,
            initiator: local_id,
            key: None,
            shares: Vec::new(),
        };

        if entry.participants.len() == 2 && entry.has_participant(&local_id) {
            let peer = entry
                .participants
                .iter()
                .find(|p| p.session_id != local_id)
                .cloned()
                .ok_or_else(|| ProtocolError::InvalidParticipant("no peer".into()))?;
            let (shared, ciphertext) = self.identities.provider().encapsulate(&peer.kem_public)?;
            entry.key = Some(shared.derive_key(kdf::SESSION_KEY, id.as_bytes()));
            entry.shares.push(KeyShare {
                recipient: peer.session_id,
                kem_ciphertext: ciphertext,
                wrapped_key: None,
            });
            entry.status = SessionStatus::Active;
        }

        let snapshot = entry.snapshot();
        registry.sessions.insert(id, Arc::new(Mutex::new(entry)));
        registry.latest.insert(set, id);

        info!(
            conversation = %id.short(),
            participants = snapshot.participants.len(),
            generation,
            status = %snapshot.status,
            "Session created"
        );
        Ok(snapshot)
    }

    /// Generate a group key for a `Pending` session and wrap it for every
    /// other participant. The session becomes `Active`.
    pub async fn establish_group_key(&self, id: &ConversationId) -> Result<Session> {
        let handle = self.entry(id).await?;
        let mut entry = handle.lock().await;
        match entry.refresh(self.clock.now()) {
            SessionStatus::Closed => return Err(ProtocolError::SessionClosed(id.to_hex())),
            SessionStatus::Active => return Ok(entry.snapshot()),
            SessionStatus::Pending => {}
        }

        let local_id = self.local_id();
        if !entry.has_participant(&local_id) {
            return Err(ProtocolError::InvalidParticipant(
                "local identity is not a participant".into(),
            ));
        }

        let provider = self.identities.provider();
        let mut group_key = [0u8; KEY_SIZE];
        provider.random_bytes(&mut group_key)?;
        let key = SymmetricKey::from_array(group_key);
        group_key.zeroize();

        let mut shares = Vec::with_capacity(entry.participants.len() - 1);
        for peer in entry.participants.iter().filter(|p| p.session_id != local_id) {
            let (shared, ciphertext) = provider.encapsulate(&peer.kem_public)?;
            let wrap_key = shared.derive_key(kdf::GROUP_KEY_WRAP, id.as_bytes());
            let wrapped = provider.aead_encrypt(&wrap_key, key.as_bytes(), id.as_bytes())?;
            shares.push(KeyShare {
                recipient: peer.session_id,
                kem_ciphertext: ciphertext,
                wrapped_key: Some(wrapped),
            });
        }

        entry.key = Some(key);
        entry.shares = shares;
        entry.initiator = local_id;
        entry.status = SessionStatus::Active;
        info!(conversation = %id.short(), members = entry.participants.len(), "Group key established");
        Ok(entry.snapshot())
    }

    /// Key exchange messages for every peer that needs one.
    pub async fn key_exchanges(&self, id: &ConversationId) -> Result<Vec<KeyExchange>> {
        let handle = self.entry(id).await?;
        let mut entry = handle.lock().await;
        entry.refresh(self.clock.now());
        entry.active_key()?;
        Ok(entry
            .shares
            .iter()
            .map(|share| KeyExchange {
                conversation_id: entry.id,
                generation: entry.generation,
                initiator: entry.initiator,
                participants: entry.participants.clone(),
                share: share.clone(),
            })
            .collect())
    }

    /// Install a session from a peer's key exchange.
    ///
    /// # Errors
    ///
    /// - `InvalidKeyExchange` if the exchange is inconsistent or not for us
    /// - `SessionClosed` if the conversation was already closed locally
    /// - `DecryptionFailed` if the share does not open with our key
    pub async fn accept_session(&self, exchange: &KeyExchange) -> Result<Session> {
        let local_id = self.local_id();
        if exchange.share.recipient != local_id {
            return Err(ProtocolError::InvalidKeyExchange(
                "share is addressed to another identity".into(),
            ));
        }
        let ids: Vec<SessionId> = exchange
            .participants
            .iter()
            .map(|p| p.session_id)
            .collect();
        let keys: Vec<KemPublicKey> = exchange
            .participants
            .iter()
            .map(|p| p.kem_public.clone())
            .collect();
        let participants = self.validate_participants(&ids, &keys)?;
        let sorted_ids: Vec<SessionId> = participants.iter().map(|p| p.session_id).collect();

        if !sorted_ids.contains(&exchange.initiator) || !sorted_ids.contains(&local_id) {
            return Err(ProtocolError::InvalidKeyExchange(
                "initiator or recipient missing from participants".into(),
            ));
        }
        let id = ConversationId::derive(&sorted_ids, exchange.generation);
        if id != exchange.conversation_id {
            return Err(ProtocolError::InvalidKeyExchange(
                "conversation id does not match participants".into(),
            ));
        }

        let key = self.recover_key(&id, &exchange.share)?;
        let now = self.clock.now();
        let set = participant_set_digest(&sorted_ids);

        let mut registry = self.registry.write().await;
        if let Some(handle) = registry.sessions.get(&id).cloned() {
            let mut entry = handle.lock().await;
            match entry.refresh(now) {
                SessionStatus::Closed => return Err(ProtocolError::SessionClosed(id.to_hex())),
                SessionStatus::Active => return Ok(entry.snapshot()),
                SessionStatus::Pending => {
                    entry.key = Some(key);
                    entry.initiator = exchange.initiator;
                    entry.status = SessionStatus::Active;
                    return Ok(entry.snapshot());
                }
            }
        }

        let entry = SessionEntry {
            id,
            participants,
            status: SessionStatus::Active,
            created_at: now,
            expires_at: now.saturating_add(self.config.session_ttl_secs),
            generation: exchange.generation,
            initiator: exchange.initiator,
            key: Some(key),
            shares: Vec::new(),
        };
        let snapshot = entry.snapshot();
        registry.sessions.insert(id, Arc::new(Mutex::new(entry)));

        let newer = match registry.latest.get(&set) {
            Some(current) => match registry.sessions.get(current) {
                Some(handle) => handle.lock().await.generation <= exchange.generation,
                None => true,
            },
            None => true,
        };
        if newer {
            registry.latest.insert(set, id);
        }

        info!(
            conversation = %id.short(),
            initiator = %exchange.initiator.short(),
            generation = exchange.generation,
            "Session accepted"
        );
        Ok(snapshot)
    }

    fn recover_key(&self, id: &ConversationId, share: &KeyShare) -> Result<SymmetricKey> {
        let shared = self
            .identities
            .decapsulate(&self.local, &share.kem_ciphertext)
            .map_err(|e| {
                warn!(conversation = %id.short(), error = %e, "Key share rejected");
                ProtocolError::DecryptionFailed
            })?;
        match &share.wrapped_key {
            None => Ok(shared.derive_key(kdf::SESSION_KEY, id.as_bytes())),
            Some(wrapped) => {
                let wrap_key = shared.derive_key(kdf::GROUP_KEY_WRAP, id.as_bytes());
                let mut raw = self
                    .identities
                    .provider()
                    .aead_decrypt(&wrap_key, wrapped, id.as_bytes())
                    .map_err(|_| ProtocolError::DecryptionFailed)?;
                let key = SymmetricKey::from_bytes(&raw);
                raw.zeroize();
                Ok(key?)
            }
        }
    }

    /// Snapshot of a session.
    ///
    /// A session past its expiry reads as `Closed` until purged.
    pub async fn get_session(&self, id: &ConversationId) -> Result<Session> {
        let handle = self.entry(id).await?;
        let mut entry = handle.lock().await;
        entry.refresh(self.clock.now());
        Ok(entry.snapshot())
    }

    /// Close a session. Closing an already closed session succeeds.
    pub async fn close_session(&self, id: &ConversationId) -> Result<()> {
        let handle = self.entry(id).await?;
        let mut entry = handle.lock().await;
        if entry.status != SessionStatus::Closed {
            entry.close();
            info!(conversation = %id.short(), "Session closed");
        }
        Ok(())
    }

    /// Close a session and create the next generation for the same members.
    pub async fn rekey_session(&self, id: &ConversationId) -> Result<Session> {
        let previous = self.get_session(id).await?;
        self.close_session(id).await?;
        let ids: Vec<SessionId> = previous
            .participants
            .iter()
            .map(|p| p.session_id)
            .collect();
        let keys: Vec<KemPublicKey> = previous
            .participants
            .iter()
            .map(|p| p.kem_public.clone())
            .collect();
        let session = self.create_session(&ids, &keys).await?;
        if session.status == SessionStatus::Pending && session.participants.len() > 2 {
            return self.establish_group_key(&session.id).await;
        }
        Ok(session)
    }

    /// Build an envelope for a message in an active session.
    ///
    /// Status and membership are checked under the session lock. No crypto is
    /// performed here; `message` arrives already encrypted and signed.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the session does not exist
    /// - `SessionClosed` if it is closed or expired
    /// - `SessionPending` if no key has been established
    /// - `InvalidParticipant` if sender or recipient is not a member
    pub async fn send_message(
        &self,
        id: &ConversationId,
        sender: &SessionId,
        message: SealedMessage,
    ) -> Result<MessageEnvelope> {
        let handle = self.entry(id).await?;
        let mut entry = handle.lock().await;
        entry.refresh(self.clock.now());
        entry.active_key()?;

        if !entry.has_participant(sender) {
            return Err(ProtocolError::InvalidParticipant(format!(
                "sender {} is not a member",
                sender.short()
            )));
        }
        if !entry.has_participant(&message.recipient) || &message.recipient == sender {
            return Err(ProtocolError::InvalidParticipant(format!(
                "recipient {} is not a peer in this session",
                message.recipient.short()
            )));
        }

        let envelope = MessageEnvelope::new(
            *sender,
            message.recipient,
            message.ciphertext,
            message.signature,
            message.timestamp,
            message.ttl,
        );
        debug!(
            conversation = %id.short(),
            envelope_id = %envelope.id().short(),
            "Envelope built"
        );
        Ok(envelope)
    }

    /// Encrypt a payload under the session key.
    pub async fn seal(&self, id: &ConversationId, plaintext: &[u8]) -> Result<Vec<u8>> {
        let handle = self.entry(id).await?;
        let mut entry = handle.lock().await;
        entry.refresh(self.clock.now());
        let key = entry.active_key()?;
        Ok(self
            .identities
            .provider()
            .aead_encrypt(key, plaintext, id.as_bytes())?)
    }

    /// Decrypt a payload sealed under the session key.
    ///
    /// # Errors
    ///
    /// `DecryptionFailed` on any authentication failure.
    pub async fn open(&self, id: &ConversationId, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let handle = self.entry(id).await?;
        let mut entry = handle.lock().await;
        entry.refresh(self.clock.now());
        let key = entry.active_key()?;
        self.identities
            .provider()
            .aead_decrypt(key, ciphertext, id.as_bytes())
            .map_err(|e| match e {
                CryptoError::Decryption => ProtocolError::DecryptionFailed,
                other => ProtocolError::Crypto(other),
            })
    }

    /// Drop sessions whose expiry has passed. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut registry = self.registry.write().await;
        let mut expired = Vec::new();
        for (id, handle) in &registry.sessions {
            if now >= handle.lock().await.expires_at {
                expired.push(*id);
            }
        }
        for id in &expired {
            registry.sessions.remove(id);
        }
        registry.latest.retain(|_, id| !expired.contains(id));
        if !expired.is_empty() {
            info!(count = expired.len(), "Purged expired sessions");
        }
        expired.len()
    }

    /// Session counts by status.
    pub async fn stats(&self) -> SessionStats {
        let now = self.clock.now();
        let handles: Vec<EntryHandle> = self.registry.read().await.sessions.values().cloned().collect();
        let mut stats = SessionStats::default();
        for handle in handles {
            match handle.lock().await.refresh(now) {
                SessionStatus::Pending => stats.pending += 1,
                SessionStatus::Active => stats.active += 1,
                SessionStatus::Closed => stats.closed += 1,
            }
        }
        stats
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("local", &self.local.session_id())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use pars_crypto::{CryptoProvider, Curve25519Provider};

    const START: u64 = 1_700_000_000;

    struct Party {
        identity: Arc<Identity>,
        sessions: SessionManager,
    }

    fn setup(count: usize) -> (Vec<Party>, Arc<ManualClock>) {
        let provider: Arc<dyn CryptoProvider> = Arc::new(Curve25519Provider::from_seed([11u8; 32]));
        let identities = IdentityManager::new(provider, 0x07);
        let clock = Arc::new(ManualClock::new(START));
        let parties = (0..count)
            .map(|_| {
                let identity = Arc::new(identities.generate_identity().unwrap());
                let sessions = SessionManager::new(
                    identities.clone(),
                    identity.clone(),
                    clock.clone(),
                    SessionConfig {
                        session_ttl_secs: 3_600,
                        ..SessionConfig::default()
                    },
                );
                Party { identity, sessions }
            })
            .collect();
        (parties, clock)
    }

    fn members(parties: &[Party]) -> (Vec<SessionId>, Vec<KemPublicKey>) {
        (
            parties.iter().map(|p| p.identity.session_id()).collect(),
            parties
                .iter()
                .map(|p| p.identity.kem_public().clone())
                .collect(),
        )
    }

    fn sealed(to: &Party) -> SealedMessage {
        SealedMessage {
            recipient: to.identity.session_id(),
            ciphertext: vec![1, 2, 3],
            signature: vec![4; 64],
            timestamp: START,
            ttl: 60,
        }
    }

    #[tokio::test]
    async fn test_two_party_session_is_active() {
        let (parties, _) = setup(2);
        let (ids, keys) = members(&parties);
        let session = parties[0].sessions.create_session(&ids, &keys).await.unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.generation, 0);
        assert!(session.has_participant(&ids[1]));
        assert_eq!(session.expires_at, START + 3_600);
    }

    #[tokio::test]
    async fn test_create_is_idempotent_for_live_session() {
        let (parties, _) = setup(2);
        let (ids, keys) = members(&parties);
        let first = parties[0].sessions.create_session(&ids, &keys).await.unwrap();
        let reversed_ids: Vec<_> = ids.iter().rev().copied().collect();
        let reversed_keys: Vec<_> = keys.iter().rev().cloned().collect();
        let second = parties[0]
            .sessions
            .create_session(&reversed_ids, &reversed_keys)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_recreate_after_close_uses_next_generation() {
        let (parties, _) = setup(2);
        let (ids, keys) = members(&parties);
        let first = parties[0].sessions.create_session(&ids, &keys).await.unwrap();
        parties[0].sessions.close_session(&first.id).await.unwrap();
        let second = parties[0].sessions.create_session(&ids, &keys).await.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.generation, 1);
        assert_eq!(second.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_invalid_participants_rejected() {
        let (parties, _) = setup(2);
        let (ids, keys) = members(&parties);
        let sm = &parties[0].sessions;

        let err = sm.create_session(&ids[..1], &keys[..1]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParticipant(_)));

        let err = sm.create_session(&ids, &keys[..1]).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParticipant(_)));

        let dup_ids = vec![ids[1], ids[1]];
        let dup_keys = vec![keys[1].clone(), keys[1].clone()];
        let err = sm.create_session(&dup_ids, &dup_keys).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParticipant(_)));

        let bad_keys = vec![keys[0].clone(), KemPublicKey::from_bytes(vec![0u8; 7])];
        let err = sm.create_session(&ids, &bad_keys).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParticipant(_)));

        let legacy = SessionId::derive(0x05, keys[1].as_bytes(), b"sig");
        let err = sm
            .create_session(&[ids[0], legacy], &keys)
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidParticipant(_)));
    }

    #[tokio::test]
    async fn test_unknown_session_not_found() {
        let (parties, _) = setup(2);
        let missing = ConversationId::derive(&[parties[0].identity.session_id()], 9);
        assert!(matches!(
            parties[0].sessions.get_session(&missing).await,
            Err(ProtocolError::NotFound(_))
        ));
        assert!(matches!(
            parties[0].sessions.close_session(&missing).await,
            Err(ProtocolError::NotFound(_))
        ));
        assert!(matches!(
            parties[0]
                .sessions
                .send_message(&missing, &parties[0].identity.session_id(), sealed(&parties[1]))
                .await,
            Err(ProtocolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_then_send_fails_and_close_is_idempotent() {
        let (parties, _) = setup(2);
        let (ids, keys) = members(&parties);
        let sm = &parties[0].sessions;
        let session = sm.create_session(&ids, &keys).await.unwrap();
        let sender = parties[0].identity.session_id();

        assert!(sm
            .send_message(&session.id, &sender, sealed(&parties[1]))
            .await
            .is_ok());

        sm.close_session(&session.id).await.unwrap();
        sm.close_session(&session.id).await.unwrap();

        assert!(matches!(
            sm.send_message(&session.id, &sender, sealed(&parties[1])).await,
            Err(ProtocolError::SessionClosed(_))
        ));
        assert!(matches!(
            sm.seal(&session.id, b"late").await,
            Err(ProtocolError::SessionClosed(_))
        ));
        assert_eq!(
            sm.get_session(&session.id).await.unwrap().status,
            SessionStatus::Closed
        );
    }

    #[tokio::test]
    async fn test_send_checks_membership() {
        let (parties, _) = setup(3);
        let (ids, keys) = members(&parties[..2]);
        let sm = &parties[0].sessions;
        let session = sm.create_session(&ids, &keys).await.unwrap();

        let outsider = parties[2].identity.session_id();
        assert!(matches!(
            sm.send_message(&session.id, &outsider, sealed(&parties[1])).await,
            Err(ProtocolError::InvalidParticipant(_))
        ));
        assert!(matches!(
            sm.send_message(&session.id, &ids[0], sealed(&parties[2])).await,
            Err(ProtocolError::InvalidParticipant(_))
        ));
        assert!(matches!(
            sm.send_message(&session.id, &ids[0], sealed(&parties[0])).await,
            Err(ProtocolError::InvalidParticipant(_))
        ));
    }

    #[tokio::test]
    async fn test_send_builds_envelope() {
        let (parties, _) = setup(2);
        let (ids, keys) = members(&parties);
        let sm = &parties[0].sessions;
        let session = sm.create_session(&ids, &keys).await.unwrap();
        let env = sm
            .send_message(&session.id, &ids[0], sealed(&parties[1]))
            .await
            .unwrap();
        assert_eq!(env.sender(), &ids[0]);
        assert_eq!(env.recipient(), &ids[1]);
        assert_eq!(env.ciphertext(), &[1, 2, 3]);
        assert_eq!(env.ttl(), 60);
    }

    #[tokio::test]
    async fn test_key_exchange_activates_responder() {
        let (parties, _) = setup(2);
        let (ids, keys) = members(&parties);
        let session = parties[0].sessions.create_session(&ids, &keys).await.unwrap();

        let exchanges = parties[0].sessions.key_exchanges(&session.id).await.unwrap();
        assert_eq!(exchanges.len(), 1);
        let wire = exchanges[0].to_bytes().unwrap();
        let exchange = KeyExchange::from_bytes(&wire).unwrap();

        let accepted = parties[1].sessions.accept_session(&exchange).await.unwrap();
        assert_eq!(accepted.id, session.id);
        assert_eq!(accepted.status, SessionStatus::Active);

        let sealed = parties[0].sessions.seal(&session.id, b"hello bob").await.unwrap();
        let opened = parties[1].sessions.open(&session.id, &sealed).await.unwrap();
        assert_eq!(opened, b"hello bob");

        let reply = parties[1].sessions.seal(&session.id, b"hi alice").await.unwrap();
        assert_eq!(
            parties[0].sessions.open(&session.id, &reply).await.unwrap(),
            b"hi alice"
        );

        // Accepting twice is a no-op.
        assert!(parties[1].sessions.accept_session(&exchange).await.is_ok());
    }

    #[tokio::test]
    async fn test_accept_rejects_exchange_for_someone_else() {
        let (parties, _) = setup(3);
        let (ids, keys) = members(&parties[..2]);
        let session = parties[0].sessions.create_session(&ids, &keys).await.unwrap();
        let exchange = parties[0]
            .sessions
            .key_exchanges(&session.id)
            .await
            .unwrap()
            .remove(0);
        assert!(matches!(
            parties[2].sessions.accept_session(&exchange).await,
            Err(ProtocolError::InvalidKeyExchange(_))
        ));
    }

    #[tokio::test]
    async fn test_accept_rejects_mismatched_conversation_id() {
        let (parties, _) = setup(2);
        let (ids, keys) = members(&parties);
        let session = parties[0].sessions.create_session(&ids, &keys).await.unwrap();
        let mut exchange = parties[0]
            .sessions
            .key_exchanges(&session.id)
            .await
            .unwrap()
            .remove(0);
        exchange.generation = 5;
        assert!(matches!(
            parties[1].sessions.accept_session(&exchange).await,
            Err(ProtocolError::InvalidKeyExchange(_))
        ));
    }

    #[tokio::test]
    async fn test_open_rejects_tampering() {
        let (parties, _) = setup(2);
        let (ids, keys) = members(&parties);
        let sm = &parties[0].sessions;
        let session = sm.create_session(&ids, &keys).await.unwrap();
        let mut sealed = sm.seal(&session.id, b"payload").await.unwrap();
        sealed[30] ^= 0x40;
        assert!(matches!(
            sm.open(&session.id, &sealed).await,
            Err(ProtocolError::DecryptionFailed)
        ));
    }

    #[tokio::test]
    async fn test_group_session_key_distribution() {
        let (parties, _) = setup(4);
        let (ids, keys) = members(&parties);
        let pending = parties[0].sessions.create_session(&ids, &keys).await.unwrap();
        assert_eq!(pending.status, SessionStatus::Pending);
        assert!(matches!(
            parties[0].sessions.seal(&pending.id, b"x").await,
            Err(ProtocolError::SessionPending(_))
        ));

        let active = parties[0]
            .sessions
            .establish_group_key(&pending.id)
            .await
            .unwrap();
        assert_eq!(active.status, SessionStatus::Active);

        let exchanges = parties[0].sessions.key_exchanges(&active.id).await.unwrap();
        assert_eq!(exchanges.len(), 3);

        let sealed = parties[0].sessions.seal(&active.id, b"to all").await.unwrap();
        for exchange in &exchanges {
            let member = parties
                .iter()
                .find(|p| p.identity.session_id() == exchange.share.recipient)
                .unwrap();
            member.sessions.accept_session(exchange).await.unwrap();
            assert_eq!(
                member.sessions.open(&active.id, &sealed).await.unwrap(),
                b"to all"
            );
        }
    }

    #[tokio::test]
    async fn test_session_expiry_reads_closed_then_purges() {
        let (parties, clock) = setup(2);
        let (ids, keys) = members(&parties);
        let sm = &parties[0].sessions;
        let session = sm.create_session(&ids, &keys).await.unwrap();

        clock.advance(3_600);
        assert_eq!(
            sm.get_session(&session.id).await.unwrap().status,
            SessionStatus::Closed
        );
        assert!(matches!(
            sm.send_message(&session.id, &ids[0], sealed(&parties[1])).await,
            Err(ProtocolError::SessionClosed(_))
        ));

        assert_eq!(sm.purge_expired().await, 1);
        assert!(matches!(
            sm.get_session(&session.id).await,
            Err(ProtocolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rekey_creates_new_generation() {
        let (parties, _) = setup(2);
        let (ids, keys) = members(&parties);
        let sm = &parties[0].sessions;
        let first = sm.create_session(&ids, &keys).await.unwrap();
        let second = sm.rekey_session(&first.id).await.unwrap();
        assert_eq!(second.generation, 1);
        assert_eq!(
            sm.get_session(&first.id).await.unwrap().status,
            SessionStatus::Closed
        );
        let stats = sm.stats().await;
        assert_eq!(stats.active, 1);
        assert_eq!(stats.closed, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_close_and_send_serialize() {
        let (mut parties, _) = setup(2);
        let (ids, keys) = members(&parties);
        let bob = parties.pop().unwrap();
        let alice = Arc::new(parties.pop().unwrap());
        let session = alice.sessions.create_session(&ids, &keys).await.unwrap();

        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut tasks = Vec::new();
        for i in 0..32 {
            let alice = alice.clone();
            let closed = closed.clone();
            let msg = sealed(&bob);
            let id = session.id;
            let sender = ids[0];
            tasks.push(tokio::spawn(async move {
                if i == 16 {
                    alice.sessions.close_session(&id).await.unwrap();
                    closed.store(true, std::sync::atomic::Ordering::SeqCst);
                    None
                } else {
                    let observed_closed = closed.load(std::sync::atomic::Ordering::SeqCst);
                    let result = alice.sessions.send_message(&id, &sender, msg).await;
                    Some((observed_closed, result.is_ok()))
                }
            }));
        }
        for task in tasks {
            if let Some((observed_closed, ok)) = task.await.unwrap() {
                // A send that began after the close was visible can never succeed.
                assert!(!(observed_closed && ok));
            }
        }
    }
}
