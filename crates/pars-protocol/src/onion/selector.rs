//! Relay path selection.

use std::collections::HashSet;
use std::sync::Mutex;

use pars_identity::SessionId;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use super::router::RelayHop;
use crate::{ProtocolError, Result};

/// Chooses relays for a path.
///
/// Implementations must return exactly `count` distinct hops, none of which
/// is the sender or the recipient. [`validate_selection`] checks this.
pub trait HopSelector: Send + Sync {
    /// Pick `count` hops from `candidates`.
    fn select(
        &self,
        candidates: &[RelayHop],
        count: usize,
        sender: &SessionId,
        recipient: &SessionId,
    ) -> Result<Vec<RelayHop>>;
}

/// Uniform random choice without replacement.
pub struct RandomHopSelector {
    rng: Mutex<ChaCha20Rng>,
}

impl RandomHopSelector {
    /// Selector seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::from_entropy()),
        }
    }

    /// Deterministic selector for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(ChaCha20Rng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomHopSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RandomHopSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomHopSelector").finish_non_exhaustive()
    }
}

impl HopSelector for RandomHopSelector {
    fn select(
        &self,
        candidates: &[RelayHop],
        count: usize,
        sender: &SessionId,
        recipient: &SessionId,
    ) -> Result<Vec<RelayHop>> {
        let mut seen = HashSet::with_capacity(candidates.len());
        let eligible: Vec<&RelayHop> = candidates
            .iter()
            .filter(|hop| &hop.address != sender && &hop.address != recipient)
            .filter(|hop| seen.insert(hop.address))
            .collect();

        if eligible.len() < count {
            return Err(ProtocolError::NotEnoughRelays {
                needed: count,
                available: eligible.len(),
            });
        }

        // A poisoned lock still holds a usable generator.
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let path: Vec<RelayHop> = eligible
            .choose_multiple(&mut *rng, count)
            .map(|hop| (*hop).clone())
            .collect();
        drop(rng);

        validate_selection(&path, count, sender, recipient)?;
        Ok(path)
    }
}

/// Check a selected path against the [`HopSelector`] contract.
///
/// # Errors
///
/// `InvalidPath` if the length is wrong, a hop repeats, or the sender or
/// recipient appears on the path.
pub fn validate_selection(
    path: &[RelayHop],
    count: usize,
    sender: &SessionId,
    recipient: &SessionId,
) -> Result<()> {
    if path.len() != count {
        return Err(ProtocolError::InvalidPath(format!(
            "expected {} hops, got {}",
            count,
            path.len()
        )));
    }
    let mut seen = HashSet::with_capacity(path.len());
    for hop in path {
        if &hop.address == sender || &hop.address == recipient {
            return Err(ProtocolError::InvalidPath(format!(
                "endpoint {} used as a relay",
                hop.address.short()
            )));
        }
        if !seen.insert(hop.address) {
            return Err(ProtocolError::InvalidPath(format!(
                "hop {} repeated",
                hop.address.short()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pars_crypto::KemPublicKey;

    fn hop(n: u8) -> RelayHop {
        RelayHop {
            address: SessionId::derive(7, &[n], b"relay"),
            kem_public: KemPublicKey::from_bytes(vec![n; 32]),
        }
    }

    fn endpoints() -> (SessionId, SessionId) {
        (
            SessionId::derive(7, b"sender", b"s"),
            SessionId::derive(7, b"recipient", b"r"),
        )
    }

    #[test]
    fn test_selects_distinct_relays() {
        let (sender, recipient) = endpoints();
        let candidates: Vec<RelayHop> = (1..=10).map(hop).collect();
        let selector = RandomHopSelector::with_seed(42);
        for _ in 0..50 {
            let path = selector.select(&candidates, 3, &sender, &recipient).unwrap();
            assert!(validate_selection(&path, 3, &sender, &recipient).is_ok());
        }
    }

    #[test]
    fn test_excludes_endpoints() {
        let (_, recipient) = endpoints();
        let candidates: Vec<RelayHop> = (1..=4).map(hop).collect();
        let sender = candidates[0].address;
        let selector = RandomHopSelector::with_seed(1);
        for _ in 0..20 {
            let path = selector.select(&candidates, 3, &sender, &recipient).unwrap();
            assert!(path.iter().all(|h| h.address != sender));
        }
    }

    #[test]
    fn test_not_enough_relays() {
        let (sender, recipient) = endpoints();
        let mut candidates: Vec<RelayHop> = (1..=2).map(hop).collect();
        candidates.push(hop(1));
        let selector = RandomHopSelector::with_seed(1);
        assert!(matches!(
            selector.select(&candidates, 3, &sender, &recipient),
            Err(ProtocolError::NotEnoughRelays {
                needed: 3,
                available: 2
            })
        ));
    }

    #[test]
    fn test_seeded_selection_is_deterministic() {
        let (sender, recipient) = endpoints();
        let candidates: Vec<RelayHop> = (1..=10).map(hop).collect();
        let a = RandomHopSelector::with_seed(9)
            .select(&candidates, 4, &sender, &recipient)
            .unwrap();
        let b = RandomHopSelector::with_seed(9)
            .select(&candidates, 4, &sender, &recipient)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_validate_selection_rejects_violations() {
        let (sender, recipient) = endpoints();
        assert!(matches!(
            validate_selection(&[hop(1), hop(2)], 3, &sender, &recipient),
            Err(ProtocolError::InvalidPath(_))
        ));
        assert!(matches!(
            validate_selection(&[hop(1), hop(2), hop(1)], 3, &sender, &recipient),
            Err(ProtocolError::InvalidPath(_))
        ));
        let mut with_recipient = vec![hop(1), hop(2), hop(3)];
        with_recipient[2].address = recipient;
        assert!(matches!(
            validate_selection(&with_recipient, 3, &sender, &recipient),
            Err(ProtocolError::InvalidPath(_))
        ));
    }
}
