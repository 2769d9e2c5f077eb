//! In-memory peer registry: reputation and agreement history, optionally
//! persisted as JSON between runs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use lcap_poller::{IdentityManager, ReputationDelta, INITIAL_REPUTATION, MAX_REPUTATION};
use lcap_types::PeerId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::NodeError;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct PeerRecord {
    reputation: u32,
    /// Highest whole-AU agreement seen, per AU.
    au_agreement: BTreeMap<String, f64>,
    /// Latest per-URL agreement, keyed by `"<au> <url>"`.
    url_agreement: BTreeMap<String, f64>,
}

impl PeerRecord {
    fn new() -> Self {
        Self {
            reputation: INITIAL_REPUTATION,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Stored {
    peers: BTreeMap<PeerId, PeerRecord>,
}

pub struct PeerRegistry {
    local: PeerId,
    known: RwLock<BTreeSet<PeerId>>,
    state: RwLock<Stored>,
    path: Option<PathBuf>,
}

fn url_key(au_id: &str, url: &str) -> String {
    format!("{au_id} {url}")
}

impl PeerRegistry {
    pub fn new(local: PeerId, peers: impl IntoIterator<Item = PeerId>) -> Self {
        let known: BTreeSet<PeerId> = peers.into_iter().filter(|p| *p != local).collect();
        Self {
            local,
            known: RwLock::new(known),
            state: RwLock::new(Stored::default()),
            path: None,
        }
    }

    /// Load history from `path` if it exists; [`save`](Self::save) writes back there.
    pub fn open(
        local: PeerId,
        peers: impl IntoIterator<Item = PeerId>,
        path: impl AsRef<Path>,
    ) -> Result<Self, NodeError> {
        let path = path.as_ref().to_path_buf();
        let mut registry = Self::new(local, peers);
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let stored: Stored = serde_json::from_str(&raw)?;
            info!(path = %path.display(), peers = stored.peers.len(), "peer history loaded");
            registry.state = RwLock::new(stored);
        }
        registry.path = Some(path);
        Ok(registry)
    }

    /// Persist to the file given to [`open`](Self::open); no-op otherwise.
    pub fn save(&self) -> Result<(), NodeError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = {
            let state = self.state.read().map_err(|_| poisoned())?;
            serde_json::to_string_pretty(&*state)?
        };
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "peer history saved");
        Ok(())
    }

    pub fn add_peer(&self, peer: PeerId) {
        if peer != self.local {
            if let Ok(mut known) = self.known.write() {
                known.insert(peer);
            }
        }
    }

    fn read<R>(&self, peer: &PeerId, f: impl FnOnce(&PeerRecord) -> R, missing: R) -> R {
        match self.state.read() {
            Ok(state) => state.peers.get(peer).map_or(missing, f),
            Err(_) => missing,
        }
    }

    fn write(&self, peer: &PeerId, f: impl FnOnce(&mut PeerRecord)) {
        if let Ok(mut state) = self.state.write() {
            f(state.peers.entry(peer.clone()).or_insert_with(PeerRecord::new));
        }
    }
}

fn poisoned() -> NodeError {
    NodeError::Config("peer registry lock poisoned".into())
}

impl IdentityManager for PeerRegistry {
    fn local_identity(&self) -> PeerId {
        self.local.clone()
    }

    fn reputation(&self, peer: &PeerId) -> u32 {
        self.read(peer, |r| r.reputation, INITIAL_REPUTATION)
    }

    fn change_reputation(&self, peer: &PeerId, delta: ReputationDelta) {
        let change = delta.default_value();
        self.write(peer, |record| {
            let next = (i64::from(record.reputation) + i64::from(change))
                .clamp(0, i64::from(MAX_REPUTATION));
            record.reputation = next as u32;
        });
        debug!(peer = %peer, ?delta, change, "reputation changed");
    }

    fn agreement(&self, peer: &PeerId, au_id: &str) -> f64 {
        self.read(peer, |r| r.au_agreement.get(au_id).copied().unwrap_or(0.0), 0.0)
    }

    fn url_agreement(&self, peer: &PeerId, au_id: &str, url: &str) -> f64 {
        let key = url_key(au_id, url);
        self.read(peer, |r| r.url_agreement.get(&key).copied().unwrap_or(0.0), 0.0)
    }

    fn record_agreement(&self, peer: &PeerId, au_id: &str, url: Option<&str>, agreement: f64) {
        let agreement = agreement.clamp(0.0, 1.0);
        self.write(peer, |record| match url {
            Some(url) => {
                record.url_agreement.insert(url_key(au_id, url), agreement);
            }
            None => {
                let best = record.au_agreement.entry(au_id.to_string()).or_insert(0.0);
                *best = best.max(agreement);
            }
        });
    }

    fn known_peers(&self) -> Vec<PeerId> {
        self.known
            .read()
            .map(|known| known.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn registry() -> PeerRegistry {
        PeerRegistry::new(PeerId::new("a"), ["a", "b", "c"].map(PeerId::new))
    }

    #[test]
    fn local_peer_is_not_known() {
        let r = registry();
        assert_eq!(r.known_peers(), vec![PeerId::new("b"), PeerId::new("c")]);
        assert!(r.is_local(&PeerId::new("a")));
    }

    #[test]
    fn reputation_is_clamped() {
        let r = registry();
        let b = PeerId::new("b");
        assert_eq!(r.reputation(&b), INITIAL_REPUTATION);
        for _ in 0..10 {
            r.change_reputation(&b, ReputationDelta::AgreeVote);
        }
        assert_eq!(r.reputation(&b), MAX_REPUTATION);
        for _ in 0..5 {
            r.change_reputation(&b, ReputationDelta::VoteDisowned);
        }
        assert_eq!(r.reputation(&b), 0);
    }

    #[test]
    fn au_agreement_keeps_the_highest() {
        let r = registry();
        let b = PeerId::new("b");
        r.record_agreement(&b, "au1", None, 0.9);
        r.record_agreement(&b, "au1", None, 0.4);
        assert_eq!(r.agreement(&b, "au1"), 0.9);
        r.record_agreement(&b, "au1", Some("http://x/1"), 1.0);
        r.record_agreement(&b, "au1", Some("http://x/1"), 0.0);
        assert_eq!(r.url_agreement(&b, "au1", "http://x/1"), 0.0);
        assert_eq!(r.agreement(&b, "au2"), 0.0);
    }

    #[test]
    fn history_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peers.json");
        let b = PeerId::new("b");
        {
            let r = PeerRegistry::open(PeerId::new("a"), [b.clone()], &path).unwrap();
            r.change_reputation(&b, ReputationDelta::DisagreeVote);
            r.record_agreement(&b, "au1", None, 0.75);
            r.save().unwrap();
        }
        let r = PeerRegistry::open(PeerId::new("a"), [b.clone()], &path).unwrap();
        assert_eq!(r.reputation(&b), 350);
        assert_eq!(r.agreement(&b, "au1"), 0.75);
    }

    fn delta() -> impl Strategy<Value = ReputationDelta> {
        prop_oneof![
            Just(ReputationDelta::AgreeVote),
            Just(ReputationDelta::DisagreeVote),
            Just(ReputationDelta::CallInternal),
            Just(ReputationDelta::ReplayDetected),
            Just(ReputationDelta::VoteNotVerified),
            Just(ReputationDelta::VoteVerified),
            Just(ReputationDelta::VoteDisowned),
        ]
    }

    proptest! {
        #[test]
        fn reputation_stays_in_bounds(deltas in prop::collection::vec(delta(), 0..40)) {
            let r = registry();
            let b = PeerId::new("b");
            let mut expected = i64::from(INITIAL_REPUTATION);
            for d in deltas {
                r.change_reputation(&b, d);
                expected = (expected + i64::from(d.default_value())).clamp(0, i64::from(MAX_REPUTATION));
            }
            prop_assert_eq!(i64::from(r.reputation(&b)), expected);
        }
    }
}
