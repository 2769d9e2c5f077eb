//! Nullable identity manager: reputations and agreement history in memory.

use std::collections::HashMap;
use std::sync::Mutex;

use lcap_poller::{IdentityManager, ReputationDelta, INITIAL_REPUTATION, MAX_REPUTATION};
use lcap_types::PeerId;

type AgreementKey = (PeerId, String, Option<String>);

/// Thread-safe in-memory identity store.
pub struct NullIdentityManager {
    local: PeerId,
    peers: Mutex<Vec<PeerId>>,
    reputations: Mutex<HashMap<PeerId, u32>>,
    agreements: Mutex<HashMap<AgreementKey, f64>>,
    deltas: Mutex<Vec<(PeerId, ReputationDelta)>>,
}

impl NullIdentityManager {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            peers: Mutex::new(Vec::new()),
            reputations: Mutex::new(HashMap::new()),
            agreements: Mutex::new(HashMap::new()),
            deltas: Mutex::new(Vec::new()),
        }
    }

    /// Peers offered for invitations and nominations.
    pub fn with_peers(self, peers: impl IntoIterator<Item = PeerId>) -> Self {
        self.peers.lock().unwrap().extend(peers);
        self
    }

    pub fn add_peer(&self, peer: PeerId) {
        let mut peers = self.peers.lock().unwrap();
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }

    pub fn set_reputation(&self, peer: &PeerId, reputation: u32) {
        self.reputations
            .lock()
            .unwrap()
            .insert(peer.clone(), reputation.min(MAX_REPUTATION));
    }

    /// Every delta applied so far, in order.
    pub fn deltas(&self) -> Vec<(PeerId, ReputationDelta)> {
        self.deltas.lock().unwrap().clone()
    }

    pub fn deltas_for(&self, peer: &PeerId) -> Vec<ReputationDelta> {
        self.deltas
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == peer)
            .map(|(_, d)| *d)
            .collect()
    }
}

impl IdentityManager for NullIdentityManager {
    fn local_identity(&self) -> PeerId {
        self.local.clone()
    }

    fn reputation(&self, peer: &PeerId) -> u32 {
        self.reputations
            .lock()
            .unwrap()
            .get(peer)
            .copied()
            .unwrap_or(INITIAL_REPUTATION)
    }

    fn change_reputation(&self, peer: &PeerId, delta: ReputationDelta) {
        let current = i64::from(self.reputation(peer));
        let next = (current + i64::from(delta.default_value())).clamp(0, i64::from(MAX_REPUTATION));
        self.reputations.lock().unwrap().insert(peer.clone(), next as u32);
        self.deltas.lock().unwrap().push((peer.clone(), delta));
    }

    fn agreement(&self, peer: &PeerId, au_id: &str) -> f64 {
        self.agreements
            .lock()
            .unwrap()
            .get(&(peer.clone(), au_id.to_string(), None))
            .copied()
            .unwrap_or(0.0)
    }

    fn url_agreement(&self, peer: &PeerId, au_id: &str, url: &str) -> f64 {
        self.agreements
            .lock()
            .unwrap()
            .get(&(peer.clone(), au_id.to_string(), Some(url.to_string())))
            .copied()
            .unwrap_or(0.0)
    }

    /// AU agreement keeps the highest value seen; URL agreement the latest.
    fn record_agreement(&self, peer: &PeerId, au_id: &str, url: Option<&str>, agreement: f64) {
        let key = (peer.clone(), au_id.to_string(), url.map(str::to_string));
        let mut agreements = self.agreements.lock().unwrap();
        let entry = agreements.entry(key).or_insert(agreement);
        *entry = if url.is_none() {
            entry.max(agreement)
        } else {
            agreement
        };
    }

    fn known_peers(&self) -> Vec<PeerId> {
        self.peers.lock().unwrap().clone()
    }
}
