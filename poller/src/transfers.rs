//! Reputation transfers: a peer that changed identity inherits the agreement
//! history of its old identity.

use std::collections::{HashMap, HashSet};

use lcap_types::PeerId;
use tracing::warn;

/// Longest transfer chain followed from one identity.
pub const MAX_TRANSFER_PATH: usize = 10;

#[derive(Clone, Debug, Default)]
pub struct ReputationTransfers {
    /// new identity → old identity
    map: HashMap<PeerId, PeerId>,
}

impl ReputationTransfers {
    /// Build from `"new,old"` entries. Malformed entries are skipped.
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Self {
        let mut map = HashMap::new();
        for entry in entries {
            let entry = entry.as_ref();
            match entry.split_once(',') {
                Some((new, old)) if !new.trim().is_empty() && !old.trim().is_empty() => {
                    map.insert(PeerId::new(new.trim()), PeerId::new(old.trim()));
                }
                _ => warn!(entry, "malformed reputation transfer"),
            }
        }
        Self { map }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Old identity `peer` was transferred from, if any.
    pub fn previous(&self, peer: &PeerId) -> Option<&PeerId> {
        self.map.get(peer)
    }

    /// `peer` followed by every identity it inherits from, oldest last.
    pub fn closure(&self, peer: &PeerId) -> Vec<PeerId> {
        let mut path = vec![peer.clone()];
        let mut seen: HashSet<&PeerId> = HashSet::from([peer]);
        let mut current = peer;
        while let Some(old) = self.map.get(current) {
            if !seen.insert(old) {
                warn!(peer = %peer, at = %old, "reputation transfer cycle");
                break;
            }
            if path.len() >= MAX_TRANSFER_PATH {
                warn!(peer = %peer, "reputation transfer chain too long");
                break;
            }
            path.push(old.clone());
            current = old;
        }
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<PeerId> {
        list.iter().map(|s| PeerId::new(*s)).collect()
    }

    #[test]
    fn chain_is_followed_to_oldest() {
        // A←B←C: B took over A, C took over B.
        let t = ReputationTransfers::from_entries(&["B,A", "C,B"]);
        assert_eq!(t.closure(&PeerId::new("C")), ids(&["C", "B", "A"]));
        assert_eq!(t.closure(&PeerId::new("A")), ids(&["A"]));
    }

    #[test]
    fn cycle_terminates() {
        let t = ReputationTransfers::from_entries(&["A,B", "B,A"]);
        assert_eq!(t.closure(&PeerId::new("A")), ids(&["A", "B"]));
    }

    #[test]
    fn long_chain_is_capped() {
        let entries: Vec<String> = (1..20).map(|i| format!("p{i},p{}", i - 1)).collect();
        let t = ReputationTransfers::from_entries(&entries);
        assert_eq!(t.closure(&PeerId::new("p19")).len(), MAX_TRANSFER_PATH);
    }

    #[test]
    fn malformed_entries_skipped() {
        let t = ReputationTransfers::from_entries(&["nocomma", ",x", " new , old "]);
        assert_eq!(t.len(), 1);
        assert_eq!(t.previous(&PeerId::new("new")), Some(&PeerId::new("old")));
    }
}
