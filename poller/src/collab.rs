//! Interfaces to the collaborators the poll engine does not own: archived
//! content, peer identities and reputation, and the message transport.

use std::sync::Arc;

use lcap_crypto::ContentHasher;
use lcap_messages::LcapMessage;
use lcap_types::PeerId;
use serde::{Deserialize, Serialize};

use crate::spec::PollSpec;
use crate::PollError;

/// A resolved range of archived content.
pub trait ContentRange: Send + Sync {
    /// Estimated time to hash the whole range once (ms).
    fn estimated_hash_duration(&self) -> u64;

    /// Sorted flat listing of the URLs in the range.
    fn child_names(&self) -> Vec<String>;

    /// Stream the whole range into `sink`.
    fn feed(&self, sink: &mut dyn ContentHasher) -> Result<(), PollError> {
        for url in self.child_names() {
            self.feed_url(&url, sink)?;
        }
        Ok(())
    }

    /// Stream one URL's bytes into `sink`.
    fn feed_url(&self, url: &str, sink: &mut dyn ContentHasher) -> Result<(), PollError>;

    /// Raw bytes of one URL, used to serve repairs.
    fn read_url(&self, url: &str) -> Result<Vec<u8>, PollError>;

    /// Replace one URL's bytes with repaired content.
    fn store_repair(&self, url: &str, content: &[u8]) -> Result<(), PollError>;
}

/// Resolves poll specs to content.
pub trait ContentSource: Send + Sync {
    fn resolve(&self, spec: &PollSpec) -> Option<Arc<dyn ContentRange>>;

    fn is_open_access(&self, _au_id: &str) -> bool {
        false
    }
}

/// Named reputation adjustments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReputationDelta {
    AgreeVote,
    DisagreeVote,
    CallInternal,
    ReplayDetected,
    VoteNotVerified,
    VoteVerified,
    VoteDisowned,
}

impl ReputationDelta {
    pub fn default_value(&self) -> i32 {
        match self {
            Self::AgreeVote => 100,
            Self::DisagreeVote => -150,
            Self::CallInternal => 100,
            Self::ReplayDetected => -20,
            Self::VoteNotVerified => -30,
            Self::VoteVerified => 40,
            Self::VoteDisowned => -400,
        }
    }
}

pub const MAX_REPUTATION: u32 = 1000;
pub const INITIAL_REPUTATION: u32 = 500;

/// Peer identities, reputation and agreement history.
///
/// Methods take `&self`; implementations synchronise internally since the
/// identity store is shared with status reporting and repair decisions.
pub trait IdentityManager: Send + Sync {
    fn local_identity(&self) -> PeerId;

    fn is_local(&self, peer: &PeerId) -> bool {
        *peer == self.local_identity()
    }

    fn reputation(&self, peer: &PeerId) -> u32;

    fn max_reputation(&self) -> u32 {
        MAX_REPUTATION
    }

    fn change_reputation(&self, peer: &PeerId, delta: ReputationDelta);

    /// Highest recorded agreement with `peer` over a whole AU (0.0 to 1.0).
    fn agreement(&self, peer: &PeerId, au_id: &str) -> f64;

    /// Recorded agreement with `peer` on one URL (0.0 to 1.0).
    fn url_agreement(&self, peer: &PeerId, au_id: &str, url: &str) -> f64;

    /// Record agreement for an AU (`url == None`) or a single URL.
    fn record_agreement(&self, peer: &PeerId, au_id: &str, url: Option<&str>, agreement: f64);

    /// Peers eligible for V3 invitations and nominations.
    fn known_peers(&self) -> Vec<PeerId>;
}

/// Fire-and-forget message delivery. `to == None` broadcasts.
pub trait Transport: Send + Sync {
    fn send(&self, message: LcapMessage, to: Option<&PeerId>) -> Result<(), PollError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_defaults() {
        assert_eq!(ReputationDelta::AgreeVote.default_value(), 100);
        assert_eq!(ReputationDelta::DisagreeVote.default_value(), -150);
        assert_eq!(ReputationDelta::VoteDisowned.default_value(), -400);
        assert!(INITIAL_REPUTATION < MAX_REPUTATION);
    }
}
