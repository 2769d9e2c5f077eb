//! Whether to serve repair content to a requesting peer.

use std::sync::Arc;

use lcap_types::PeerId;
use tracing::debug;

use crate::collab::{ContentSource, IdentityManager};
use crate::config::RepairConfig;
use crate::transfers::ReputationTransfers;

/// How a repair request reached this node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepairChannel {
    Untrusted,
    /// An authenticated channel (e.g. a trusted proxy).
    Trusted,
}

pub struct RepairPolicy {
    config: RepairConfig,
    transfers: ReputationTransfers,
    identity: Arc<dyn IdentityManager>,
    content: Arc<dyn ContentSource>,
}

impl RepairPolicy {
    pub fn new(
        config: RepairConfig,
        identity: Arc<dyn IdentityManager>,
        content: Arc<dyn ContentSource>,
    ) -> Self {
        let transfers = ReputationTransfers::from_entries(&config.reputation_transfers);
        Self {
            config,
            transfers,
            identity,
            content,
        }
    }

    pub fn transfers(&self) -> &ReputationTransfers {
        &self.transfers
    }

    pub fn serve_repair(&self, peer: &PeerId, au_id: &str, url: &str) -> bool {
        self.serve_repair_via(peer, au_id, url, RepairChannel::Untrusted)
    }

    pub fn serve_repair_via(
        &self,
        peer: &PeerId,
        au_id: &str,
        url: &str,
        channel: RepairChannel,
    ) -> bool {
        if !self.config.enabled {
            debug!(peer = %peer, au = au_id, "repairs disabled");
            return false;
        }
        if !self.config.open_access_requires_agreement && self.content.is_open_access(au_id) {
            debug!(peer = %peer, au = au_id, "open access AU, serving repair");
            return true;
        }
        if channel == RepairChannel::Trusted && self.config.trusted_channel_bypass {
            debug!(peer = %peer, au = au_id, "trusted channel, serving repair");
            return true;
        }
        let min = self.config.min_percent_agreement;
        for id in self.transfers.closure(peer) {
            let agreement = if self.config.per_url_agreement {
                self.identity.url_agreement(&id, au_id, url)
            } else {
                self.identity.agreement(&id, au_id)
            };
            if agreement >= min {
                debug!(peer = %peer, via = %id, agreement, "agreement sufficient, serving repair");
                return true;
            }
        }
        debug!(peer = %peer, au = au_id, url, "no sufficient agreement, refusing repair");
        false
    }
}
