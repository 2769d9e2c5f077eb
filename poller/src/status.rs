//! Serializable status rows for in-flight and recent polls.

use std::collections::BTreeMap;

use lcap_types::{PeerId, PollKey, PollKind, ProtocolVersion, Timestamp};
use serde::Serialize;

use crate::poll::{Poll, Role};
use crate::tally::{lock_tally, TallyResult};

#[derive(Clone, Debug, Serialize)]
pub struct VoteStatusRow {
    pub voter: PeerId,
    pub agree: Option<bool>,
    pub weight: u32,
    pub received_at: Timestamp,
}

/// The poller's view of one V3 invitee.
#[derive(Clone, Debug, Serialize)]
pub struct PeerStatusRow {
    pub peer: PeerId,
    pub status: &'static str,
    pub agreement: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PollStatusRow {
    pub key: PollKey,
    pub version: ProtocolVersion,
    pub kind: PollKind,
    pub au_id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    pub caller: PeerId,
    pub is_my_poll: bool,
    pub status: String,
    pub result: TallyResult,
    pub created_at: Timestamp,
    pub deadline: Timestamp,
    pub agree: usize,
    pub disagree: usize,
    pub weight_agree: u64,
    pub weight_disagree: u64,
    pub replaying: bool,
    pub votes: Vec<VoteStatusRow>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<PeerStatusRow>,
}

impl PollStatusRow {
    pub fn from_poll(poll: &Poll) -> Self {
        let spec = poll.spec();
        let range = spec.is_ranged().then(|| {
            format!(
                "[{}..{}]",
                spec.lower.as_deref().unwrap_or(""),
                spec.upper.as_deref().unwrap_or("")
            )
        });
        let peers = match &poll.role {
            Role::Poller(state) => state
                .peers
                .iter()
                .map(|(peer, record)| PeerStatusRow {
                    peer: peer.clone(),
                    status: record.status.as_str(),
                    agreement: record.agreement,
                })
                .collect(),
            _ => Vec::new(),
        };
        let tally = lock_tally(&poll.tally);
        Self {
            key: poll.key().clone(),
            version: poll.version(),
            kind: poll.kind(),
            au_id: spec.au_id.clone(),
            url: spec.url.clone(),
            range,
            caller: poll.caller().clone(),
            is_my_poll: poll.is_my_poll(),
            status: poll.status(),
            result: tally.result(),
            created_at: poll.created_at(),
            deadline: poll.deadline(),
            agree: tally.num_agree(),
            disagree: tally.num_disagree(),
            weight_agree: tally.weight_agree(),
            weight_disagree: tally.weight_disagree(),
            replaying: poll.is_replaying(),
            votes: tally
                .records()
                .iter()
                .map(|r| VoteStatusRow {
                    voter: r.vote.voter.clone(),
                    agree: r.vote.agree(),
                    weight: r.weight,
                    received_at: r.vote.received_at,
                })
                .collect(),
            peers,
        }
    }
}

/// Everything the status surface shows at one instant.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub local: PeerId,
    pub taken_at: Timestamp,
    pub active: Vec<PollStatusRow>,
    pub recent: Vec<PollStatusRow>,
    pub secrets: usize,
    pub stats: BTreeMap<&'static str, u64>,
}

impl StatusSnapshot {
    /// Row for `key`, whether active or recent.
    pub fn find(&self, key: &PollKey) -> Option<&PollStatusRow> {
        self.active
            .iter()
            .chain(&self.recent)
            .find(|row| &row.key == key)
    }
}
