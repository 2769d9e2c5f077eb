//! Events delivered to polls and the environment that produces them.

use lcap_messages::LcapMessage;
use lcap_types::{PeerId, PollKey, PollKind, Timestamp};
use serde::Serialize;

use crate::hashing::{HashOutput, HashRequest};
use crate::spec::PollSpec;
use crate::tally::TallyResult;
use crate::PollError;

/// Timers a poll can arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PollTimer {
    /// V1: cast our own vote.
    Vote,
    /// End of the poll.
    Deadline,
    /// V3: stop accepting votes and tally.
    VoteDeadline,
}

/// Why a hash was requested; echoed back with its result.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HashPurpose {
    /// Our own digest for the poll.
    OwnVote,
    /// Re-hash with a voter's verifier to check their vote.
    VoteCheck { voter: PeerId },
    /// Re-check of the `index`-th recorded vote during replay.
    Replay { index: usize },
}

#[derive(Debug)]
pub enum PollEvent {
    Start,
    Message(LcapMessage),
    HashDone {
        purpose: HashPurpose,
        result: Result<HashOutput, PollError>,
    },
    Timer(PollTimer),
    Abort,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AlertKind {
    TooClose,
}

/// Operator-visible notice raised by a poll.
#[derive(Clone, Debug, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub key: PollKey,
    pub au_id: String,
    pub url: String,
    pub detail: String,
}

/// Summary of a poll that was retired.
#[derive(Clone, Debug, Serialize)]
pub struct PollOutcome {
    pub key: PollKey,
    pub kind: PollKind,
    pub spec: PollSpec,
    pub result: TallyResult,
    pub caller_is_local: bool,
    pub agree: usize,
    pub disagree: usize,
    pub finished_at: Timestamp,
    /// Name polls: entries other peers hold that we lack.
    pub missing_locally: Vec<String>,
    /// Name polls: entries we hold that the winning listing lacks.
    pub extra_locally: Vec<String>,
    /// V3: URLs repaired from peers.
    pub repaired: Vec<String>,
}

/// Everything a poll needs from the node it runs in.
pub trait Environment {
    fn now(&self) -> Timestamp;

    /// Ask the hash scheduler to admit `request`. Its result arrives later as
    /// [`PollEvent::HashDone`]. Returns false when the scheduler refuses.
    fn schedule_hash(&mut self, request: HashRequest) -> bool;

    /// Whether a hash of `estimate` ms would be admitted with `deadline`.
    fn can_hash_before(&self, estimate: u64, deadline: Timestamp) -> bool;

    fn send(&mut self, message: LcapMessage, to: Option<&PeerId>) -> Result<(), PollError>;

    /// Deliver [`PollEvent::Timer`] to poll `key` at `at`.
    fn set_timer(&mut self, key: &PollKey, at: Timestamp, timer: PollTimer);

    fn alert(&mut self, alert: Alert) {
        tracing::warn!(poll = %alert.key, au = %alert.au_id, url = %alert.url, "{}", alert.detail);
    }

    fn poll_finished(&mut self, _outcome: &PollOutcome) {}
}
