//! V3 polls: a single poller invites voters, collects per-URL block votes,
//! tallies each URL, requests repairs and sends evaluation receipts.
//!
//! The handshake is
//! `Poll → PollAck → PollProof → Nominate → VoteRequest → Vote →
//! RepairRequest → Repair → EvaluationReceipt`.

pub mod poller;
pub mod voter;

use serde::{Deserialize, Serialize};

/// Poller-side status of the whole poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollerStatus {
    Starting,
    NoTimeAvailable,
    InvitingPeers,
    Hashing,
    Tallying,
    Complete,
    NoQuorum,
    Error,
    Expired,
    WaitingForRepairs,
    Aborted,
}

impl PollerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "Starting",
            Self::NoTimeAvailable => "No Time Available",
            Self::InvitingPeers => "Inviting Peers",
            Self::Hashing => "Hashing",
            Self::Tallying => "Tallying",
            Self::Complete => "Complete",
            Self::NoQuorum => "No Quorum",
            Self::Error => "Error",
            Self::Expired => "Expired",
            Self::WaitingForRepairs => "Waiting for Repairs",
            Self::Aborted => "Aborted",
        }
    }
}

/// Voter-side status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoterStatus {
    Initialized,
    AcceptedPoll,
    Hashing,
    Voted,
    NoTimeAvailable,
    Complete,
    ExpiredWithoutVoting,
    Error,
    DeclinedPoll,
    VoteAccepted,
    Aborted,
}

impl VoterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "Initialized",
            Self::AcceptedPoll => "Accepted Poll",
            Self::Hashing => "Hashing",
            Self::Voted => "Voted",
            Self::NoTimeAvailable => "No Time Available",
            Self::Complete => "Complete",
            Self::ExpiredWithoutVoting => "Expired w/o Voting",
            Self::Error => "Error",
            Self::DeclinedPoll => "Declined Poll",
            Self::VoteAccepted => "Vote Accepted",
            Self::Aborted => "Aborted",
        }
    }
}

/// The poller's view of one invited peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    Initialized,
    Invited,
    AcceptedPoll,
    SentNominees,
    WaitingForVote,
    Voted,
    Complete,
    Error,
    DroppedOut,
    DeclinedPoll,
    NoTimeAvailable,
    DidntVote,
    NoResponse,
}

impl PeerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "Initialized",
            Self::Invited => "Invited",
            Self::AcceptedPoll => "Accepted Poll",
            Self::SentNominees => "Sent Nominees",
            Self::WaitingForVote => "Waiting for Vote",
            Self::Voted => "Voted",
            Self::Complete => "Complete",
            Self::Error => "Error",
            Self::DroppedOut => "Dropped Out",
            Self::DeclinedPoll => "Declined Poll",
            Self::NoTimeAvailable => "No Time Available",
            Self::DidntVote => "Didn't Vote",
            Self::NoResponse => "No Response",
        }
    }

    /// Whether the peer can still contribute a vote.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Initialized
                | Self::Invited
                | Self::AcceptedPoll
                | Self::SentNominees
                | Self::WaitingForVote
                | Self::Voted
        )
    }

    /// The status a peer ends with when the vote deadline passes first.
    pub fn at_vote_deadline(self) -> Self {
        match self {
            Self::Initialized | Self::Invited => Self::NoResponse,
            Self::AcceptedPoll | Self::SentNominees => Self::DroppedOut,
            Self::WaitingForVote => Self::DidntVote,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(PollerStatus::WaitingForRepairs.as_str(), "Waiting for Repairs");
        assert_eq!(VoterStatus::ExpiredWithoutVoting.as_str(), "Expired w/o Voting");
        assert_eq!(PeerStatus::DidntVote.as_str(), "Didn't Vote");
    }

    #[test]
    fn vote_deadline_closes_out_peers() {
        assert_eq!(PeerStatus::Invited.at_vote_deadline(), PeerStatus::NoResponse);
        assert_eq!(PeerStatus::AcceptedPoll.at_vote_deadline(), PeerStatus::DroppedOut);
        assert_eq!(PeerStatus::WaitingForVote.at_vote_deadline(), PeerStatus::DidntVote);
        // Voted peers are still being checked.
        assert_eq!(PeerStatus::Voted.at_vote_deadline(), PeerStatus::Voted);
        assert!(!PeerStatus::DeclinedPoll.is_active());
    }
}
