//! A single peer's vote in a poll.

use lcap_messages::{LcapMessage, MessageBody};
use lcap_types::{Digest, Nonce, PeerId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::PollError;

/// One voter's digest for a poll, plus whether it matched ours.
///
/// The digest was computed over the poll's challenge and the voter's own
/// verifier, so agreement is decided by re-hashing locally with the same pair.
/// Agreement starts undecided and can be set exactly once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub challenge: Nonce,
    pub verifier: Nonce,
    pub digest: Digest,
    pub voter: PeerId,
    /// Flat child listing carried by name-poll votes.
    pub entries: Option<Vec<String>>,
    pub received_at: Timestamp,
    agree: Option<bool>,
}

impl Vote {
    pub fn new(
        challenge: Nonce,
        verifier: Nonce,
        digest: Digest,
        voter: PeerId,
        received_at: Timestamp,
    ) -> Self {
        Self {
            challenge,
            verifier,
            digest,
            voter,
            entries: None,
            received_at,
            agree: None,
        }
    }

    pub fn with_entries(mut self, entries: Vec<String>) -> Self {
        self.entries = Some(entries);
        self
    }

    /// Build an undecided vote from a V1 vote reply.
    pub fn from_message(msg: &LcapMessage, received_at: Timestamp) -> Result<Self, PollError> {
        match &msg.body {
            MessageBody::V1Vote { digest, entries } => Ok(Self {
                challenge: msg.header.challenge.clone(),
                verifier: msg.header.verifier.clone(),
                digest: digest.clone(),
                voter: msg.header.sender.clone(),
                entries: entries.clone(),
                received_at,
                agree: None,
            }),
            _ => Err(PollError::ProtocolMismatch(format!(
                "{:?} carries no vote",
                msg.opcode()
            ))),
        }
    }

    pub fn agree(&self) -> Option<bool> {
        self.agree
    }

    /// Agreement once decided; undecided votes count as neither side.
    pub fn is_agree(&self) -> bool {
        self.agree == Some(true)
    }

    /// Record agreement by comparing with the locally computed digest.
    pub fn decide(&mut self, local: &Digest) -> Result<bool, PollError> {
        self.set_agree(self.digest == *local)
    }

    pub fn set_agree(&mut self, agree: bool) -> Result<bool, PollError> {
        if self.agree.is_some() {
            return Err(PollError::AgreementAlreadySet(self.voter.to_string()));
        }
        self.agree = Some(agree);
        Ok(agree)
    }

    /// A copy of this vote with agreement cleared, for re-checking.
    pub fn undecided(&self) -> Self {
        Self {
            agree: None,
            ..self.clone()
        }
    }
}
