//! Peer protocol message types for content-audit polls.
//!
//! Every message carries a [`MessageHeader`] identifying the poll (challenge),
//! the sender's verifier, the audited range, and the remaining poll duration.
//! The [`MessageBody`] carries the opcode-specific payload.
//!
//! The [`codec`] module provides a reference bincode framing; the poll logic
//! itself never depends on a particular encoding.

pub mod codec;
pub mod error;

pub use codec::{decode, encode, MAX_MESSAGE_SIZE};
pub use error::MessageError;

use lcap_types::{Digest, Nonce, PeerId, PollKey, PollKind, ProtocolVersion, Timestamp};
use serde::{Deserialize, Serialize};

/// All message opcodes in the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // V1: symmetric polls
    NamePollReq,
    NamePollRep,
    ContentPollReq,
    ContentPollRep,
    VerifyPollReq,
    VerifyPollRep,

    // V3: poller/voter handshake
    Poll,
    PollAck,
    PollProof,
    Nominate,
    VoteRequest,
    Vote,
    RepairRequest,
    Repair,
    EvaluationReceipt,
}

impl Opcode {
    pub fn version(&self) -> ProtocolVersion {
        match self {
            Self::NamePollReq
            | Self::NamePollRep
            | Self::ContentPollReq
            | Self::ContentPollRep
            | Self::VerifyPollReq
            | Self::VerifyPollRep => ProtocolVersion::V1,
            _ => ProtocolVersion::V3,
        }
    }

    /// Whether this opcode asks a peer to join (or create) a poll.
    pub fn is_poll_request(&self) -> bool {
        matches!(
            self,
            Self::NamePollReq | Self::ContentPollReq | Self::VerifyPollReq | Self::Poll
        )
    }

    /// The V1 poll kind a request/reply opcode belongs to.
    pub fn v1_kind(&self) -> Option<PollKind> {
        match self {
            Self::NamePollReq | Self::NamePollRep => Some(PollKind::Name),
            Self::ContentPollReq | Self::ContentPollRep => Some(PollKind::Content),
            Self::VerifyPollReq | Self::VerifyPollRep => Some(PollKind::Verify),
            _ => None,
        }
    }

    /// Request opcode for a V1 poll kind.
    pub fn v1_request(kind: PollKind) -> Option<Self> {
        match kind {
            PollKind::Name => Some(Self::NamePollReq),
            PollKind::Content => Some(Self::ContentPollReq),
            PollKind::Verify => Some(Self::VerifyPollReq),
            _ => None,
        }
    }

    /// Reply (vote) opcode for a V1 poll kind.
    pub fn v1_reply(kind: PollKind) -> Option<Self> {
        match kind {
            PollKind::Name => Some(Self::NamePollRep),
            PollKind::Content => Some(Self::ContentPollRep),
            PollKind::Verify => Some(Self::VerifyPollRep),
            _ => None,
        }
    }
}

/// Header present on every message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub version: ProtocolVersion,
    pub opcode: Opcode,
    pub sender: PeerId,
    pub au_id: String,
    pub plugin_id: String,
    pub url: String,
    pub lower: Option<String>,
    pub upper: Option<String>,
    /// Remaining poll duration in milliseconds at send time.
    pub duration: u64,
    pub challenge: Nonce,
    pub verifier: Nonce,
    pub hash_algorithm: String,
    pub sent_at: Timestamp,
}

impl MessageHeader {
    pub fn poll_key(&self) -> PollKey {
        PollKey::from_challenge(&self.challenge)
    }
}

/// Reasons a V3 voter declines an invitation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NakReason {
    NoTime,
    NoAu,
    TooManyVoters,
    NotReady,
}

/// Per-URL digest in a V3 vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteBlock {
    pub url: String,
    pub digest: Digest,
}

/// Opcode-specific payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MessageBody {
    /// V1 poll request, V3 vote request: header only.
    Empty,
    /// V1 name/content vote. Name votes carry the flat child listing.
    V1Vote {
        digest: Digest,
        entries: Option<Vec<String>>,
    },
    /// V1 verify reply: the secret behind the challenged verifier.
    VerifyReply { secret: Nonce },
    /// V3 invitation.
    Poll { vote_deadline: Timestamp },
    /// V3 acceptance (with the voter's nonce) or refusal.
    PollAck {
        voter_nonce: Option<Nonce>,
        nak: Option<NakReason>,
    },
    PollProof,
    Nominate { nominees: Vec<PeerId> },
    Vote { blocks: Vec<VoteBlock> },
    RepairRequest { url: String },
    Repair { url: String, content: Vec<u8> },
    EvaluationReceipt { agreement: f64 },
}

/// A complete peer protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LcapMessage {
    pub header: MessageHeader,
    pub body: MessageBody,
}

impl LcapMessage {
    pub fn new(header: MessageHeader, body: MessageBody) -> Self {
        Self { header, body }
    }

    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }

    pub fn sender(&self) -> &PeerId {
        &self.header.sender
    }

    pub fn poll_key(&self) -> PollKey {
        self.header.poll_key()
    }

    /// Build a reply in the same poll: same range and challenge, new opcode,
    /// sender, verifier and remaining duration.
    pub fn reply(
        &self,
        opcode: Opcode,
        sender: PeerId,
        verifier: Nonce,
        duration: u64,
        now: Timestamp,
        body: MessageBody,
    ) -> Self {
        let header = MessageHeader {
            opcode,
            sender,
            verifier,
            duration,
            sent_at: now,
            ..self.header.clone()
        };
        Self { header, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_header(opcode: Opcode) -> MessageHeader {
        MessageHeader {
            version: opcode.version(),
            opcode,
            sender: PeerId::new("TCP:[10.0.0.1]:9729"),
            au_id: "au-1".into(),
            plugin_id: "plugin".into(),
            url: "http://example.org/".into(),
            lower: None,
            upper: None,
            duration: 60_000,
            challenge: Nonce::new(vec![1; 20]),
            verifier: Nonce::new(vec![2; 20]),
            hash_algorithm: "BLAKE2b-256".into(),
            sent_at: Timestamp::new(1_000),
        }
    }

    #[test]
    fn opcode_versions() {
        assert_eq!(Opcode::ContentPollRep.version(), ProtocolVersion::V1);
        assert_eq!(Opcode::EvaluationReceipt.version(), ProtocolVersion::V3);
        assert!(Opcode::Poll.is_poll_request());
        assert!(!Opcode::PollAck.is_poll_request());
    }

    #[test]
    fn v1_kind_mapping_is_consistent() {
        for kind in [PollKind::Name, PollKind::Content, PollKind::Verify] {
            assert_eq!(Opcode::v1_request(kind).unwrap().v1_kind(), Some(kind));
            assert_eq!(Opcode::v1_reply(kind).unwrap().v1_kind(), Some(kind));
        }
        assert_eq!(Opcode::v1_request(PollKind::Poller), None);
    }

    #[test]
    fn reply_keeps_poll_identity() {
        let req = LcapMessage::new(sample_header(Opcode::ContentPollReq), MessageBody::Empty);
        let rep = req.reply(
            Opcode::ContentPollRep,
            PeerId::new("TCP:[10.0.0.2]:9729"),
            Nonce::new(vec![3; 20]),
            30_000,
            Timestamp::new(2_000),
            MessageBody::V1Vote {
                digest: Digest::new(vec![9; 32]),
                entries: None,
            },
        );
        assert_eq!(rep.poll_key(), req.poll_key());
        assert_eq!(rep.header.url, req.header.url);
        assert_eq!(rep.header.duration, 30_000);
        assert_eq!(rep.sender().as_str(), "TCP:[10.0.0.2]:9729");
    }
}
