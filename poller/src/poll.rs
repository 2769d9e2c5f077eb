//! The tagged poll and its per-kind strategy table.
//!
//! A [`Poll`] carries everything common to every poll (spec, challenge, our
//! verifier, deadline, tally) plus a role-specific state. Behaviour differs by
//! `(version, kind)` and is selected through a static [`PollStrategy`] table
//! rather than a type hierarchy: the strategy names what the poll hashes, which
//! opcodes it speaks, whether it audits voters, and which handler drives it.
//!
//! Every handler checks the current state first, so hash results and timers
//! that arrive after the poll moved on are dropped.

use std::sync::Arc;

use lcap_crypto::DigestAlgorithm;
use lcap_messages::{LcapMessage, MessageBody, MessageHeader, Opcode};
use lcap_types::{Nonce, PeerId, PollKey, PollKind, ProtocolVersion, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::collab::ContentRange;
use crate::context::PollCtx;
use crate::event::{Alert, AlertKind, HashPurpose, PollEvent, PollOutcome};
use crate::hashing::{HashInput, HashRequest};
use crate::replay::VoteReplay;
use crate::spec::PollSpec;
use crate::tally::{lock_tally, SharedTally, TallyParams, TallyResult};
use crate::{v1, v3};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PollState {
    Initing,
    WaitHash,
    WaitVote,
    WaitTally,
    Complete,
    ErrScheduleHash,
    ErrHashing,
    ErrIo,
}

impl PollState {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::ErrScheduleHash | Self::ErrHashing | Self::ErrIo)
    }

    pub fn is_terminal(&self) -> bool {
        *self == Self::Complete || self.is_error()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initing => "Initializing",
            Self::WaitHash => "Waiting for Hash",
            Self::WaitVote => "Waiting for Vote",
            Self::WaitTally => "Waiting for Tally",
            Self::Complete => "Complete",
            Self::ErrScheduleHash => "Error: scheduling hash",
            Self::ErrHashing => "Error: hashing",
            Self::ErrIo => "Error: sending",
        }
    }
}

type Handler = fn(&mut Poll, PollEvent, &mut PollCtx<'_>);

/// Behaviour of one `(version, kind)` combination.
pub struct PollStrategy {
    pub version: ProtocolVersion,
    pub kind: PollKind,
    /// What our own digest covers; `None` for polls that never hash.
    pub hash_input: Option<HashInput>,
    pub request_opcode: Opcode,
    pub vote_opcode: Option<Opcode>,
    /// Whether checked votes may trigger verify polls against their voter.
    pub random_verify: bool,
    /// Whether a lost poll reconciles name listings.
    pub reconcile_names: bool,
    handler: Handler,
}

static STRATEGIES: [PollStrategy; 5] = [
    PollStrategy {
        version: ProtocolVersion::V1,
        kind: PollKind::Name,
        hash_input: Some(HashInput::Names),
        request_opcode: Opcode::NamePollReq,
        vote_opcode: Some(Opcode::NamePollRep),
        random_verify: true,
        reconcile_names: true,
        handler: v1::handle,
    },
    PollStrategy {
        version: ProtocolVersion::V1,
        kind: PollKind::Content,
        hash_input: Some(HashInput::Content),
        request_opcode: Opcode::ContentPollReq,
        vote_opcode: Some(Opcode::ContentPollRep),
        random_verify: true,
        reconcile_names: false,
        handler: v1::handle,
    },
    PollStrategy {
        version: ProtocolVersion::V1,
        kind: PollKind::Verify,
        hash_input: None,
        request_opcode: Opcode::VerifyPollReq,
        vote_opcode: Some(Opcode::VerifyPollRep),
        random_verify: false,
        reconcile_names: false,
        handler: v1::handle_verify,
    },
    PollStrategy {
        version: ProtocolVersion::V3,
        kind: PollKind::Poller,
        hash_input: Some(HashInput::Blocks),
        request_opcode: Opcode::Poll,
        vote_opcode: Some(Opcode::Vote),
        random_verify: false,
        reconcile_names: false,
        handler: v3::poller::handle,
    },
    PollStrategy {
        version: ProtocolVersion::V3,
        kind: PollKind::Voter,
        hash_input: Some(HashInput::Blocks),
        request_opcode: Opcode::Poll,
        vote_opcode: Some(Opcode::Vote),
        random_verify: false,
        reconcile_names: false,
        handler: v3::voter::handle,
    },
];

/// The strategy for a poll kind (the kind fixes the version).
pub fn strategy(kind: PollKind) -> &'static PollStrategy {
    match kind {
        PollKind::Name => &STRATEGIES[0],
        PollKind::Content => &STRATEGIES[1],
        PollKind::Verify => &STRATEGIES[2],
        PollKind::Poller => &STRATEGIES[3],
        PollKind::Voter => &STRATEGIES[4],
    }
}

/// Role-specific state.
pub(crate) enum Role {
    V1(v1::VoteState),
    Verify(v1::VerifyState),
    Poller(v3::poller::PollerState),
    Voter(v3::voter::VoterState),
}

/// Everything needed to construct a poll.
pub struct PollParams {
    pub spec: PollSpec,
    pub caller: PeerId,
    pub caller_is_local: bool,
    pub challenge: Nonce,
    pub verifier: Nonce,
    pub now: Timestamp,
    pub duration: u64,
    pub content: Arc<dyn ContentRange>,
    pub algorithm: &'static dyn DigestAlgorithm,
    pub tally: TallyParams,
}

pub struct Poll {
    pub(crate) key: PollKey,
    pub(crate) spec: PollSpec,
    pub(crate) caller: PeerId,
    pub(crate) caller_is_local: bool,
    pub(crate) challenge: Nonce,
    pub(crate) verifier: Nonce,
    pub(crate) created_at: Timestamp,
    pub(crate) deadline: Timestamp,
    pub(crate) state: PollState,
    pub(crate) tally: SharedTally,
    pub(crate) content: Arc<dyn ContentRange>,
    pub(crate) algorithm: &'static dyn DigestAlgorithm,
    pub(crate) strategy: &'static PollStrategy,
    pub(crate) role: Role,
    pub(crate) replay: Option<VoteReplay>,
}

impl Poll {
    pub(crate) fn new(params: PollParams, role: Role) -> Self {
        let key = PollKey::from_challenge(&params.challenge);
        let strategy = strategy(params.spec.kind);
        let tally = crate::tally::PollTally::new(
            key.clone(),
            params.spec.kind,
            params.now,
            params.duration,
            params.tally,
        )
        .shared();
        Self {
            key,
            caller: params.caller,
            caller_is_local: params.caller_is_local,
            challenge: params.challenge,
            verifier: params.verifier,
            created_at: params.now,
            deadline: params.now.plus(params.duration),
            state: PollState::Initing,
            tally,
            content: params.content,
            algorithm: params.algorithm,
            strategy,
            role,
            replay: None,
            spec: params.spec,
        }
    }

    pub fn key(&self) -> &PollKey {
        &self.key
    }

    pub fn spec(&self) -> &PollSpec {
        &self.spec
    }

    pub fn kind(&self) -> PollKind {
        self.spec.kind
    }

    pub fn version(&self) -> ProtocolVersion {
        self.strategy.version
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn caller(&self) -> &PeerId {
        &self.caller
    }

    pub fn is_my_poll(&self) -> bool {
        self.caller_is_local
    }

    pub fn challenge(&self) -> &Nonce {
        &self.challenge
    }

    pub fn verifier(&self) -> &Nonce {
        &self.verifier
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn deadline(&self) -> Timestamp {
        self.deadline
    }

    pub fn tally(&self) -> SharedTally {
        Arc::clone(&self.tally)
    }

    pub fn is_replaying(&self) -> bool {
        self.replay.is_some()
    }

    /// Terminal and not busy replaying: the manager may retire it.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal() && self.replay.is_none()
    }

    /// Role-specific status line (V3 poller/voter status strings).
    pub fn status(&self) -> String {
        match &self.role {
            Role::Poller(s) => s.status.as_str().to_string(),
            Role::Voter(s) => s.status.as_str().to_string(),
            Role::V1(_) | Role::Verify(_) => self.state.as_str().to_string(),
        }
    }

    /// Estimated time for one hash of this poll's content.
    pub(crate) fn hash_estimate(&self, ctx: &PollCtx<'_>) -> u64 {
        match self.spec.kind {
            PollKind::Name => ctx.config.poll.name_hash_estimate,
            _ => self.content.estimated_hash_duration(),
        }
    }

    /// Route one event to this poll's handler.
    pub fn handle(&mut self, event: PollEvent, ctx: &mut PollCtx<'_>) {
        match event {
            PollEvent::HashDone {
                purpose: HashPurpose::Replay { index },
                result,
            } => crate::replay::on_hash_done(self, index, result, ctx),
            PollEvent::Abort => self.abort(ctx),
            event => (self.strategy.handler)(self, event, ctx),
        }
    }

    fn abort(&mut self, ctx: &mut PollCtx<'_>) {
        if self.state.is_terminal() {
            return;
        }
        match &mut self.role {
            Role::Poller(s) => s.status = v3::PollerStatus::Aborted,
            Role::Voter(s) => s.status = v3::VoterStatus::Aborted,
            Role::V1(_) | Role::Verify(_) => {}
        }
        info!(poll = %self.key, "poll aborted");
        let result = lock_tally(&self.tally).finish_with(TallyResult::Error);
        self.conclude(result, ctx, Findings::default());
    }

    pub(crate) fn header(&self, opcode: Opcode, sender: PeerId, now: Timestamp) -> MessageHeader {
        MessageHeader {
            version: self.strategy.version,
            opcode,
            sender,
            au_id: self.spec.au_id.clone(),
            plugin_id: self.spec.plugin_id.clone(),
            url: self.spec.url.clone(),
            lower: self.spec.lower.clone(),
            upper: self.spec.upper.clone(),
            duration: self.deadline.remaining_from(now),
            challenge: self.challenge.clone(),
            verifier: self.verifier.clone(),
            hash_algorithm: self.algorithm.name().to_string(),
            sent_at: now,
        }
    }

    /// A message in this poll from the local node.
    pub(crate) fn message(
        &self,
        opcode: Opcode,
        body: MessageBody,
        ctx: &PollCtx<'_>,
    ) -> LcapMessage {
        LcapMessage::new(self.header(opcode, ctx.local(), ctx.now()), body)
    }

    pub(crate) fn hash_request(
        &self,
        purpose: HashPurpose,
        verifier: Nonce,
        estimate: u64,
        deadline: Timestamp,
    ) -> HashRequest {
        HashRequest {
            key: self.key.clone(),
            purpose,
            input: self.strategy.hash_input.unwrap_or(HashInput::Content),
            content: Arc::clone(&self.content),
            algorithm: self.algorithm,
            challenge: self.challenge.clone(),
            verifier,
            estimate,
            deadline,
        }
    }

    /// Enter an error state and retire with an ERROR result.
    pub(crate) fn fail(&mut self, state: PollState, ctx: &mut PollCtx<'_>, reason: &str) {
        debug_assert!(state.is_error());
        info!(poll = %self.key, state = state.as_str(), reason, "poll failed");
        self.state = state;
        let result = lock_tally(&self.tally).finish_with(TallyResult::Error);
        self.conclude(result, ctx, Findings::default());
    }

    /// Record the final result and report it. Error states are kept.
    pub(crate) fn conclude(&mut self, result: TallyResult, ctx: &mut PollCtx<'_>, findings: Findings) {
        if !self.state.is_error() {
            self.state = PollState::Complete;
        }
        let (agree, disagree) = {
            let tally = lock_tally(&self.tally);
            (tally.num_agree(), tally.num_disagree())
        };
        info!(
            poll = %self.key,
            kind = %self.spec.kind,
            result = result.as_str(),
            agree,
            disagree,
            "poll complete"
        );
        if result == TallyResult::TooClose {
            ctx.alert(Alert {
                kind: AlertKind::TooClose,
                key: self.key.clone(),
                au_id: self.spec.au_id.clone(),
                url: self.spec.url.clone(),
                detail: format!("poll too close to call: {agree} agree, {disagree} disagree"),
            });
        }
        let outcome = PollOutcome {
            key: self.key.clone(),
            kind: self.spec.kind,
            spec: self.spec.clone(),
            result,
            caller_is_local: self.caller_is_local,
            agree,
            disagree,
            finished_at: ctx.now(),
            missing_locally: findings.missing_locally,
            extra_locally: findings.extra_locally,
            repaired: findings.repaired,
        };
        ctx.finished(&outcome);
        debug!(poll = %self.key, "poll retired");
    }
}

/// What a finished poll found beyond its result.
#[derive(Clone, Debug, Default)]
pub(crate) struct Findings {
    pub missing_locally: Vec<String>,
    pub extra_locally: Vec<String>,
    pub repaired: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_table_matches_kinds() {
        for kind in [
            PollKind::Name,
            PollKind::Content,
            PollKind::Verify,
            PollKind::Poller,
            PollKind::Voter,
        ] {
            let s = strategy(kind);
            assert_eq!(s.kind, kind);
            assert_eq!(s.version, kind.version());
            assert_eq!(s.request_opcode.version(), kind.version());
        }
        assert!(strategy(PollKind::Verify).hash_input.is_none());
        assert!(strategy(PollKind::Name).reconcile_names);
    }

    #[test]
    fn error_states_are_terminal() {
        assert!(PollState::ErrIo.is_terminal());
        assert!(PollState::Complete.is_terminal());
        assert!(!PollState::Complete.is_error());
        assert!(!PollState::WaitTally.is_terminal());
    }
}
