//! The V3 voter: a node invited into another peer's poll.
//!
//! The voter reserves hashing time before the vote deadline or declines,
//! acknowledges with its nonce, nominates peers for the outer circle, hashes
//! its content block by block seeded with `(challenge, voter nonce)`, and
//! sends the vote once the poller asks for it. Afterwards it serves repairs the
//! repair policy allows and records the agreement carried by the poller's
//! evaluation receipt.

use lcap_messages::{LcapMessage, MessageBody, NakReason, Opcode, VoteBlock};
use lcap_types::{PeerId, Timestamp};
use tracing::{debug, info, warn};

use super::VoterStatus;
use crate::context::PollCtx;
use crate::event::{HashPurpose, PollEvent, PollTimer};
use crate::hashing::HashOutput;
use crate::poll::{Findings, Poll, PollState, Role};
use crate::tally::{lock_tally, TallyResult};
use crate::PollError;

pub(crate) struct VoterState {
    pub(crate) status: VoterStatus,
    pub(crate) vote_deadline: Timestamp,
    blocks: Option<Vec<VoteBlock>>,
    vote_requested: bool,
    pub(crate) agreement: Option<f64>,
}

impl VoterState {
    pub(crate) fn new(vote_deadline: Timestamp) -> Self {
        Self {
            status: VoterStatus::Initialized,
            vote_deadline,
            blocks: None,
            vote_requested: false,
            agreement: None,
        }
    }
}

/// Time kept free between finishing the hash and the vote deadline.
pub(crate) fn send_padding(estimate: u64, multiplier: f64, padding: u64) -> u64 {
    (estimate as f64 * multiplier) as u64 + padding
}

fn voter_state(poll: &mut Poll) -> Option<&mut VoterState> {
    match &mut poll.role {
        Role::Voter(state) => Some(state),
        _ => None,
    }
}

fn set_status(poll: &mut Poll, status: VoterStatus) {
    if let Some(state) = voter_state(poll) {
        state.status = status;
    }
}

fn status_of(poll: &mut Poll) -> Option<VoterStatus> {
    voter_state(poll).map(|s| s.status)
}

pub(crate) fn handle(poll: &mut Poll, event: PollEvent, ctx: &mut PollCtx<'_>) {
    match event {
        PollEvent::Start => start(poll, ctx),
        PollEvent::Message(msg) => receive(poll, msg, ctx),
        PollEvent::HashDone {
            purpose: HashPurpose::OwnVote,
            result,
        } => hash_done(poll, result, ctx),
        PollEvent::Timer(PollTimer::Deadline) => deadline_passed(poll, ctx),
        other => debug!(poll = %poll.key, event = ?other, "ignoring event"),
    }
}

fn to_caller(poll: &Poll, opcode: Opcode, body: MessageBody, ctx: &mut PollCtx<'_>) -> Result<(), PollError> {
    let msg = poll.message(opcode, body, ctx);
    ctx.send(msg, Some(&poll.caller))
}

fn start(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    if poll.state != PollState::Initing {
        return;
    }
    let now = ctx.now();
    let estimate = poll.hash_estimate(ctx);
    let v3 = &ctx.config.v3;
    let padding = send_padding(estimate, v3.vote_send_hash_multiplier, v3.vote_send_padding);
    let vote_deadline = match &poll.role {
        Role::Voter(state) => state.vote_deadline,
        _ => poll.deadline,
    };
    let hash_by = vote_deadline.minus(padding);

    let refusal = if hash_by <= now.plus(estimate) {
        Some("vote deadline too close")
    } else {
        let request = poll.hash_request(HashPurpose::OwnVote, poll.verifier.clone(), estimate, hash_by);
        (!ctx.schedule_hash(request)).then_some("hash scheduler full")
    };
    if let Some(reason) = refusal {
        info!(poll = %poll.key, caller = %poll.caller, reason, "no time to vote, declining");
        let nak = MessageBody::PollAck {
            voter_nonce: None,
            nak: Some(NakReason::NoTime),
        };
        if let Err(e) = to_caller(poll, Opcode::PollAck, nak, ctx) {
            warn!(poll = %poll.key, error = %e, "decline not sent");
        }
        set_status(poll, VoterStatus::NoTimeAvailable);
        poll.fail(PollState::ErrScheduleHash, ctx, "no time to vote");
        return;
    }

    let ack = MessageBody::PollAck {
        voter_nonce: Some(poll.verifier.clone()),
        nak: None,
    };
    if let Err(e) = to_caller(poll, Opcode::PollAck, ack, ctx) {
        warn!(poll = %poll.key, error = %e, "poll ack not sent");
        set_status(poll, VoterStatus::Error);
        poll.fail(PollState::ErrIo, ctx, "poll ack not sent");
        return;
    }
    poll.state = PollState::WaitHash;
    set_status(poll, VoterStatus::AcceptedPoll);
    ctx.set_timer(&poll.key, poll.deadline, PollTimer::Deadline);
    debug!(poll = %poll.key, hash_by = %hash_by, "accepted poll");
}

fn receive(poll: &mut Poll, msg: LcapMessage, ctx: &mut PollCtx<'_>) {
    if poll.state.is_terminal() {
        return;
    }
    if msg.sender() != &poll.caller {
        debug!(poll = %poll.key, peer = %msg.sender(), "message from someone other than the poller");
        return;
    }
    match (msg.opcode(), msg.body) {
        (Opcode::PollProof, _) => nominate(poll, ctx),
        (Opcode::VoteRequest, _) => {
            if let Some(state) = voter_state(poll) {
                state.vote_requested = true;
            }
            send_vote(poll, ctx);
        }
        (Opcode::RepairRequest, MessageBody::RepairRequest { url }) => serve_repair(poll, url, ctx),
        (Opcode::EvaluationReceipt, MessageBody::EvaluationReceipt { agreement }) => {
            receipt(poll, agreement, ctx)
        }
        (opcode, _) => debug!(poll = %poll.key, ?opcode, "unexpected message"),
    }
}

fn nominate(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    if status_of(poll) != Some(VoterStatus::AcceptedPoll) {
        return;
    }
    let caller = poll.caller.clone();
    let mut nominees: Vec<PeerId> = ctx
        .identity
        .known_peers()
        .into_iter()
        .filter(|p| *p != caller && !ctx.identity.is_local(p))
        .collect();
    ctx.shuffle(&mut nominees);
    nominees.truncate(ctx.config.v3.max_nominations);
    if nominees.len() < ctx.config.v3.min_nominations {
        debug!(poll = %poll.key, found = nominees.len(), "fewer nominees than wanted");
    }
    if let Err(e) = to_caller(poll, Opcode::Nominate, MessageBody::Nominate { nominees }, ctx) {
        warn!(poll = %poll.key, error = %e, "nominations not sent");
    }
    let hashed = voter_state(poll).is_some_and(|s| s.blocks.is_some());
    if !hashed {
        set_status(poll, VoterStatus::Hashing);
    }
}

fn hash_done(poll: &mut Poll, result: Result<HashOutput, PollError>, ctx: &mut PollCtx<'_>) {
    if poll.state != PollState::WaitHash {
        debug!(poll = %poll.key, "stale hash result");
        return;
    }
    let output = match result {
        Ok(output) => output,
        Err(e) => {
            warn!(poll = %poll.key, error = %e, "hashing failed");
            set_status(poll, VoterStatus::Error);
            poll.fail(PollState::ErrHashing, ctx, "hashing failed");
            return;
        }
    };
    poll.state = PollState::WaitVote;
    if let Some(state) = voter_state(poll) {
        state.blocks = Some(output.blocks);
    }
    send_vote(poll, ctx);
}

/// Send the vote once it is both hashed and requested.
fn send_vote(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    let Some(blocks) = voter_state(poll)
        .filter(|s| s.vote_requested && s.status != VoterStatus::Voted)
        .and_then(|s| s.blocks.clone())
    else {
        return;
    };
    match to_caller(poll, Opcode::Vote, MessageBody::Vote { blocks }, ctx) {
        Ok(()) => {
            poll.state = PollState::WaitTally;
            set_status(poll, VoterStatus::Voted);
            debug!(poll = %poll.key, "vote sent");
        }
        Err(e) => warn!(poll = %poll.key, error = %e, "vote not sent"),
    }
}

fn serve_repair(poll: &mut Poll, url: String, ctx: &mut PollCtx<'_>) {
    if status_of(poll) == Some(VoterStatus::Voted) {
        set_status(poll, VoterStatus::VoteAccepted);
    }
    if !poll.spec.matches(&url) {
        debug!(poll = %poll.key, url, "repair request outside the poll's range");
        return;
    }
    if !ctx.repair.serve_repair(&poll.caller, &poll.spec.au_id, &url) {
        info!(poll = %poll.key, peer = %poll.caller, url, "repair refused");
        return;
    }
    let content = match poll.content.read_url(&url) {
        Ok(content) => content,
        Err(e) => {
            warn!(poll = %poll.key, url, error = %e, "repair content unavailable");
            return;
        }
    };
    let body = MessageBody::Repair {
        url: url.clone(),
        content,
    };
    match to_caller(poll, Opcode::Repair, body, ctx) {
        Ok(()) => debug!(poll = %poll.key, url, "repair sent"),
        Err(e) => warn!(poll = %poll.key, url, error = %e, "repair not sent"),
    }
}

fn receipt(poll: &mut Poll, agreement: f64, ctx: &mut PollCtx<'_>) {
    let agreement = agreement.clamp(0.0, 1.0);
    ctx.identity
        .record_agreement(&poll.caller, &poll.spec.au_id, None, agreement);
    if let Some(state) = voter_state(poll) {
        state.agreement = Some(agreement);
        state.status = VoterStatus::Complete;
    }
    let result = if agreement >= ctx.config.poll.vote_margin {
        TallyResult::Won
    } else {
        TallyResult::Lost
    };
    info!(poll = %poll.key, agreement, "evaluation receipt");
    let result = lock_tally(&poll.tally).finish_with(result);
    poll.conclude(result, ctx, Findings::default());
}

fn deadline_passed(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    if poll.state.is_terminal() {
        return;
    }
    let status = match status_of(poll) {
        Some(VoterStatus::Voted | VoterStatus::VoteAccepted) => VoterStatus::Complete,
        _ => VoterStatus::ExpiredWithoutVoting,
    };
    set_status(poll, status);
    // No receipt: the outcome stays undecided.
    let result = lock_tally(&poll.tally).finish_with(TallyResult::Pending);
    poll.conclude(result, ctx, Findings::default());
}
