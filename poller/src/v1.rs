//! V1 symmetric polls: name and content polls, and verify polls.
//!
//! Every participant hashes the range with the poll's challenge and its own
//! verifier, broadcasts the digest at a jittered vote time, and checks each
//! peer's vote by re-hashing with that peer's verifier. The tally decides at
//! the deadline.

use std::collections::HashMap;

use lcap_crypto::verifier_for_secret;
use lcap_messages::{LcapMessage, MessageBody};
use lcap_types::{Digest, PeerId, PollKind, Timestamp};
use tracing::{debug, info, warn};

use crate::collab::ReputationDelta;
use crate::context::{PollCtx, PollRequest};
use crate::event::{HashPurpose, PollEvent, PollTimer};
use crate::hashing::HashOutput;
use crate::poll::{Findings, Poll, PollState, Role};
use crate::reconcile;
use crate::tally::{lock_tally, TallyResult};
use crate::vote::Vote;
use crate::PollError;

/// State of a name or content poll.
#[derive(Debug, Default)]
pub(crate) struct VoteState {
    pub(crate) vote_time: Option<Timestamp>,
    pub(crate) my_digest: Option<Digest>,
    /// Votes whose check hash is in flight, by voter.
    pub(crate) pending: HashMap<PeerId, Vote>,
    pub(crate) voted: bool,
}

/// State of a verify poll.
#[derive(Debug, Default)]
pub(crate) struct VerifyState {
    /// The voter being audited, when this node called the poll.
    pub(crate) target: Option<PeerId>,
    /// Whether this node answered with its secret.
    pub(crate) replied: bool,
}

/// `[now + rem/2 - rem/4, now + rem/2 + rem/4]`
pub(crate) fn vote_window(now: Timestamp, remaining: u64) -> (u64, u64) {
    let mid = now.as_millis() + remaining / 2;
    (mid - remaining / 4, mid + remaining / 4)
}

fn vote_state(poll: &mut Poll) -> Option<&mut VoteState> {
    match &mut poll.role {
        Role::V1(state) => Some(state),
        _ => None,
    }
}

pub(crate) fn handle(poll: &mut Poll, event: PollEvent, ctx: &mut PollCtx<'_>) {
    match event {
        PollEvent::Start => start(poll, ctx),
        PollEvent::Message(msg) => receive_vote(poll, msg, ctx),
        PollEvent::HashDone {
            purpose: HashPurpose::OwnVote,
            result,
        } => own_hash_done(poll, result, ctx),
        PollEvent::HashDone {
            purpose: HashPurpose::VoteCheck { voter },
            result,
        } => vote_check_done(poll, voter, result, ctx),
        PollEvent::Timer(PollTimer::Vote) => {
            if poll.state == PollState::WaitVote {
                cast_vote(poll, ctx);
            }
        }
        PollEvent::Timer(PollTimer::Deadline) => {
            if !poll.state.is_terminal() {
                stop(poll, ctx);
            }
        }
        other => debug!(poll = %poll.key, event = ?other, "ignoring event"),
    }
}

fn start(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    if poll.state != PollState::Initing {
        return;
    }
    let now = ctx.now();
    let estimate = poll.hash_estimate(ctx);
    let quorum = ctx.config.poll.quorum as u64;
    let last_hash = now.plus(estimate.saturating_mul(quorum + 1));
    let (mut min, mut max) = vote_window(now, poll.deadline.remaining_from(now));

    poll.state = PollState::WaitHash;
    let mut scheduled = None;
    for _ in 0..2 {
        let vote_at = Timestamp::new(ctx.random_between(min, max + 1));
        let request = poll.hash_request(
            HashPurpose::OwnVote,
            poll.verifier.clone(),
            estimate,
            vote_at,
        );
        if ctx.schedule_hash(request) {
            scheduled = Some(vote_at);
            break;
        }
        if vote_at >= last_hash {
            break;
        }
        max += vote_at.as_millis() - min;
        min = vote_at.as_millis();
    }

    let Some(vote_at) = scheduled else {
        poll.fail(PollState::ErrScheduleHash, ctx, "no hash time before vote");
        return;
    };
    if let Some(state) = vote_state(poll) {
        state.vote_time = Some(vote_at);
    }
    ctx.set_timer(&poll.key, poll.deadline, PollTimer::Deadline);

    if poll.caller_is_local {
        let request = poll.message(poll.strategy.request_opcode, MessageBody::Empty, ctx);
        if let Err(e) = ctx.send(request, None) {
            warn!(poll = %poll.key, error = %e, "poll request not sent");
            poll.fail(PollState::ErrIo, ctx, "poll request not sent");
            return;
        }
    }
    debug!(poll = %poll.key, vote_at = %vote_at, "hash scheduled");
}

fn own_hash_done(poll: &mut Poll, result: Result<HashOutput, PollError>, ctx: &mut PollCtx<'_>) {
    if poll.state != PollState::WaitHash {
        debug!(poll = %poll.key, "stale hash result");
        return;
    }
    let output = match result {
        Ok(output) => output,
        Err(e) => {
            warn!(poll = %poll.key, error = %e, "hashing failed");
            poll.fail(PollState::ErrHashing, ctx, "hashing failed");
            return;
        }
    };
    poll.state = PollState::WaitVote;
    let now = ctx.now();
    let vote_at = match vote_state(poll) {
        Some(state) => {
            state.my_digest = Some(output.digest);
            state.vote_time.unwrap_or(now)
        }
        None => now,
    };
    if vote_at.has_passed(now) {
        cast_vote(poll, ctx);
    } else {
        ctx.set_timer(&poll.key, vote_at, PollTimer::Vote);
    }
}

fn cast_vote(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    poll.state = PollState::WaitTally;
    if lock_tally(&poll.tally).is_lead_enough() {
        info!(poll = %poll.key, "lead already decisive, not voting");
        return;
    }
    let Some(digest) = vote_state(poll).and_then(|s| s.my_digest.clone()) else {
        return;
    };
    let entries = (poll.spec.kind == PollKind::Name).then(|| poll.content.child_names());
    let Some(opcode) = poll.strategy.vote_opcode else {
        return;
    };
    let vote = poll.message(opcode, MessageBody::V1Vote { digest, entries }, ctx);
    match ctx.send(vote, None) {
        Ok(()) => {
            if let Some(state) = vote_state(poll) {
                state.voted = true;
            }
            debug!(poll = %poll.key, "vote sent");
        }
        Err(e) => warn!(poll = %poll.key, error = %e, "vote not sent"),
    }
}

fn receive_vote(poll: &mut Poll, msg: LcapMessage, ctx: &mut PollCtx<'_>) {
    if msg.opcode() == poll.strategy.request_opcode {
        debug!(poll = %poll.key, "duplicate poll request");
        return;
    }
    if Some(msg.opcode()) != poll.strategy.vote_opcode {
        debug!(poll = %poll.key, opcode = ?msg.opcode(), "unexpected message");
        return;
    }
    if poll.state.is_terminal() {
        return;
    }
    let voter = msg.sender().clone();
    if ctx.identity.is_local(&voter) {
        return;
    }

    let already = lock_tally(&poll.tally).has_voted(&voter)
        || vote_state(poll).is_some_and(|s| s.pending.contains_key(&voter));
    if already {
        let change = ctx.change_reputation(&voter, ReputationDelta::ReplayDetected);
        lock_tally(&poll.tally).adjust_weight(&voter, change);
        warn!(poll = %poll.key, peer = %voter, "replayed vote");
        return;
    }
    if lock_tally(&poll.tally).is_lead_enough() {
        debug!(poll = %poll.key, peer = %voter, "lead enough, vote not checked");
        return;
    }
    let cap = ctx.config.poll.quorum + 1;
    if vote_state(poll).is_some_and(|s| s.pending.len() > cap) {
        debug!(poll = %poll.key, peer = %voter, "too many vote checks in flight");
        return;
    }
    let now = ctx.now();
    let estimate = poll.hash_estimate(ctx);
    if poll.deadline.remaining_from(now) < estimate {
        debug!(poll = %poll.key, peer = %voter, "too late to check vote");
        return;
    }
    let vote = match Vote::from_message(&msg, now) {
        Ok(vote) => vote,
        Err(e) => {
            debug!(poll = %poll.key, error = %e, "bad vote");
            return;
        }
    };
    let request = poll.hash_request(
        HashPurpose::VoteCheck {
            voter: voter.clone(),
        },
        vote.verifier.clone(),
        estimate,
        poll.deadline,
    );
    if !ctx.schedule_hash(request) {
        debug!(poll = %poll.key, peer = %voter, "no time to check vote");
        return;
    }
    if let Some(state) = vote_state(poll) {
        state.pending.insert(voter, vote);
    }
}

fn vote_check_done(
    poll: &mut Poll,
    voter: PeerId,
    result: Result<HashOutput, PollError>,
    ctx: &mut PollCtx<'_>,
) {
    let Some(mut vote) = vote_state(poll).and_then(|s| s.pending.remove(&voter)) else {
        debug!(poll = %poll.key, peer = %voter, "stale vote check");
        return;
    };
    if poll.state.is_terminal() {
        return;
    }
    let output = match result {
        Ok(output) => output,
        Err(e) => {
            warn!(poll = %poll.key, peer = %voter, error = %e, "vote check failed");
            return;
        }
    };
    let Ok(agree) = vote.decide(&output.digest) else {
        return;
    };
    let verifier = vote.verifier.clone();
    let weight = ctx.identity.reputation(&voter);
    if let Err(e) = lock_tally(&poll.tally).add_vote(vote, weight) {
        debug!(poll = %poll.key, peer = %voter, error = %e, "vote not counted");
        return;
    }
    debug!(poll = %poll.key, peer = %voter, agree, weight, "vote checked");

    if poll.strategy.random_verify && !ctx.identity.is_local(&voter) {
        let rep = f64::from(weight) / f64::from(ctx.identity.max_reputation().max(1));
        let p = if agree {
            (1.0 - rep) * ctx.config.poll.agree_verify
        } else {
            rep * ctx.config.poll.disagree_verify
        };
        if ctx.chance(p) {
            let now = ctx.now();
            let (lo, hi) = vote_window(now, poll.deadline.remaining_from(now));
            let duration = ctx.random_between(lo, hi + 1) - now.as_millis();
            if duration > 0 {
                ctx.request(PollRequest::Verify {
                    spec: poll.spec.with_kind(PollKind::Verify),
                    challenge: verifier,
                    target: voter,
                    duration,
                    algorithm: poll.algorithm.name().to_string(),
                });
            }
        }
    }
}

fn stop(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    let (result, records) = {
        let mut tally = lock_tally(&poll.tally);
        let result = tally.finish(poll.state.is_error());
        (result, tally.records().to_vec())
    };

    // Voters on the winning side gain reputation, the others lose it.
    if matches!(result, TallyResult::Won | TallyResult::Lost) {
        let won = result == TallyResult::Won;
        for record in &records {
            let delta = if record.vote.is_agree() == won {
                ReputationDelta::AgreeVote
            } else {
                ReputationDelta::DisagreeVote
            };
            ctx.identity.change_reputation(&record.vote.voter, delta);
        }
    }

    let mut findings = Findings::default();
    let tied = result == TallyResult::TooClose && {
        let tally = lock_tally(&poll.tally);
        tally.num_agree() <= tally.num_disagree()
    };
    if poll.strategy.reconcile_names
        && poll.caller_is_local
        && (result == TallyResult::Lost || tied)
    {
        let local = poll.content.child_names();
        if let Some(plan) = reconcile::reconcile(&poll.spec, &local, &records) {
            if let Some(spec) = plan.sub_poll.clone() {
                info!(poll = %poll.key, sub = %spec, "narrowing name poll");
                ctx.request(PollRequest::SubPoll { spec });
            }
            findings.missing_locally = plan.missing_locally;
            findings.extra_locally = plan.extra_locally;
        }
    }
    poll.conclude(result, ctx, findings);
}

// ── Verify polls ─────────────────────────────────────────────────────────

fn verify_state(poll: &mut Poll) -> Option<&mut VerifyState> {
    match &mut poll.role {
        Role::Verify(state) => Some(state),
        _ => None,
    }
}

pub(crate) fn handle_verify(poll: &mut Poll, event: PollEvent, ctx: &mut PollCtx<'_>) {
    match event {
        PollEvent::Start if poll.state == PollState::Initing => {
            if poll.caller_is_local {
                start_verify(poll, ctx);
            } else {
                answer_verify(poll, ctx);
            }
        }
        PollEvent::Message(msg) => receive_secret(poll, msg, ctx),
        PollEvent::Timer(PollTimer::Deadline) if !poll.state.is_terminal() => {
            finish_verify(poll, ctx);
        }
        other => debug!(poll = %poll.key, event = ?other, "ignoring event"),
    }
}

fn start_verify(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    let Some(target) = verify_state(poll).and_then(|s| s.target.clone()) else {
        poll.fail(PollState::ErrIo, ctx, "verify poll has no target");
        return;
    };
    let request = poll.message(poll.strategy.request_opcode, MessageBody::Empty, ctx);
    if let Err(e) = ctx.send(request, Some(&target)) {
        warn!(poll = %poll.key, peer = %target, error = %e, "verify request not sent");
        poll.fail(PollState::ErrIo, ctx, "verify request not sent");
        return;
    }
    poll.state = PollState::WaitTally;
    ctx.set_timer(&poll.key, poll.deadline, PollTimer::Deadline);
    debug!(poll = %poll.key, peer = %target, "verify requested");
}

/// We are the audited voter: prove the verifier by revealing its secret.
fn answer_verify(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    let replied = match ctx.secret_for(&poll.challenge) {
        Some(secret) => {
            let reply = poll.message(
                poll.strategy.vote_opcode.unwrap_or(poll.strategy.request_opcode),
                MessageBody::VerifyReply { secret },
                ctx,
            );
            let caller = poll.caller.clone();
            match ctx.send(reply, Some(&caller)) {
                Ok(()) => true,
                Err(e) => {
                    warn!(poll = %poll.key, error = %e, "verify reply not sent");
                    false
                }
            }
        }
        None => false,
    };
    if let Some(state) = verify_state(poll) {
        state.replied = replied;
    }
    let result = lock_tally(&poll.tally).finish_verify(false, replied);
    poll.conclude(result, ctx, Findings::default());
}

fn receive_secret(poll: &mut Poll, msg: LcapMessage, ctx: &mut PollCtx<'_>) {
    if poll.state != PollState::WaitTally {
        return;
    }
    let target = verify_state(poll).and_then(|s| s.target.clone());
    if target.as_ref() != Some(msg.sender()) {
        debug!(poll = %poll.key, peer = %msg.sender(), "verify reply from unexpected peer");
        return;
    }
    let MessageBody::VerifyReply { secret } = &msg.body else {
        debug!(poll = %poll.key, "verify reply without secret");
        return;
    };
    let verified = verifier_for_secret(secret) == poll.challenge;
    let mut vote = Vote::new(
        poll.challenge.clone(),
        msg.header.verifier.clone(),
        Digest::new(secret.as_bytes().to_vec()),
        msg.sender().clone(),
        ctx.now(),
    );
    // A fresh vote is always undecided.
    let _ = vote.set_agree(verified);
    let weight = ctx.identity.reputation(msg.sender());
    if let Err(e) = lock_tally(&poll.tally).add_vote(vote, weight) {
        debug!(poll = %poll.key, error = %e, "verify reply not counted");
    }
    finish_verify(poll, ctx);
}

fn finish_verify(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    let (target, replied) = match verify_state(poll) {
        Some(state) => (state.target.clone(), state.replied),
        None => (None, false),
    };
    let result = lock_tally(&poll.tally).finish_verify(poll.caller_is_local, replied);
    if let Some(target) = target {
        let delta = match result {
            TallyResult::Verified => Some(ReputationDelta::VoteVerified),
            TallyResult::Disowned => Some(ReputationDelta::VoteDisowned),
            TallyResult::Unverified => Some(ReputationDelta::VoteNotVerified),
            _ => None,
        };
        if let Some(delta) = delta {
            ctx.identity.change_reputation(&target, delta);
        }
    }
    poll.conclude(result, ctx, Findings::default());
}
