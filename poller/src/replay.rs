//! Re-checking a completed poll's votes against current content.
//!
//! Votes are re-hashed strictly one at a time and the tally is rebuilt from
//! zero. If any hash fails the original tally, votes and result are restored.

use lcap_types::time::MINUTE;
use lcap_types::PollKind;
use tracing::{info, warn};

use crate::context::PollCtx;
use crate::event::HashPurpose;
use crate::hashing::HashOutput;
use crate::poll::{Poll, PollState};
use crate::tally::{lock_tally, PollTally, VoteRecord};
use crate::PollError;

pub(crate) struct VoteReplay {
    saved: PollTally,
    votes: Vec<VoteRecord>,
    next: usize,
}

impl Poll {
    /// Begin replaying this poll's votes. Only completed vote polls replay.
    pub fn start_replay(&mut self, ctx: &mut PollCtx<'_>) -> Result<(), PollError> {
        if self.state != PollState::Complete || self.replay.is_some() {
            return Err(PollError::ProtocolMismatch(format!(
                "poll {} cannot replay in state {}",
                self.key,
                self.state.as_str()
            )));
        }
        if !matches!(self.spec.kind, PollKind::Name | PollKind::Content) {
            return Err(PollError::ProtocolMismatch(format!(
                "{} polls do not replay",
                self.spec.kind
            )));
        }
        let (saved, votes) = {
            let mut tally = lock_tally(&self.tally);
            let saved = tally.clone();
            (saved, tally.take_votes())
        };
        info!(poll = %self.key, votes = votes.len(), "replaying votes");
        self.replay = Some(VoteReplay {
            saved,
            votes,
            next: 0,
        });
        schedule_next(self, ctx);
        Ok(())
    }
}

fn schedule_next(poll: &mut Poll, ctx: &mut PollCtx<'_>) {
    let Some(replay) = &poll.replay else {
        return;
    };
    let index = replay.next;
    let Some(record) = replay.votes.get(index) else {
        let result = lock_tally(&poll.tally).finish(false);
        poll.replay = None;
        info!(poll = %poll.key, result = result.as_str(), "replay complete");
        return;
    };
    let verifier = record.vote.verifier.clone();
    let estimate = poll.hash_estimate(ctx);
    let deadline = ctx.now().plus(estimate.saturating_mul(4).max(MINUTE));
    let request = poll.hash_request(HashPurpose::Replay { index }, verifier, estimate, deadline);
    if !ctx.schedule_hash(request) {
        restore(poll, "replay hash refused");
    }
}

pub(crate) fn on_hash_done(
    poll: &mut Poll,
    index: usize,
    result: Result<HashOutput, PollError>,
    ctx: &mut PollCtx<'_>,
) {
    let Some(replay) = &mut poll.replay else {
        return;
    };
    if replay.next != index {
        return;
    }
    let output = match result {
        Ok(output) => output,
        Err(e) => {
            warn!(poll = %poll.key, error = %e, "replay hash failed");
            restore(poll, "replay hash failed");
            return;
        }
    };
    let record = &replay.votes[index];
    let mut vote = record.vote.undecided();
    let weight = record.weight;
    replay.next += 1;
    let counted = vote
        .decide(&output.digest)
        .and_then(|_| lock_tally(&poll.tally).add_vote(vote, weight));
    if let Err(e) = counted {
        warn!(poll = %poll.key, error = %e, "replayed vote not counted");
        restore(poll, "replayed vote not counted");
        return;
    }
    schedule_next(poll, ctx);
}

fn restore(poll: &mut Poll, reason: &str) {
    if let Some(replay) = poll.replay.take() {
        *lock_tally(&poll.tally) = replay.saved;
        warn!(poll = %poll.key, reason, "replay aborted, tally restored");
    }
}
