//! Vote tallies and result classification.
//!
//! Each vote record keeps the voter weight it was counted with, so the agree /
//! disagree counts and weight sums are always a fold over the record list.
//! A tally is shared between its poll and the status reporter behind one
//! mutex ([`SharedTally`]).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lcap_types::{PeerId, PollKey, PollKind, Timestamp};
use serde::{Deserialize, Serialize};

use crate::vote::Vote;
use crate::PollError;

/// Final (or pending) outcome of a poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TallyResult {
    Pending,
    Error,
    NoQuorum,
    TooClose,
    Untrusted,
    Won,
    Lost,
    Unverified,
    Verified,
    Disowned,
}

impl TallyResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Error => "Error",
            Self::NoQuorum => "No Quorum",
            Self::TooClose => "Too Close",
            Self::Untrusted => "Untrusted",
            Self::Won => "Won",
            Self::Lost => "Lost",
            Self::Unverified => "Unverified",
            Self::Verified => "Verified",
            Self::Disowned => "Disowned",
        }
    }
}

/// Thresholds used to classify a tally.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TallyParams {
    pub quorum: usize,
    pub margin: f64,
    pub trusted_weight: u32,
}

impl Default for TallyParams {
    fn default() -> Self {
        Self {
            quorum: 5,
            margin: 0.75,
            trusted_weight: 350,
        }
    }
}

/// A counted vote and the weight it carries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub vote: Vote,
    pub weight: u32,
}

#[derive(Clone, Debug)]
pub struct PollTally {
    key: PollKey,
    kind: PollKind,
    started_at: Timestamp,
    duration: u64,
    params: TallyParams,
    num_agree: usize,
    num_disagree: usize,
    wt_agree: u64,
    wt_disagree: u64,
    records: Vec<VoteRecord>,
    result: TallyResult,
    frozen: bool,
}

pub type SharedTally = Arc<Mutex<PollTally>>;

/// Lock a shared tally. A poisoned lock still holds a consistent tally since
/// every mutation completes before returning.
pub fn lock_tally(tally: &SharedTally) -> MutexGuard<'_, PollTally> {
    tally.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PollTally {
    pub fn new(
        key: PollKey,
        kind: PollKind,
        started_at: Timestamp,
        duration: u64,
        params: TallyParams,
    ) -> Self {
        Self {
            key,
            kind,
            started_at,
            duration,
            params,
            num_agree: 0,
            num_disagree: 0,
            wt_agree: 0,
            wt_disagree: 0,
            records: Vec::new(),
            result: TallyResult::Pending,
            frozen: false,
        }
    }

    pub fn shared(self) -> SharedTally {
        Arc::new(Mutex::new(self))
    }

    pub fn key(&self) -> &PollKey {
        &self.key
    }

    pub fn kind(&self) -> PollKind {
        self.kind
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn params(&self) -> TallyParams {
        self.params
    }

    pub fn num_agree(&self) -> usize {
        self.num_agree
    }

    pub fn num_disagree(&self) -> usize {
        self.num_disagree
    }

    pub fn weight_agree(&self) -> u64 {
        self.wt_agree
    }

    pub fn weight_disagree(&self) -> u64 {
        self.wt_disagree
    }

    pub fn records(&self) -> &[VoteRecord] {
        &self.records
    }

    pub fn result(&self) -> TallyResult {
        self.result
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn has_voted(&self, voter: &PeerId) -> bool {
        self.records.iter().any(|r| &r.vote.voter == voter)
    }

    /// Count a decided vote.
    pub fn add_vote(&mut self, vote: Vote, weight: u32) -> Result<(), PollError> {
        if self.frozen {
            return Err(PollError::TallyFrozen(self.key.clone()));
        }
        let Some(agree) = vote.agree() else {
            return Err(PollError::ProtocolMismatch(format!(
                "undecided vote from {}",
                vote.voter
            )));
        };
        if self.has_voted(&vote.voter) {
            return Err(PollError::ProtocolMismatch(format!(
                "{} already voted",
                vote.voter
            )));
        }
        if agree {
            self.num_agree += 1;
            self.wt_agree += u64::from(weight);
        } else {
            self.num_disagree += 1;
            self.wt_disagree += u64::from(weight);
        }
        self.records.push(VoteRecord { vote, weight });
        Ok(())
    }

    /// Shift a counted voter's weight by `delta`, e.g. after a reputation
    /// penalty. Returns false when the voter has no counted vote.
    pub fn adjust_weight(&mut self, voter: &PeerId, delta: i64) -> bool {
        let Some(record) = self.records.iter_mut().find(|r| &r.vote.voter == voter) else {
            return false;
        };
        let old = u64::from(record.weight);
        let new = (i64::from(record.weight) + delta).clamp(0, i64::from(u32::MAX)) as u32;
        record.weight = new;
        let sum = if record.vote.is_agree() {
            &mut self.wt_agree
        } else {
            &mut self.wt_disagree
        };
        *sum = *sum - old + u64::from(new);
        true
    }

    pub fn have_quorum(&self) -> bool {
        self.num_agree + self.num_disagree >= self.params.quorum
    }

    /// Whether one side already leads by more than a quorum, so further votes
    /// (including our own) cannot change the outcome.
    pub fn is_lead_enough(&self) -> bool {
        self.num_agree.abs_diff(self.num_disagree) > self.params.quorum
    }

    /// Share of the counted votes held by the larger side (1.0 when empty).
    pub fn margin(&self) -> f64 {
        let total = self.num_agree + self.num_disagree;
        if total == 0 {
            return 1.0;
        }
        self.num_agree.max(self.num_disagree) as f64 / total as f64
    }

    /// Classify the current counts without freezing.
    ///
    /// Order: error, no quorum, too close, untrusted, then won or lost.
    pub fn classify(&self, failed: bool) -> TallyResult {
        if failed {
            return TallyResult::Error;
        }
        if !self.have_quorum() {
            return TallyResult::NoQuorum;
        }
        if self.margin() < self.params.margin {
            return TallyResult::TooClose;
        }
        if self.num_agree > self.num_disagree {
            return TallyResult::Won;
        }
        let avg_disagree = self.wt_disagree / self.num_disagree.max(1) as u64;
        if avg_disagree < u64::from(self.params.trusted_weight) {
            TallyResult::Untrusted
        } else {
            TallyResult::Lost
        }
    }

    /// Compute and freeze the final result of a name or content poll.
    pub fn finish(&mut self, failed: bool) -> TallyResult {
        if !self.frozen {
            self.result = self.classify(failed);
            self.frozen = true;
        }
        self.result
    }

    /// Freeze a verify poll's result.
    ///
    /// With a local caller the single reply (if any) decides; with a remote
    /// caller the poll is verified once this node's reply went out.
    pub fn finish_verify(&mut self, caller_is_local: bool, replied: bool) -> TallyResult {
        if self.frozen {
            return self.result;
        }
        self.result = if caller_is_local {
            match self.records.first().map(|r| r.vote.is_agree()) {
                None => TallyResult::Unverified,
                Some(true) => TallyResult::Verified,
                Some(false) => TallyResult::Disowned,
            }
        } else if replied {
            TallyResult::Verified
        } else {
            TallyResult::Unverified
        };
        self.frozen = true;
        self.result
    }

    /// Freeze with an externally decided result (V3 voters, aborts).
    pub fn finish_with(&mut self, result: TallyResult) -> TallyResult {
        if !self.frozen {
            self.result = result;
            self.frozen = true;
        }
        self.result
    }

    /// Drop every counted vote and unfreeze, returning the old records.
    pub fn take_votes(&mut self) -> Vec<VoteRecord> {
        self.num_agree = 0;
        self.num_disagree = 0;
        self.wt_agree = 0;
        self.wt_disagree = 0;
        self.result = TallyResult::Pending;
        self.frozen = false;
        std::mem::take(&mut self.records)
    }

    /// Whether counts and sums equal a fold over the vote records.
    pub fn check_consistency(&self) -> bool {
        let (na, nd, wa, wd) = self.records.iter().fold((0, 0, 0u64, 0u64), |acc, r| {
            if r.vote.is_agree() {
                (acc.0 + 1, acc.1, acc.2 + u64::from(r.weight), acc.3)
            } else {
                (acc.0, acc.1 + 1, acc.2, acc.3 + u64::from(r.weight))
            }
        });
        na == self.num_agree && nd == self.num_disagree && wa == self.wt_agree && wd == self.wt_disagree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lcap_types::{Digest, Nonce};
    use proptest::prelude::*;

    fn tally() -> PollTally {
        PollTally::new(
            PollKey::from_challenge(&Nonce::new(vec![1; 20])),
            PollKind::Content,
            Timestamp::new(0),
            60_000,
            TallyParams::default(),
        )
    }

    fn decided(voter: &str, agree: bool) -> Vote {
        let mut v = Vote::new(
            Nonce::new(vec![1; 20]),
            Nonce::new(vec![2; 20]),
            Digest::new(vec![3; 32]),
            PeerId::new(voter),
            Timestamp::new(5),
        );
        v.set_agree(agree).unwrap();
        v
    }

    fn fill(t: &mut PollTally, agree: usize, disagree: usize, weight: u32) {
        for i in 0..agree {
            t.add_vote(decided(&format!("a{i}"), true), weight).unwrap();
        }
        for i in 0..disagree {
            t.add_vote(decided(&format!("d{i}"), false), weight).unwrap();
        }
    }

    #[test]
    fn four_to_one_wins() {
        let mut t = tally();
        fill(&mut t, 4, 1, 500);
        assert_eq!(t.finish(false), TallyResult::Won);
    }

    #[test]
    fn three_to_two_is_too_close() {
        let mut t = tally();
        fill(&mut t, 3, 2, 500);
        assert_eq!(t.finish(false), TallyResult::TooClose);
    }

    #[test]
    fn below_quorum() {
        let mut t = tally();
        fill(&mut t, 4, 0, 500);
        assert_eq!(t.classify(false), TallyResult::NoQuorum);
    }

    #[test]
    fn failure_overrides_counts() {
        let mut t = tally();
        fill(&mut t, 6, 0, 500);
        assert_eq!(t.finish(true), TallyResult::Error);
    }

    #[test]
    fn loss_against_light_voters_is_untrusted() {
        let mut t = tally();
        fill(&mut t, 1, 5, 100);
        assert_eq!(t.classify(false), TallyResult::Untrusted);
    }

    #[test]
    fn loss_against_heavy_voters_is_lost() {
        let mut t = tally();
        fill(&mut t, 1, 5, 800);
        assert_eq!(t.classify(false), TallyResult::Lost);
    }

    #[test]
    fn frozen_tally_refuses_votes() {
        let mut t = tally();
        fill(&mut t, 5, 0, 500);
        t.finish(false);
        assert!(matches!(
            t.add_vote(decided("late", true), 500),
            Err(PollError::TallyFrozen(_))
        ));
        assert_eq!(t.finish(true), TallyResult::Won);
    }

    #[test]
    fn duplicate_voter_rejected() {
        let mut t = tally();
        t.add_vote(decided("x", true), 500).unwrap();
        assert!(t.add_vote(decided("x", false), 500).is_err());
        assert_eq!(t.num_agree(), 1);
        assert_eq!(t.num_disagree(), 0);
    }

    #[test]
    fn lead_enough_needs_more_than_quorum() {
        let mut t = tally();
        fill(&mut t, 5, 0, 500);
        assert!(!t.is_lead_enough());
        t.add_vote(decided("extra", true), 500).unwrap();
        assert!(t.is_lead_enough());
    }

    #[test]
    fn weight_adjustment_keeps_sums_consistent() {
        let mut t = tally();
        fill(&mut t, 2, 2, 500);
        assert!(t.adjust_weight(&PeerId::new("d0"), -20));
        assert_eq!(t.weight_disagree(), 980);
        assert!(t.adjust_weight(&PeerId::new("a1"), -600));
        assert_eq!(t.weight_agree(), 500);
        assert!(!t.adjust_weight(&PeerId::new("nobody"), 10));
        assert!(t.check_consistency());
    }

    #[test]
    fn verify_results() {
        let mut local_none = tally();
        assert_eq!(local_none.finish_verify(true, false), TallyResult::Unverified);

        let mut local_ok = tally();
        local_ok.add_vote(decided("v", true), 500).unwrap();
        assert_eq!(local_ok.finish_verify(true, false), TallyResult::Verified);

        let mut local_bad = tally();
        local_bad.add_vote(decided("v", false), 500).unwrap();
        assert_eq!(local_bad.finish_verify(true, false), TallyResult::Disowned);

        assert_eq!(tally().finish_verify(false, true), TallyResult::Verified);
        assert_eq!(tally().finish_verify(false, false), TallyResult::Unverified);
    }

    #[test]
    fn take_votes_resets_counts() {
        let mut t = tally();
        fill(&mut t, 3, 3, 400);
        t.finish(false);
        let old = t.take_votes();
        assert_eq!(old.len(), 6);
        assert_eq!(t.num_agree() + t.num_disagree(), 0);
        assert!(!t.is_frozen());
        assert!(t.check_consistency());
    }

    proptest! {
        #[test]
        fn quorum_matches_vote_count(votes in prop::collection::vec((any::<bool>(), 0u32..1000), 0..12)) {
            let mut t = tally();
            for (i, (agree, weight)) in votes.iter().enumerate() {
                t.add_vote(decided(&format!("p{i}"), *agree), *weight).unwrap();
            }
            prop_assert_eq!(t.have_quorum(), t.num_agree() + t.num_disagree() >= 5);
            prop_assert!(t.check_consistency());
        }

        #[test]
        fn classification_ignores_vote_order(mut votes in prop::collection::vec(any::<bool>(), 0..12)) {
            let mut forward = tally();
            for (i, agree) in votes.iter().enumerate() {
                forward.add_vote(decided(&format!("p{i}"), *agree), 500).unwrap();
            }
            votes.reverse();
            let mut backward = tally();
            for (i, agree) in votes.iter().enumerate() {
                backward.add_vote(decided(&format!("p{i}"), *agree), 500).unwrap();
            }
            prop_assert_eq!(forward.classify(false), backward.classify(false));
            prop_assert_eq!(forward.have_quorum(), backward.have_quorum());
        }
    }
}
