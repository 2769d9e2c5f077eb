//! Per-version poll factories: duration calculation, request validation and
//! poll construction.

use std::sync::Arc;

use lcap_crypto::DigestAlgorithm;
use lcap_messages::MessageHeader;
use lcap_types::{Nonce, PeerId, PollKind, ProtocolVersion, Timestamp};
use tracing::{debug, info};

use crate::collab::ContentRange;
use crate::config::EngineConfig;
use crate::context::PollCtx;
use crate::poll::{Poll, PollParams, Role};
use crate::spec::PollSpec;
use crate::tally::TallyParams;
use crate::v1::{VerifyState, VoteState};
use crate::v3::poller::PollerState;
use crate::v3::voter::VoterState;
use crate::PollError;

/// Everything needed to build a poll once it has been admitted.
pub struct CreatePoll {
    pub spec: PollSpec,
    pub caller: PeerId,
    pub caller_is_local: bool,
    pub challenge: Nonce,
    pub verifier: Nonce,
    pub now: Timestamp,
    pub duration: u64,
    pub content: Arc<dyn ContentRange>,
    pub algorithm: &'static dyn DigestAlgorithm,
    /// Verify polls called here: the voter being audited.
    pub target: Option<PeerId>,
    /// V3 voters: the vote deadline from the invitation.
    pub vote_deadline: Option<Timestamp>,
}

pub trait PollFactory: Send + Sync {
    fn version(&self) -> ProtocolVersion;

    /// Duration for a new local poll, or `None` when nothing fits the schedule.
    fn calc_duration(
        &self,
        spec: &PollSpec,
        content: &dyn ContentRange,
        ctx: &mut PollCtx<'_>,
    ) -> Option<u64>;

    /// Reject inbound requests this factory cannot serve.
    fn validate_request(&self, header: &MessageHeader, kind: PollKind) -> Result<(), PollError> {
        if header.version != self.version() || kind.version() != self.version() {
            return Err(PollError::ProtocolMismatch(format!(
                "{} poll at version {} offered to version {} factory",
                kind,
                header.version,
                self.version()
            )));
        }
        if header.duration == 0 {
            return Err(PollError::ProtocolMismatch(format!(
                "{kind} poll with zero duration"
            )));
        }
        Ok(())
    }

    fn create_poll(&self, args: CreatePoll, config: &EngineConfig) -> Result<Poll, PollError>;
}

/// First duration in `min..=max`, stepping by `incr`, for which `fits` holds.
/// The last probe is clamped to `max`.
pub fn find_schedulable_duration(
    min: u64,
    max: u64,
    incr: u64,
    mut fits: impl FnMut(u64) -> bool,
) -> Option<u64> {
    let incr = incr.max(1);
    let mut dur = min;
    while dur <= max.saturating_add(incr - 1) {
        dur = dur.min(max);
        if fits(dur) {
            debug!(duration = dur, "poll duration schedulable");
            return Some(dur);
        }
        if dur >= max {
            break;
        }
        dur += incr;
    }
    info!(max, "cannot schedule poll");
    None
}

/// Whether `hash` ms of work fits in a poll lasting `dur`.
pub fn can_poll_be_scheduled(dur: u64, hash: u64, ctx: &PollCtx<'_>) -> bool {
    if hash > dur {
        return false;
    }
    ctx.env.can_hash_before(hash, ctx.now().plus(dur))
}

fn params(args: CreatePoll, tally: TallyParams) -> PollParams {
    PollParams {
        spec: args.spec,
        caller: args.caller,
        caller_is_local: args.caller_is_local,
        challenge: args.challenge,
        verifier: args.verifier,
        now: args.now,
        duration: args.duration,
        content: args.content,
        algorithm: args.algorithm,
        tally,
    }
}

// ── V1 ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default)]
pub struct V1PollFactory;

impl V1PollFactory {
    /// Our estimate scaled up when this machine hashes faster than the
    /// slowest peer expected in the network.
    pub fn adjusted_estimate(estimate: u64, config: &EngineConfig) -> u64 {
        let slow = config.poll.slowest_hash_rate;
        match config.poll.my_hash_rate {
            Some(mine) if slow > 0 && mine > slow => estimate.saturating_mul(mine) / slow,
            _ => estimate,
        }
    }

    /// `(min, max)` content poll duration for a total hash time.
    pub fn content_bounds(total_hash: u64, config: &EngineConfig) -> (u64, u64) {
        let c = &config.poll;
        let min = total_hash
            .saturating_mul(c.duration_multiplier_min)
            .max(c.content_poll_min);
        let max = total_hash
            .saturating_mul(c.duration_multiplier_max)
            .min(c.content_poll_max)
            .max(c.content_poll_min);
        (min, max)
    }

    /// `(min, max)` name poll duration around the configured average.
    pub fn name_bounds(config: &EngineConfig) -> (u64, u64) {
        let avg = config.poll.name_poll_deadline;
        (avg - avg / 4, avg + avg / 4)
    }
}

impl PollFactory for V1PollFactory {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V1
    }

    fn calc_duration(
        &self,
        spec: &PollSpec,
        content: &dyn ContentRange,
        ctx: &mut PollCtx<'_>,
    ) -> Option<u64> {
        match spec.kind {
            PollKind::Name => {
                let (min, max) = Self::name_bounds(ctx.config);
                let start = ctx.random_between(min, max);
                let hash = ctx.config.poll.name_hash_estimate;
                let view: &PollCtx<'_> = ctx;
                find_schedulable_duration(start, max, hash, |dur| {
                    can_poll_be_scheduled(dur, hash, view)
                })
            }
            PollKind::Content => {
                let estimate =
                    Self::adjusted_estimate(content.estimated_hash_duration(), ctx.config);
                let total = estimate.saturating_mul(ctx.config.poll.quorum as u64 + 1);
                let (min, max) = Self::content_bounds(total, ctx.config);
                let view: &PollCtx<'_> = ctx;
                find_schedulable_duration(min, max, total, |dur| {
                    can_poll_be_scheduled(dur, total, view)
                })
            }
            // Verify durations come from the parent poll's vote window.
            _ => None,
        }
    }

    fn create_poll(&self, args: CreatePoll, config: &EngineConfig) -> Result<Poll, PollError> {
        if args.duration == 0 {
            return Err(PollError::ProtocolMismatch("zero poll duration".into()));
        }
        let role = match args.spec.kind {
            PollKind::Name | PollKind::Content => Role::V1(VoteState::default()),
            PollKind::Verify => Role::Verify(VerifyState {
                target: args.target.clone(),
                replied: false,
            }),
            other => {
                return Err(PollError::ProtocolMismatch(format!(
                    "V1 factory cannot create {other} polls"
                )))
            }
        };
        let tally = TallyParams {
            quorum: config.poll.quorum,
            margin: config.poll.vote_margin,
            trusted_weight: config.poll.trusted_weight,
        };
        debug!(kind = %args.spec.kind, spec = %args.spec, "creating V1 poll");
        Ok(Poll::new(params(args, tally), role))
    }
}

// ── V3 ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default)]
pub struct V3PollFactory;

impl V3PollFactory {
    /// Time voters get to hash and vote.
    pub fn vote_duration(estimate: u64, config: &EngineConfig) -> u64 {
        estimate
            .saturating_mul(config.v3.vote_multiplier)
            .saturating_add(config.v3.vote_padding)
    }

    /// Time the poller gets to check votes and collect repairs.
    pub fn tally_duration(estimate: u64, config: &EngineConfig) -> u64 {
        estimate
            .saturating_mul(config.v3.tally_multiplier)
            .saturating_add(config.v3.tally_padding)
    }

    /// Target poll duration, clamped to the configured bounds.
    pub fn target_duration(estimate: u64, config: &EngineConfig) -> u64 {
        let c = &config.v3;
        (Self::vote_duration(estimate, config) + Self::tally_duration(estimate, config))
            .saturating_add(c.receipt_padding)
            .clamp(c.min_poll_duration, c.max_poll_duration)
    }

    /// The vote phase's share of an actual poll `duration`.
    pub fn vote_deadline(now: Timestamp, duration: u64, estimate: u64, config: &EngineConfig) -> Timestamp {
        let vote = Self::vote_duration(estimate, config) as u128;
        let target = Self::target_duration(estimate, config).max(1) as u128;
        let share = (duration as u128 * vote / target).min(duration as u128);
        now.plus(share as u64)
    }
}

impl PollFactory for V3PollFactory {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::V3
    }

    fn calc_duration(
        &self,
        spec: &PollSpec,
        content: &dyn ContentRange,
        ctx: &mut PollCtx<'_>,
    ) -> Option<u64> {
        if spec.kind != PollKind::Poller {
            return None;
        }
        let view: &PollCtx<'_> = ctx;
        let c = &view.config.v3;
        let estimate = content.estimated_hash_duration();
        let target = Self::target_duration(estimate, view.config);
        let max = target
            .saturating_mul(c.max_extend)
            .min(c.max_poll_duration)
            .max(target);
        let incr = (target as f64 * (c.extend_multiplier - 1.0)).max(1.0) as u64;
        find_schedulable_duration(target, max, incr, |dur| {
            can_poll_be_scheduled(dur, estimate, view)
        })
    }

    fn create_poll(&self, args: CreatePoll, config: &EngineConfig) -> Result<Poll, PollError> {
        if args.duration == 0 {
            return Err(PollError::ProtocolMismatch("zero poll duration".into()));
        }
        let estimate = args.content.estimated_hash_duration();
        let role = match args.spec.kind {
            PollKind::Poller => {
                let vote_deadline = Self::vote_deadline(args.now, args.duration, estimate, config);
                Role::Poller(PollerState::new(vote_deadline))
            }
            PollKind::Voter => {
                let deadline = args.now.plus(args.duration);
                let vote_deadline = args.vote_deadline.unwrap_or(deadline).min(deadline);
                Role::Voter(VoterState::new(vote_deadline))
            }
            other => {
                return Err(PollError::ProtocolMismatch(format!(
                    "V3 factory cannot create {other} polls"
                )))
            }
        };
        let tally = TallyParams {
            quorum: config.v3.quorum,
            margin: config.poll.vote_margin,
            trusted_weight: config.poll.trusted_weight,
        };
        debug!(kind = %args.spec.kind, spec = %args.spec, "creating V3 poll");
        Ok(Poll::new(params(args, tally), role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lcap_types::time::{DAY, MINUTE, SECOND, WEEK};

    #[test]
    fn first_fitting_probe_wins() {
        let mut probes = Vec::new();
        let found = find_schedulable_duration(100, 1_000, 300, |d| {
            probes.push(d);
            d >= 650
        });
        assert_eq!(found, Some(700));
        assert_eq!(probes, vec![100, 400, 700]);
    }

    #[test]
    fn last_probe_is_clamped_to_max() {
        let mut probes = Vec::new();
        let found = find_schedulable_duration(100, 800, 300, |d| {
            probes.push(d);
            d == 800
        });
        assert_eq!(found, Some(800));
        assert_eq!(probes, vec![100, 400, 700, 800]);
    }

    #[test]
    fn nothing_fits() {
        let mut calls = 0;
        assert_eq!(
            find_schedulable_duration(100, 800, 300, |_| {
                calls += 1;
                false
            }),
            None
        );
        assert_eq!(calls, 4);
    }

    #[test]
    fn min_above_max_probes_nothing() {
        let mut probes = Vec::new();
        find_schedulable_duration(900, 800, 50, |d| {
            probes.push(d);
            false
        });
        assert!(probes.is_empty());
    }

    #[test]
    fn content_bounds_follow_multipliers() {
        let config = EngineConfig::default();
        // 10 min total hash: min 30 min, max 70 min.
        let (min, max) = V1PollFactory::content_bounds(10 * MINUTE, &config);
        assert_eq!(min, 30 * MINUTE);
        assert_eq!(max, 70 * MINUTE);

        // Tiny hash: both clamp up to the content minimum.
        let (min, max) = V1PollFactory::content_bounds(SECOND, &config);
        assert_eq!(min, config.poll.content_poll_min);
        assert_eq!(max, config.poll.content_poll_min);

        // Huge hash: max capped at the content maximum.
        let (_, max) = V1PollFactory::content_bounds(2 * DAY, &config);
        assert_eq!(max, config.poll.content_poll_max);
    }

    #[test]
    fn name_bounds_are_a_quarter_either_side() {
        let config = EngineConfig::default();
        let (min, max) = V1PollFactory::name_bounds(&config);
        assert_eq!(min, 10 * MINUTE - 10 * MINUTE / 4);
        assert_eq!(max, 10 * MINUTE + 10 * MINUTE / 4);
    }

    #[test]
    fn fast_machines_scale_their_estimate() {
        let mut config = EngineConfig::default();
        config.poll.my_hash_rate = Some(1_000);
        config.poll.slowest_hash_rate = 250;
        assert_eq!(V1PollFactory::adjusted_estimate(100, &config), 400);
        config.poll.my_hash_rate = Some(100);
        assert_eq!(V1PollFactory::adjusted_estimate(100, &config), 100);
        config.poll.my_hash_rate = None;
        assert_eq!(V1PollFactory::adjusted_estimate(100, &config), 100);
    }

    #[test]
    fn v3_target_duration() {
        let config = EngineConfig::default();
        // est 10 min: vote 45 min, tally 55 min, receipt 5 min.
        assert_eq!(
            V3PollFactory::target_duration(10 * MINUTE, &config),
            105 * MINUTE
        );
        assert_eq!(V3PollFactory::target_duration(0, &config), 15 * MINUTE);
        assert_eq!(
            V3PollFactory::target_duration(10 * WEEK, &config),
            config.v3.max_poll_duration
        );
    }

    #[test]
    fn v3_vote_deadline_scales_with_duration() {
        let config = EngineConfig::default();
        let est = 10 * MINUTE;
        let target = V3PollFactory::target_duration(est, &config);
        let now = Timestamp::new(0);
        let at_target = V3PollFactory::vote_deadline(now, target, est, &config);
        assert_eq!(at_target.as_millis(), 45 * MINUTE);
        let doubled = V3PollFactory::vote_deadline(now, target * 2, est, &config);
        assert_eq!(doubled.as_millis(), 90 * MINUTE);
    }
}
