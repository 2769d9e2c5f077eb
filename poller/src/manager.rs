//! The poll manager: owns every poll on this node.
//!
//! The manager keeps the poll-key → poll registry and the verifier → secret
//! registry, admits new polls through the per-version factories after the
//! conflict check, routes each event to its poll, and retires finished polls
//! into a bounded history. Follow-up polls requested by a handler (verify
//! polls, narrower name polls) are started once that handler returns.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use lcap_crypto::{algorithm_by_name, generate_nonce};
use lcap_messages::{LcapMessage, MessageBody, NakReason, Opcode};
use lcap_types::{Nonce, PeerId, PollKey, PollKind, ProtocolVersion, Timestamp};
use lcap_utils::StatsCounter;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::collab::{ContentSource, IdentityManager};
use crate::config::EngineConfig;
use crate::context::{PollCtx, PollRequest, SecretRegistry};
use crate::event::{Environment, HashPurpose, PollEvent, PollTimer};
use crate::factory::{CreatePoll, PollFactory, V1PollFactory, V3PollFactory};
use crate::hashing::HashOutput;
use crate::poll::Poll;
use crate::repair::RepairPolicy;
use crate::spec::PollSpec;
use crate::status::{PollStatusRow, StatusSnapshot};
use crate::PollError;

pub const STAT_POLLS_CALLED: &str = "polls_called";
pub const STAT_POLLS_CREATED: &str = "polls_created";
pub const STAT_POLLS_RETIRED: &str = "polls_retired";
pub const STAT_CONFLICTS: &str = "conflicts";
pub const STAT_ECHOES: &str = "echoes_suppressed";
pub const STAT_MISMATCHES: &str = "protocol_mismatches";
pub const STAT_UNKNOWN: &str = "unknown_polls";
pub const STAT_DECLINED: &str = "invitations_declined";
pub const STAT_SECRETS_EXPIRED: &str = "secrets_expired";

const STATS: &[&str] = &[
    STAT_POLLS_CALLED,
    STAT_POLLS_CREATED,
    STAT_POLLS_RETIRED,
    STAT_CONFLICTS,
    STAT_ECHOES,
    STAT_MISMATCHES,
    STAT_UNKNOWN,
    STAT_DECLINED,
    STAT_SECRETS_EXPIRED,
];

/// State every poll handler may reach through its [`PollCtx`].
struct Services {
    identity: Arc<dyn IdentityManager>,
    content: Arc<dyn ContentSource>,
    config: EngineConfig,
    repair: RepairPolicy,
    secrets: SecretRegistry,
    rng: StdRng,
}

struct Factories {
    v1: V1PollFactory,
    v3: V3PollFactory,
}

impl Factories {
    fn for_version(&self, version: ProtocolVersion) -> &dyn PollFactory {
        match version {
            ProtocolVersion::V1 => &self.v1,
            ProtocolVersion::V3 => &self.v3,
        }
    }
}

pub struct PollManager {
    polls: HashMap<PollKey, Poll>,
    recent: VecDeque<Poll>,
    services: Services,
    factories: Factories,
    stats: StatsCounter,
}

/// Build a [`PollCtx`] over the manager's services.
macro_rules! poll_ctx {
    ($services:expr, $env:expr, $requests:expr) => {
        PollCtx::new(
            $env,
            $services.identity.as_ref(),
            &$services.config,
            &$services.repair,
            &mut $services.secrets,
            &mut $services.rng,
            $requests,
        )
    };
}

impl PollManager {
    pub fn new(
        config: EngineConfig,
        identity: Arc<dyn IdentityManager>,
        content: Arc<dyn ContentSource>,
        rng: StdRng,
    ) -> Result<Self, PollError> {
        config.validate()?;
        let repair = RepairPolicy::new(config.repair.clone(), identity.clone(), content.clone());
        Ok(Self {
            polls: HashMap::new(),
            recent: VecDeque::new(),
            services: Services {
                identity,
                content,
                config,
                repair,
                secrets: SecretRegistry::new(),
                rng,
            },
            factories: Factories {
                v1: V1PollFactory,
                v3: V3PollFactory,
            },
            stats: StatsCounter::new(STATS),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    pub fn local(&self) -> PeerId {
        self.services.identity.local_identity()
    }

    pub fn stats(&self) -> &StatsCounter {
        &self.stats
    }

    pub fn repair_policy(&self) -> &RepairPolicy {
        &self.services.repair
    }

    pub fn active_count(&self) -> usize {
        self.polls.len()
    }

    pub fn is_active(&self, key: &PollKey) -> bool {
        self.polls.contains_key(key)
    }

    /// An active or recently completed poll.
    pub fn poll(&self, key: &PollKey) -> Option<&Poll> {
        self.polls
            .get(key)
            .or_else(|| self.recent.iter().find(|p| p.key() == key))
    }

    pub fn recent(&self) -> impl Iterator<Item = &Poll> {
        self.recent.iter()
    }

    pub fn secrets(&self) -> &SecretRegistry {
        &self.services.secrets
    }

    // ── Originating polls ────────────────────────────────────────────────

    /// Call a new poll on `spec` from this node.
    pub fn call_poll(&mut self, spec: PollSpec, env: &mut dyn Environment) -> Result<PollKey, PollError> {
        if matches!(spec.kind, PollKind::Verify | PollKind::Voter) {
            return Err(PollError::ProtocolMismatch(format!(
                "{} polls are not called directly",
                spec.kind
            )));
        }
        if let Some(existing) = self.find_conflict(&spec) {
            self.stats.increment(STAT_CONFLICTS);
            info!(spec = %spec, existing = %existing, "poll conflicts, not calling");
            return Err(PollError::Conflict { existing });
        }
        let content = self
            .services
            .content
            .resolve(&spec)
            .ok_or_else(|| PollError::ContentUnavailable(spec.to_string()))?;

        let duration = {
            let mut requests = Vec::new();
            let mut ctx = poll_ctx!(self.services, &mut *env, &mut requests);
            let factory = self.factories.for_version(spec.version());
            factory.calc_duration(&spec, content.as_ref(), &mut ctx)
        }
        .ok_or_else(|| PollError::Scheduling(format!("no schedulable duration for {spec}")))?;

        let now = env.now();
        let challenge = generate_nonce(&mut self.services.rng);
        let verifier = self.make_verifier(now, duration);
        let algorithm = algorithm_by_name(&self.services.config.poll.hash_algorithm)?;
        let local = self.local();
        let args = CreatePoll {
            spec,
            caller: local,
            caller_is_local: true,
            challenge,
            verifier,
            now,
            duration,
            content,
            algorithm,
            target: None,
            vote_deadline: None,
        };
        let key = self.admit(args, env)?;
        self.stats.increment(STAT_POLLS_CALLED);
        Ok(key)
    }

    /// Call a verify poll auditing `target`'s vote. `challenge` is the
    /// verifier that vote carried.
    pub fn call_verify(
        &mut self,
        spec: PollSpec,
        challenge: Nonce,
        target: PeerId,
        duration: u64,
        algorithm: &str,
        env: &mut dyn Environment,
    ) -> Result<PollKey, PollError> {
        let key = PollKey::from_challenge(&challenge);
        if self.polls.contains_key(&key) {
            return Ok(key);
        }
        let spec = spec.with_kind(PollKind::Verify);
        let content = self
            .services
            .content
            .resolve(&spec)
            .ok_or_else(|| PollError::ContentUnavailable(spec.to_string()))?;
        let now = env.now();
        let verifier = self.make_verifier(now, duration);
        let args = CreatePoll {
            spec,
            caller: self.local(),
            caller_is_local: true,
            challenge,
            verifier,
            now,
            duration,
            content,
            algorithm: algorithm_by_name(algorithm)?,
            target: Some(target.clone()),
            vote_deadline: None,
        };
        let key = self.admit(args, env)?;
        info!(poll = %key, peer = %target, "verify poll called");
        self.stats.increment(STAT_POLLS_CALLED);
        Ok(key)
    }

    fn make_verifier(&mut self, now: Timestamp, duration: u64) -> Nonce {
        let expires = now
            .plus(duration)
            .plus(self.services.config.poll.secret_slack);
        self.services
            .secrets
            .make_verifier(&mut self.services.rng, expires)
    }

    /// Create the poll, register it and start it.
    fn admit(&mut self, args: CreatePoll, env: &mut dyn Environment) -> Result<PollKey, PollError> {
        let version = args.spec.version();
        let poll = self
            .factories
            .for_version(version)
            .create_poll(args, &self.services.config)?;
        let key = poll.key().clone();
        debug!(poll = %key, kind = %poll.kind(), spec = %poll.spec(), "poll created");
        self.polls.insert(key.clone(), poll);
        self.stats.increment(STAT_POLLS_CREATED);
        self.dispatch(&key, PollEvent::Start, env);
        Ok(key)
    }

    /// First running poll `spec` would conflict with.
    fn find_conflict(&self, spec: &PollSpec) -> Option<PollKey> {
        if matches!(spec.kind, PollKind::Verify | PollKind::Voter) {
            return None;
        }
        self.polls
            .values()
            .filter(|p| !p.state().is_terminal())
            .filter(|p| !matches!(p.kind(), PollKind::Verify | PollKind::Voter))
            .find(|p| spec.conflicts_with(p.spec()))
            .map(|p| p.key().clone())
    }

    // ── Inbound messages ─────────────────────────────────────────────────

    /// Route one inbound message, creating a poll for a new request.
    pub fn handle_message(&mut self, msg: LcapMessage, env: &mut dyn Environment) -> Result<(), PollError> {
        let key = msg.poll_key();
        let opcode = msg.opcode();
        if opcode.is_poll_request() && self.services.secrets.is_own(&msg.header.verifier) {
            self.stats.increment(STAT_ECHOES);
            debug!(poll = %key, "own poll request echoed back");
            return Ok(());
        }

        if let Some(poll) = self.polls.get(&key) {
            let kind_mismatch = opcode.v1_kind().is_some_and(|k| k != poll.kind());
            if msg.header.version != poll.version() || kind_mismatch {
                self.stats.increment(STAT_MISMATCHES);
                debug!(poll = %key, ?opcode, version = %msg.header.version, "message does not match poll");
                return Err(PollError::ProtocolMismatch(format!(
                    "{opcode:?} for {} poll {key}",
                    poll.kind()
                )));
            }
            self.dispatch(&key, PollEvent::Message(msg), env);
            return Ok(());
        }

        if !opcode.is_poll_request() {
            self.stats.increment(STAT_UNKNOWN);
            debug!(poll = %key, ?opcode, peer = %msg.sender(), "message for unknown poll");
            return Err(PollError::UnknownPoll(key));
        }
        self.find_poll(msg, env).map(|_| ())
    }

    /// The poll `msg` belongs to, created from it when absent.
    pub fn find_poll(&mut self, msg: LcapMessage, env: &mut dyn Environment) -> Result<PollKey, PollError> {
        let key = msg.poll_key();
        if self.polls.contains_key(&key) {
            return Ok(key);
        }
        self.make_poll(msg, env)
    }

    /// Create a poll from an inbound request. Fails without side effects on
    /// conflict.
    pub fn make_poll(&mut self, msg: LcapMessage, env: &mut dyn Environment) -> Result<PollKey, PollError> {
        let header = &msg.header;
        let kind = match (header.version, msg.opcode()) {
            (ProtocolVersion::V3, Opcode::Poll) => PollKind::Voter,
            (_, opcode) => opcode.v1_kind().ok_or_else(|| {
                PollError::ProtocolMismatch(format!("{opcode:?} does not start a poll"))
            })?,
        };
        let factory = self.factories.for_version(header.version);
        if let Err(e) = factory.validate_request(header, kind) {
            self.stats.increment(STAT_MISMATCHES);
            debug!(error = %e, "poll request rejected");
            return Err(e);
        }
        let spec = PollSpec::from_header(header, kind);
        let caller = header.sender.clone();
        let caller_is_local = self.services.identity.is_local(&caller);

        match kind {
            PollKind::Verify => {
                let known = self.services.secrets.secret_for(&header.challenge).is_some();
                if !known && !caller_is_local {
                    debug!(peer = %caller, "verify request for a verifier we never issued");
                    return Err(PollError::ProtocolMismatch(
                        "verify request for unknown verifier".into(),
                    ));
                }
            }
            PollKind::Voter => {
                let voting = self
                    .polls
                    .values()
                    .filter(|p| p.kind() == PollKind::Voter)
                    .count();
                if voting >= self.services.config.v3.max_simultaneous_voters {
                    self.decline(&msg, NakReason::TooManyVoters, env);
                    return Err(PollError::CapacityReached(format!(
                        "{voting} polls already voting"
                    )));
                }
            }
            _ => {
                if let Some(existing) = self.find_conflict(&spec) {
                    self.stats.increment(STAT_CONFLICTS);
                    debug!(spec = %spec, existing = %existing, "inbound poll conflicts");
                    return Err(PollError::Conflict { existing });
                }
            }
        }

        let Some(content) = self.services.content.resolve(&spec) else {
            if kind == PollKind::Voter {
                self.decline(&msg, NakReason::NoAu, env);
            }
            return Err(PollError::ContentUnavailable(spec.to_string()));
        };
        let algorithm = algorithm_by_name(&header.hash_algorithm)?;
        let vote_deadline = match &msg.body {
            MessageBody::Poll { vote_deadline } => Some(*vote_deadline),
            _ => None,
        };
        let now = env.now();
        let duration = header.duration;
        let challenge = header.challenge.clone();
        let verifier = self.make_verifier(now, duration);
        let args = CreatePoll {
            spec,
            caller,
            caller_is_local,
            challenge,
            verifier,
            now,
            duration,
            content,
            algorithm,
            target: None,
            vote_deadline,
        };
        self.admit(args, env)
    }

    /// Refuse a V3 invitation without creating a poll.
    fn decline(&mut self, msg: &LcapMessage, reason: NakReason, env: &mut dyn Environment) {
        self.stats.increment(STAT_DECLINED);
        let now = env.now();
        let nonce = generate_nonce(&mut self.services.rng);
        let reply = msg.reply(
            Opcode::PollAck,
            self.local(),
            nonce,
            msg.header.duration,
            now,
            MessageBody::PollAck {
                voter_nonce: None,
                nak: Some(reason),
            },
        );
        info!(poll = %msg.poll_key(), peer = %msg.sender(), ?reason, "declining invitation");
        if let Err(e) = env.send(reply, Some(msg.sender())) {
            warn!(error = %e, "decline not sent");
        }
    }

    // ── Hash results, timers, control ────────────────────────────────────

    pub fn on_hash_done(
        &mut self,
        key: &PollKey,
        purpose: HashPurpose,
        result: Result<HashOutput, PollError>,
        env: &mut dyn Environment,
    ) {
        if !self.dispatch(key, PollEvent::HashDone { purpose, result }, env) {
            debug!(poll = %key, "hash result for retired poll");
        }
    }

    pub fn on_timer(&mut self, key: &PollKey, timer: PollTimer, env: &mut dyn Environment) {
        if !self.dispatch(key, PollEvent::Timer(timer), env) {
            debug!(poll = %key, ?timer, "timer for retired poll");
        }
    }

    /// Stop a running poll with an ERROR result.
    pub fn abort_poll(&mut self, key: &PollKey, env: &mut dyn Environment) -> Result<(), PollError> {
        if self.dispatch(key, PollEvent::Abort, env) {
            Ok(())
        } else {
            Err(PollError::UnknownPoll(key.clone()))
        }
    }

    /// Re-check a completed poll's votes against current content.
    pub fn replay_poll(&mut self, key: &PollKey, env: &mut dyn Environment) -> Result<(), PollError> {
        let mut poll = match self.recent.iter().position(|p| p.key() == key) {
            Some(i) => self.recent.remove(i).ok_or_else(|| PollError::UnknownPoll(key.clone()))?,
            None if self.polls.contains_key(key) => {
                return Err(PollError::ProtocolMismatch(format!(
                    "poll {key} is still running"
                )))
            }
            None => return Err(PollError::UnknownPoll(key.clone())),
        };
        let mut requests = Vec::new();
        let started = {
            let mut ctx = poll_ctx!(self.services, &mut *env, &mut requests);
            poll.start_replay(&mut ctx)
        };
        self.polls.insert(key.clone(), poll);
        self.retire_if_finished(key);
        started
    }

    /// Drop secrets past their expiry.
    pub fn expire_secrets(&mut self, now: Timestamp) -> usize {
        let dropped = self.services.secrets.expire(now);
        if dropped > 0 {
            self.stats.add(STAT_SECRETS_EXPIRED, dropped as u64);
            debug!(dropped, "secrets expired");
        }
        dropped
    }

    pub fn snapshot(&self, now: Timestamp) -> StatusSnapshot {
        let mut active: Vec<PollStatusRow> = self.polls.values().map(PollStatusRow::from_poll).collect();
        active.sort_by_key(|row| row.created_at);
        StatusSnapshot {
            local: self.local(),
            taken_at: now,
            active,
            recent: self.recent.iter().rev().map(PollStatusRow::from_poll).collect(),
            secrets: self.services.secrets.len(),
            stats: self.stats.snapshot(),
        }
    }

    // ── Dispatch ─────────────────────────────────────────────────────────

    /// Deliver `event` to poll `key`; false when no such poll is active.
    fn dispatch(&mut self, key: &PollKey, event: PollEvent, env: &mut dyn Environment) -> bool {
        let Some(poll) = self.polls.get_mut(key) else {
            return false;
        };
        let mut requests = Vec::new();
        {
            let mut ctx = poll_ctx!(self.services, &mut *env, &mut requests);
            poll.handle(event, &mut ctx);
        }
        self.retire_if_finished(key);
        self.process_requests(requests, env);
        true
    }

    fn retire_if_finished(&mut self, key: &PollKey) {
        if !self.polls.get(key).is_some_and(Poll::is_finished) {
            return;
        }
        let Some(poll) = self.polls.remove(key) else {
            return;
        };
        debug!(poll = %key, state = poll.state().as_str(), "poll retired to history");
        self.stats.increment(STAT_POLLS_RETIRED);
        self.recent.push_back(poll);
        while self.recent.len() > self.services.config.poll.recent_history {
            self.recent.pop_front();
        }
    }

    fn process_requests(&mut self, requests: Vec<PollRequest>, env: &mut dyn Environment) {
        for request in requests {
            let started = match request {
                PollRequest::Verify {
                    spec,
                    challenge,
                    target,
                    duration,
                    algorithm,
                } => self.call_verify(spec, challenge, target, duration, &algorithm, env),
                PollRequest::SubPoll { spec } => self.call_poll(spec, env),
            };
            if let Err(e) = started {
                info!(error = %e, "follow-up poll not started");
            }
        }
    }
}
