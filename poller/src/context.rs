//! What a poll can reach while handling one event.
//!
//! [`PollCtx`] bundles the node [`Environment`] with the manager-owned pieces a
//! poll may touch: the secret registry, the seeded RNG, the identity store,
//! configuration, repair policy, and a queue of follow-up poll requests that the
//! manager processes once the current event has been handled.

use std::collections::HashMap;

use lcap_crypto::{generate_nonce, verifier_for_secret};
use lcap_messages::LcapMessage;
use lcap_types::{Nonce, PeerId, PollKey, Timestamp};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::collab::{IdentityManager, ReputationDelta};
use crate::config::EngineConfig;
use crate::event::{Alert, Environment, PollOutcome, PollTimer};
use crate::hashing::HashRequest;
use crate::repair::RepairPolicy;
use crate::spec::PollSpec;
use crate::PollError;

/// Secrets behind the verifiers this node has handed out.
#[derive(Debug, Default)]
pub struct SecretRegistry {
    entries: HashMap<Nonce, (Nonce, Timestamp)>,
}

impl SecretRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a fresh secret and return its verifier; the secret is kept until
    /// `expires`.
    pub fn make_verifier(&mut self, rng: &mut StdRng, expires: Timestamp) -> Nonce {
        let secret = generate_nonce(rng);
        let verifier = verifier_for_secret(&secret);
        self.entries.insert(verifier.clone(), (secret, expires));
        verifier
    }

    pub fn secret_for(&self, verifier: &Nonce) -> Option<&Nonce> {
        self.entries.get(verifier).map(|(secret, _)| secret)
    }

    /// Whether `verifier` was issued by this node.
    pub fn is_own(&self, verifier: &Nonce) -> bool {
        self.entries.contains_key(verifier)
    }

    /// Drop entries past their expiry; returns how many were dropped.
    pub fn expire(&mut self, now: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires)| !expires.has_passed(now));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Follow-up polls a poll asks the manager to start.
#[derive(Clone, Debug, PartialEq)]
pub enum PollRequest {
    /// Audit `target`'s vote: `challenge` is the verifier it voted with.
    Verify {
        spec: PollSpec,
        challenge: Nonce,
        target: PeerId,
        duration: u64,
        algorithm: String,
    },
    /// A narrower name poll over a disputed sub-range.
    SubPoll { spec: PollSpec },
}

pub struct PollCtx<'a> {
    pub env: &'a mut dyn Environment,
    pub identity: &'a dyn IdentityManager,
    pub config: &'a EngineConfig,
    pub repair: &'a RepairPolicy,
    pub(crate) secrets: &'a mut SecretRegistry,
    pub(crate) rng: &'a mut StdRng,
    pub(crate) requests: &'a mut Vec<PollRequest>,
}

impl<'a> PollCtx<'a> {
    pub fn new(
        env: &'a mut dyn Environment,
        identity: &'a dyn IdentityManager,
        config: &'a EngineConfig,
        repair: &'a RepairPolicy,
        secrets: &'a mut SecretRegistry,
        rng: &'a mut StdRng,
        requests: &'a mut Vec<PollRequest>,
    ) -> Self {
        Self {
            env,
            identity,
            config,
            repair,
            secrets,
            rng,
            requests,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.env.now()
    }

    pub fn local(&self) -> PeerId {
        self.identity.local_identity()
    }

    /// Uniform in `[lo, hi)`; `lo` when the range is empty.
    pub fn random_between(&mut self, lo: u64, hi: u64) -> u64 {
        if hi <= lo {
            lo
        } else {
            self.rng.gen_range(lo..hi)
        }
    }

    /// True with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.gen::<f64>() < p
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut *self.rng);
    }

    pub fn nonce(&mut self) -> Nonce {
        generate_nonce(&mut *self.rng)
    }

    pub fn make_verifier(&mut self, expires: Timestamp) -> Nonce {
        self.secrets.make_verifier(&mut *self.rng, expires)
    }

    pub fn secret_for(&self, verifier: &Nonce) -> Option<Nonce> {
        self.secrets.secret_for(verifier).cloned()
    }

    pub fn schedule_hash(&mut self, request: HashRequest) -> bool {
        self.env.schedule_hash(request)
    }

    pub fn send(&mut self, message: LcapMessage, to: Option<&PeerId>) -> Result<(), PollError> {
        self.env.send(message, to)
    }

    pub fn set_timer(&mut self, key: &PollKey, at: Timestamp, timer: PollTimer) {
        self.env.set_timer(key, at, timer);
    }

    pub fn alert(&mut self, alert: Alert) {
        self.env.alert(alert);
    }

    pub fn finished(&mut self, outcome: &PollOutcome) {
        self.env.poll_finished(outcome);
    }

    pub fn request(&mut self, request: PollRequest) {
        self.requests.push(request);
    }

    /// Apply a reputation delta and return the change in the peer's weight.
    pub fn change_reputation(&mut self, peer: &PeerId, delta: ReputationDelta) -> i64 {
        let before = i64::from(self.identity.reputation(peer));
        self.identity.change_reputation(peer, delta);
        i64::from(self.identity.reputation(peer)) - before
    }
}
