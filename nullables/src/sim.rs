//! Simulated peers: several poll managers exchanging messages on one
//! deterministic clock.
//!
//! Events (message deliveries, finished hashes, timers) sit in a single queue
//! ordered by due time and insertion order. Hashes take their estimated time,
//! messages take a fixed latency, and nothing runs until the test steps the
//! simulation.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use lcap_messages::LcapMessage;
use lcap_poller::{
    Alert, EngineConfig, Environment, HashRequest, HashScheduler, HashTaskId, PollError,
    PollManager, PollOutcome, PollSpec, PollTimer,
};
use lcap_types::{PeerId, PollKey, Timestamp};
use tracing::debug;

use crate::{NullContentSource, NullIdentityManager, NullRandom};

pub const DEFAULT_LATENCY: u64 = 50;

enum SimEvent {
    Deliver {
        to: PeerId,
        message: LcapMessage,
    },
    HashDone {
        node: PeerId,
        task: HashTaskId,
        request: HashRequest,
    },
    Timer {
        node: PeerId,
        key: PollKey,
        timer: PollTimer,
    },
}

#[derive(Default)]
struct EventQueue {
    seq: u64,
    events: BTreeMap<(Timestamp, u64), SimEvent>,
}

impl EventQueue {
    fn push(&mut self, at: Timestamp, event: SimEvent) {
        self.seq += 1;
        self.events.insert((at, self.seq), event);
    }

    fn next_due(&self) -> Option<Timestamp> {
        self.events.keys().next().map(|(at, _)| *at)
    }

    fn pop(&mut self) -> Option<(Timestamp, SimEvent)> {
        self.events.pop_first().map(|((at, _), event)| (at, event))
    }
}

/// One simulated peer.
pub struct SimNode {
    pub id: PeerId,
    pub manager: PollManager,
    pub identity: Arc<NullIdentityManager>,
    pub content: Arc<NullContentSource>,
    scheduler: HashScheduler<()>,
    outcomes: Vec<PollOutcome>,
    alerts: Vec<Alert>,
    sent: usize,
}

impl SimNode {
    pub fn outcomes(&self) -> &[PollOutcome] {
        &self.outcomes
    }

    pub fn outcome(&self, key: &PollKey) -> Option<&PollOutcome> {
        self.outcomes.iter().find(|o| &o.key == key)
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    /// Messages this node has sent (a broadcast counts once).
    pub fn sent(&self) -> usize {
        self.sent
    }
}

struct SimEnv<'a> {
    local: &'a PeerId,
    now: Timestamp,
    latency: u64,
    peers: &'a [PeerId],
    queue: &'a mut EventQueue,
    scheduler: &'a mut HashScheduler<()>,
    outcomes: &'a mut Vec<PollOutcome>,
    alerts: &'a mut Vec<Alert>,
    sent: &'a mut usize,
}

impl Environment for SimEnv<'_> {
    fn now(&self) -> Timestamp {
        self.now
    }

    fn schedule_hash(&mut self, request: HashRequest) -> bool {
        match self.scheduler.schedule(
            request.key.clone(),
            request.estimate,
            request.deadline,
            self.now,
            (),
        ) {
            Ok(task) => {
                let done_at = self.now.plus(request.estimate.max(1));
                self.queue.push(
                    done_at,
                    SimEvent::HashDone {
                        node: self.local.clone(),
                        task,
                        request,
                    },
                );
                true
            }
            Err(e) => {
                debug!(node = %self.local, error = %e, "simulated hash refused");
                false
            }
        }
    }

    fn can_hash_before(&self, estimate: u64, deadline: Timestamp) -> bool {
        self.scheduler.can_schedule(estimate, deadline, self.now)
    }

    fn send(&mut self, message: LcapMessage, to: Option<&PeerId>) -> Result<(), PollError> {
        *self.sent += 1;
        let at = self.now.plus(self.latency);
        match to {
            Some(peer) => self.queue.push(
                at,
                SimEvent::Deliver {
                    to: peer.clone(),
                    message,
                },
            ),
            None => {
                for peer in self.peers.iter().filter(|p| *p != self.local) {
                    self.queue.push(
                        at,
                        SimEvent::Deliver {
                            to: peer.clone(),
                            message: message.clone(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn set_timer(&mut self, key: &PollKey, at: Timestamp, timer: PollTimer) {
        self.queue.push(
            at.max(self.now),
            SimEvent::Timer {
                node: self.local.clone(),
                key: key.clone(),
                timer,
            },
        );
    }

    fn alert(&mut self, alert: Alert) {
        self.alerts.push(alert);
    }

    fn poll_finished(&mut self, outcome: &PollOutcome) {
        self.outcomes.push(outcome.clone());
    }
}

pub struct Simulation {
    now: Timestamp,
    latency: u64,
    config: EngineConfig,
    random: NullRandom,
    queue: EventQueue,
    nodes: BTreeMap<PeerId, SimNode>,
    offline: HashSet<PeerId>,
}

impl Simulation {
    pub fn new(config: EngineConfig, seed: u64) -> Self {
        Self {
            now: Timestamp::new(1_000_000),
            latency: DEFAULT_LATENCY,
            config,
            random: NullRandom::new(seed),
            queue: EventQueue::default(),
            nodes: BTreeMap::new(),
            offline: HashSet::new(),
        }
    }

    pub fn set_latency(&mut self, latency: u64) {
        self.latency = latency;
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Add a peer that knows, and is known by, every existing peer.
    pub fn add_node(&mut self, name: &str) -> Result<PeerId, PollError> {
        let id = PeerId::new(name);
        let identity = Arc::new(
            NullIdentityManager::new(id.clone()).with_peers(self.nodes.keys().cloned()),
        );
        for node in self.nodes.values() {
            node.identity.add_peer(id.clone());
        }
        let content = Arc::new(NullContentSource::new());
        let manager = PollManager::new(
            self.config.clone(),
            identity.clone(),
            content.clone(),
            self.random.rng(),
        )?;
        self.nodes.insert(
            id.clone(),
            SimNode {
                id: id.clone(),
                manager,
                identity,
                content,
                scheduler: HashScheduler::from_config(&self.config.scheduler),
                outcomes: Vec::new(),
                alerts: Vec::new(),
                sent: 0,
            },
        );
        Ok(id)
    }

    pub fn node(&self, id: &PeerId) -> Option<&SimNode> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &PeerId) -> Option<&mut SimNode> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SimNode> {
        self.nodes.values()
    }

    /// Messages to an offline peer are dropped.
    pub fn set_offline(&mut self, id: &PeerId, offline: bool) {
        if offline {
            self.offline.insert(id.clone());
        } else {
            self.offline.remove(id);
        }
    }

    /// Run `f` against one node's manager with that node's environment.
    pub fn on_node<R>(
        &mut self,
        id: &PeerId,
        f: impl FnOnce(&mut PollManager, &mut dyn Environment) -> R,
    ) -> Option<R> {
        let peers: Vec<PeerId> = self.nodes.keys().cloned().collect();
        let SimNode {
            id: local,
            manager,
            scheduler,
            outcomes,
            alerts,
            sent,
            ..
        } = self.nodes.get_mut(id)?;
        let mut env = SimEnv {
            local: &*local,
            now: self.now,
            latency: self.latency,
            peers: &peers,
            queue: &mut self.queue,
            scheduler,
            outcomes,
            alerts,
            sent,
        };
        Some(f(manager, &mut env))
    }

    pub fn call_poll(&mut self, caller: &PeerId, spec: PollSpec) -> Result<PollKey, PollError> {
        self.on_node(caller, |manager, env| manager.call_poll(spec, env))
            .unwrap_or_else(|| Err(PollError::Io(format!("no simulated node {caller}"))))
    }

    /// Process the next event; false once the queue is empty.
    pub fn step(&mut self) -> bool {
        let Some((at, event)) = self.queue.pop() else {
            return false;
        };
        self.now = self.now.max(at);
        match event {
            SimEvent::Deliver { to, message } => {
                if self.offline.contains(&to) {
                    debug!(to = %to, opcode = ?message.opcode(), "dropped message to offline peer");
                    return true;
                }
                let result = self.on_node(&to, |manager, env| manager.handle_message(message, env));
                if let Some(Err(e)) = result {
                    debug!(to = %to, error = %e, "message not handled");
                }
            }
            SimEvent::HashDone {
                node,
                task,
                request,
            } => {
                if let Some(n) = self.nodes.get_mut(&node) {
                    n.scheduler.complete(task);
                }
                let result = request.run();
                let HashRequest { key, purpose, .. } = request;
                self.on_node(&node, |manager, env| {
                    manager.on_hash_done(&key, purpose, result, env)
                });
            }
            SimEvent::Timer { node, key, timer } => {
                self.on_node(&node, |manager, env| manager.on_timer(&key, timer, env));
            }
        }
        true
    }

    /// Process every event due at or before `at`, then move the clock there.
    pub fn run_until(&mut self, at: Timestamp) {
        while self.queue.next_due().is_some_and(|due| due <= at) {
            self.step();
        }
        self.now = self.now.max(at);
    }

    pub fn run_for(&mut self, millis: u64) {
        self.run_until(self.now.plus(millis));
    }

    /// Run until nothing is left to do; returns the number of events processed.
    pub fn run_to_completion(&mut self) -> usize {
        let mut steps = 0;
        while self.step() {
            steps += 1;
        }
        steps
    }
}
