//! The poll-service actor.
//!
//! One tokio task owns the [`PollManager`] and consumes a single mailbox, so
//! every event for every poll is handled in arrival order and two events for
//! the same poll never run concurrently. Hashes run on blocking worker tasks
//! that pull from the shared scheduler and post their results back to the
//! mailbox; timers are sleeping tasks that do the same. Outbound messages go
//! through a channel to a transport task and are never awaited.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lcap_messages::LcapMessage;
use lcap_poller::{
    Alert, ContentSource, EngineConfig, Environment, HashOutput, HashPurpose, HashRequest,
    HashScheduler, HashTaskId, IdentityManager, PollError, PollManager, PollOutcome, PollSpec,
    PollTimer, StatusSnapshot, Transport,
};
use lcap_types::{PeerId, PollKey, Timestamp};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::PollMetrics;
use crate::shutdown::ShutdownController;
use crate::NodeError;

const OUTBOUND_CAPACITY: usize = 4096;
const OUTCOME_CAPACITY: usize = 256;

type SharedScheduler = Arc<Mutex<HashScheduler<HashRequest>>>;

fn lock(scheduler: &SharedScheduler) -> MutexGuard<'_, HashScheduler<HashRequest>> {
    scheduler.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything the poll-service mailbox accepts.
pub enum ServiceEvent {
    Inbound(LcapMessage),
    CallPoll {
        spec: PollSpec,
        reply: oneshot::Sender<Result<PollKey, PollError>>,
    },
    Abort {
        key: PollKey,
        reply: oneshot::Sender<Result<(), PollError>>,
    },
    Replay {
        key: PollKey,
        reply: oneshot::Sender<Result<(), PollError>>,
    },
    Snapshot {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    HashDone {
        task: HashTaskId,
        key: PollKey,
        purpose: HashPurpose,
        result: Result<HashOutput, PollError>,
    },
    Timer {
        key: PollKey,
        timer: PollTimer,
    },
}

/// What the actor and its environment share with the worker tasks.
struct Shared {
    mailbox: mpsc::Sender<ServiceEvent>,
    outbound: mpsc::Sender<(LcapMessage, Option<PeerId>)>,
    scheduler: SharedScheduler,
    work: Arc<Notify>,
    outcomes: broadcast::Sender<PollOutcome>,
    metrics: Option<Arc<PollMetrics>>,
}

/// The [`Environment`] polls see while the actor handles one event.
struct ServiceEnv<'a> {
    shared: &'a Shared,
}

impl Environment for ServiceEnv<'_> {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn schedule_hash(&mut self, request: HashRequest) -> bool {
        let now = self.now();
        let (key, estimate, deadline) = (request.key.clone(), request.estimate, request.deadline);
        let admitted = lock(&self.shared.scheduler).schedule(key.clone(), estimate, deadline, now, request);
        match admitted {
            Ok(task) => {
                debug!(poll = %key, ?task, estimate, "hash scheduled");
                self.shared.work.notify_one();
                true
            }
            Err(e) => {
                info!(poll = %key, error = %e, "hash refused");
                if let Some(m) = &self.shared.metrics {
                    m.hash_refusals.inc();
                }
                false
            }
        }
    }

    fn can_hash_before(&self, estimate: u64, deadline: Timestamp) -> bool {
        lock(&self.shared.scheduler).can_schedule(estimate, deadline, self.now())
    }

    fn send(&mut self, message: LcapMessage, to: Option<&PeerId>) -> Result<(), PollError> {
        self.shared
            .outbound
            .try_send((message, to.cloned()))
            .map_err(|e| PollError::Io(format!("outbound queue: {e}")))?;
        if let Some(m) = &self.shared.metrics {
            m.messages_sent.inc();
        }
        Ok(())
    }

    fn set_timer(&mut self, key: &PollKey, at: Timestamp, timer: PollTimer) {
        let delay = at.remaining_from(self.now());
        let fire_at = tokio::time::Instant::now() + Duration::from_millis(delay);
        let mailbox = self.shared.mailbox.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            // A closed mailbox means the service stopped.
            let _ = mailbox.send(ServiceEvent::Timer { key, timer }).await;
        });
    }

    fn alert(&mut self, alert: Alert) {
        warn!(poll = %alert.key, au = %alert.au_id, url = %alert.url, kind = ?alert.kind, "{}", alert.detail);
        if let Some(m) = &self.shared.metrics {
            m.record_alert(&alert);
        }
    }

    fn poll_finished(&mut self, outcome: &PollOutcome) {
        info!(
            poll = %outcome.key,
            kind = %outcome.kind,
            result = outcome.result.as_str(),
            agree = outcome.agree,
            disagree = outcome.disagree,
            "poll finished"
        );
        if let Some(m) = &self.shared.metrics {
            m.record_outcome(outcome);
        }
        let _ = self.shared.outcomes.send(outcome.clone());
    }
}

/// Client side of the poll service.
#[derive(Clone)]
pub struct PollServiceHandle {
    local: PeerId,
    mailbox: mpsc::Sender<ServiceEvent>,
    outcomes: broadcast::Sender<PollOutcome>,
}

impl PollServiceHandle {
    pub fn local(&self) -> &PeerId {
        &self.local
    }

    /// The mailbox, for transports that deliver inbound messages.
    pub fn mailbox(&self) -> mpsc::Sender<ServiceEvent> {
        self.mailbox.clone()
    }

    /// Outcomes of polls finished after this call.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<PollOutcome> {
        self.outcomes.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ServiceEvent,
    ) -> Result<T, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.mailbox
            .send(make(reply))
            .await
            .map_err(|_| NodeError::ServiceStopped)?;
        rx.await.map_err(|_| NodeError::ServiceStopped)
    }

    pub async fn call_poll(&self, spec: PollSpec) -> Result<PollKey, NodeError> {
        Ok(self.request(|reply| ServiceEvent::CallPoll { spec, reply }).await??)
    }

    pub async fn abort(&self, key: PollKey) -> Result<(), NodeError> {
        Ok(self.request(|reply| ServiceEvent::Abort { key, reply }).await??)
    }

    pub async fn replay(&self, key: PollKey) -> Result<(), NodeError> {
        Ok(self.request(|reply| ServiceEvent::Replay { key, reply }).await??)
    }

    pub async fn snapshot(&self) -> Result<StatusSnapshot, NodeError> {
        self.request(|reply| ServiceEvent::Snapshot { reply }).await
    }

    pub async fn deliver(&self, message: LcapMessage) -> Result<(), NodeError> {
        self.mailbox
            .send(ServiceEvent::Inbound(message))
            .await
            .map_err(|_| NodeError::ServiceStopped)
    }
}

/// Collaborators and tunables for one poll service.
pub struct ServiceParts {
    pub engine: EngineConfig,
    pub identity: Arc<dyn IdentityManager>,
    pub content: Arc<dyn ContentSource>,
    pub transport: Arc<dyn Transport>,
    pub metrics: Option<Arc<PollMetrics>>,
    pub mailbox_capacity: usize,
    pub housekeeping: Duration,
}

pub struct PollService {
    manager: PollManager,
    mailbox: mpsc::Receiver<ServiceEvent>,
    shared: Shared,
    housekeeping: Duration,
}

impl PollService {
    /// Spawn the actor, its hash workers and the transport task. Must be
    /// called inside a tokio runtime.
    pub fn start(
        parts: ServiceParts,
        shutdown: &ShutdownController,
    ) -> Result<(PollServiceHandle, Vec<JoinHandle<()>>), NodeError> {
        let ServiceParts {
            engine,
            identity,
            content,
            transport,
            metrics,
            mailbox_capacity,
            housekeeping,
        } = parts;
        let local = identity.local_identity();
        let workers = engine.scheduler.workers;
        let scheduler = Arc::new(Mutex::new(HashScheduler::from_config(&engine.scheduler)));
        let manager = PollManager::new(engine, identity, content, StdRng::from_entropy())?;

        let (mailbox_tx, mailbox_rx) = mpsc::channel(mailbox_capacity.max(1));
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);
        let work = Arc::new(Notify::new());

        let mut tasks = Vec::with_capacity(workers + 2);
        for id in 0..workers {
            tasks.push(tokio::spawn(hash_worker(
                id,
                Arc::clone(&scheduler),
                Arc::clone(&work),
                mailbox_tx.clone(),
                metrics.clone(),
                shutdown.subscribe(),
            )));
        }
        tasks.push(tokio::spawn(transport_loop(
            outbound_rx,
            transport,
            metrics.clone(),
            shutdown.subscribe(),
        )));

        let handle = PollServiceHandle {
            local: local.clone(),
            mailbox: mailbox_tx.clone(),
            outcomes: outcomes.clone(),
        };
        let service = PollService {
            manager,
            mailbox: mailbox_rx,
            shared: Shared {
                mailbox: mailbox_tx,
                outbound: outbound_tx,
                scheduler,
                work,
                outcomes,
                metrics,
            },
            housekeeping,
        };
        tasks.push(tokio::spawn(service.run(shutdown.subscribe())));
        info!(node = %local, workers, "poll service started");
        Ok((handle, tasks))
    }

    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut housekeeping = tokio::time::interval(self.housekeeping.max(Duration::from_millis(10)));
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        housekeeping.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = housekeeping.tick() => self.housekeep(),
                event = self.mailbox.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
            }
        }
        info!(node = %self.manager.local(), active = self.manager.active_count(), "poll service stopped");
    }

    fn handle(&mut self, event: ServiceEvent) {
        let mut env = ServiceEnv { shared: &self.shared };
        match event {
            ServiceEvent::Inbound(message) => {
                if let Some(m) = &self.shared.metrics {
                    m.messages_received.inc();
                }
                let (opcode, from) = (message.opcode(), message.sender().clone());
                if let Err(e) = self.manager.handle_message(message, &mut env) {
                    debug!(peer = %from, ?opcode, error = %e, "message dropped");
                    if let Some(m) = &self.shared.metrics {
                        m.messages_rejected.inc();
                    }
                }
            }
            ServiceEvent::CallPoll { spec, reply } => {
                let result = self.manager.call_poll(spec, &mut env);
                if result.is_ok() {
                    if let Some(m) = &self.shared.metrics {
                        m.polls_called.inc();
                    }
                }
                let _ = reply.send(result);
            }
            ServiceEvent::Abort { key, reply } => {
                let _ = reply.send(self.manager.abort_poll(&key, &mut env));
            }
            ServiceEvent::Replay { key, reply } => {
                let _ = reply.send(self.manager.replay_poll(&key, &mut env));
            }
            ServiceEvent::Snapshot { reply } => {
                let _ = reply.send(self.manager.snapshot(env.now()));
            }
            ServiceEvent::HashDone {
                task,
                key,
                purpose,
                result,
            } => {
                lock(&self.shared.scheduler).complete(task);
                self.manager.on_hash_done(&key, purpose, result, &mut env);
            }
            ServiceEvent::Timer { key, timer } => self.manager.on_timer(&key, timer, &mut env),
        }
        self.update_gauges();
    }

    /// Drop expired secrets and hashes that can no longer finish in time.
    fn housekeep(&mut self) {
        let now = Timestamp::now();
        let secrets = self.manager.expire_secrets(now);
        let stale = lock(&self.shared.scheduler).expire(now);
        let mut env = ServiceEnv { shared: &self.shared };
        for (key, request) in stale {
            warn!(poll = %key, "hash missed its deadline before starting");
            let result = Err(PollError::Scheduling(format!("hash for {key} missed its deadline")));
            self.manager.on_hash_done(&key, request.purpose, result, &mut env);
        }
        debug!(secrets, active = self.manager.active_count(), "housekeeping pass");
        self.update_gauges();
    }

    fn update_gauges(&self) {
        if let Some(m) = &self.shared.metrics {
            m.active_polls.set(self.manager.active_count() as i64);
            m.hash_backlog.set(lock(&self.shared.scheduler).len() as i64);
        }
    }
}

async fn hash_worker(
    id: usize,
    scheduler: SharedScheduler,
    work: Arc<Notify>,
    mailbox: mpsc::Sender<ServiceEvent>,
    metrics: Option<Arc<PollMetrics>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let next = lock(&scheduler).next_task();
        let Some((task, request)) = next else {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = work.notified() => {}
            }
            continue;
        };
        let key = request.key.clone();
        let purpose = request.purpose.clone();
        let started = Instant::now();
        let result = match tokio::task::spawn_blocking(move || request.run()).await {
            Ok(result) => result,
            Err(e) => {
                error!(worker = id, poll = %key, error = %e, "hash task panicked");
                Err(PollError::Hashing(e.to_string()))
            }
        };
        let elapsed = started.elapsed();
        if let Some(m) = &metrics {
            m.hashes_run.inc();
            m.hash_time_ms.observe(elapsed.as_secs_f64() * 1000.0);
        }
        debug!(worker = id, poll = %key, elapsed_ms = elapsed.as_millis() as u64, "hash done");
        let done = ServiceEvent::HashDone {
            task,
            key,
            purpose,
            result,
        };
        if mailbox.send(done).await.is_err() {
            break;
        }
    }
    debug!(worker = id, "hash worker stopped");
}

async fn transport_loop(
    mut outbound: mpsc::Receiver<(LcapMessage, Option<PeerId>)>,
    transport: Arc<dyn Transport>,
    metrics: Option<Arc<PollMetrics>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            next = outbound.recv() => {
                let Some((message, to)) = next else { break };
                let opcode = message.opcode();
                if let Err(e) = transport.send(message, to.as_ref()) {
                    warn!(?opcode, to = ?to, error = %e, "send failed");
                    if let Some(m) = &metrics {
                        m.send_failures.inc();
                    }
                }
            }
        }
    }
    debug!("transport task stopped");
}
