//! Nullable environment: a single node whose hashes, timers and sends are
//! captured for the test to drive by hand.

use lcap_poller::{
    Alert, Environment, HashRequest, HashScheduler, HashTaskId, PollError, PollManager,
    PollOutcome, PollTimer, SchedulerConfig,
};
use lcap_messages::LcapMessage;
use lcap_types::{PeerId, PollKey, Timestamp};

use crate::{NullClock, NullNetwork};

pub struct NullEnvironment {
    pub clock: NullClock,
    pub network: NullNetwork,
    scheduler: HashScheduler<()>,
    hashes: Vec<(HashTaskId, HashRequest)>,
    timers: Vec<(PollKey, Timestamp, PollTimer)>,
    outcomes: Vec<PollOutcome>,
    alerts: Vec<Alert>,
    refuse_hashes: bool,
}

impl NullEnvironment {
    pub fn new(start_millis: u64) -> Self {
        Self::with_scheduler(start_millis, &SchedulerConfig::default())
    }

    pub fn with_scheduler(start_millis: u64, config: &SchedulerConfig) -> Self {
        Self {
            clock: NullClock::new(start_millis),
            network: NullNetwork::new(),
            scheduler: HashScheduler::from_config(config),
            hashes: Vec::new(),
            timers: Vec::new(),
            outcomes: Vec::new(),
            alerts: Vec::new(),
            refuse_hashes: false,
        }
    }

    /// Refuse every hash from now on, as a fully booked scheduler would.
    pub fn refuse_hashes(&mut self, refuse: bool) {
        self.refuse_hashes = refuse;
    }

    pub fn pending_hashes(&self) -> usize {
        self.hashes.len()
    }

    /// Remove the queued hash requests and release their capacity.
    pub fn take_hashes(&mut self) -> Vec<HashRequest> {
        self.hashes
            .drain(..)
            .map(|(id, request)| {
                self.scheduler.complete(id);
                request
            })
            .collect()
    }

    /// Run every queued hash and hand the results to `manager`.
    pub fn run_hashes(&mut self, manager: &mut PollManager) -> usize {
        let requests = self.take_hashes();
        let count = requests.len();
        for request in requests {
            let result = request.run();
            manager.on_hash_done(&request.key, request.purpose.clone(), result, self);
        }
        count
    }

    /// Fail every queued hash with `error`.
    pub fn fail_hashes(&mut self, manager: &mut PollManager, error: &str) {
        for request in self.take_hashes() {
            let result = Err(PollError::Hashing(error.to_string()));
            manager.on_hash_done(&request.key, request.purpose.clone(), result, self);
        }
    }

    pub fn timers(&self) -> &[(PollKey, Timestamp, PollTimer)] {
        &self.timers
    }

    /// Advance the clock to `at`, firing due timers in time order.
    pub fn advance_to(&mut self, at: Timestamp, manager: &mut PollManager) {
        loop {
            let next = self
                .timers
                .iter()
                .enumerate()
                .filter(|(_, (_, due, _))| *due <= at)
                .min_by_key(|(_, (_, due, _))| *due)
                .map(|(i, _)| i);
            let Some(i) = next else {
                break;
            };
            let (key, due, timer) = self.timers.remove(i);
            self.clock.advance_to(due);
            manager.on_timer(&key, timer, self);
        }
        self.clock.advance_to(at);
    }

    /// Hand `message` to `manager` as if it arrived from the network.
    pub fn deliver(&mut self, manager: &mut PollManager, message: LcapMessage) -> Result<(), PollError> {
        manager.handle_message(message, self)
    }

    pub fn outcomes(&self) -> &[PollOutcome] {
        &self.outcomes
    }

    pub fn outcome(&self, key: &PollKey) -> Option<&PollOutcome> {
        self.outcomes.iter().find(|o| &o.key == key)
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }
}

impl Environment for NullEnvironment {
    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn schedule_hash(&mut self, request: HashRequest) -> bool {
        if self.refuse_hashes {
            return false;
        }
        let now = self.clock.now();
        match self
            .scheduler
            .schedule(request.key.clone(), request.estimate, request.deadline, now, ())
        {
            Ok(id) => {
                self.hashes.push((id, request));
                true
            }
            Err(_) => false,
        }
    }

    fn can_hash_before(&self, estimate: u64, deadline: Timestamp) -> bool {
        !self.refuse_hashes && self.scheduler.can_schedule(estimate, deadline, self.clock.now())
    }

    fn send(&mut self, message: LcapMessage, to: Option<&PeerId>) -> Result<(), PollError> {
        self.network.record(message, to)
    }

    fn set_timer(&mut self, key: &PollKey, at: Timestamp, timer: PollTimer) {
        self.timers.push((key.clone(), at, timer));
    }

    fn alert(&mut self, alert: Alert) {
        self.alerts.push(alert);
    }

    fn poll_finished(&mut self, outcome: &PollOutcome) {
        self.outcomes.push(outcome.clone());
    }
}
