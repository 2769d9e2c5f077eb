//! Earliest-deadline-first admission control for digest work.
//!
//! Every hash a poll needs (its own digest, each vote check) is admitted here
//! before it is queued. A task is admitted only if all committed work plus the
//! candidate, run in deadline order, finishes before each deadline using the
//! fraction of wall time left after `overhead_load`.
//!
//! The scheduler is generic over the payload it carries so the node can keep
//! the full [`HashRequest`](crate::HashRequest) with each task while tests use
//! `()`.

use lcap_types::{PollKey, Timestamp};

use crate::config::SchedulerConfig;
use crate::PollError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashTaskId(u64);

struct Task<T> {
    id: HashTaskId,
    key: PollKey,
    estimate: u64,
    deadline: Timestamp,
    /// Taken when a worker picks the task up.
    payload: Option<T>,
}

pub struct HashScheduler<T> {
    /// Admitted tasks, sorted by deadline.
    tasks: Vec<Task<T>>,
    next_id: u64,
    /// Share of wall time available for hashing, in thousandths.
    capacity_permille: u64,
    max_tasks: usize,
}

impl<T> HashScheduler<T> {
    pub fn new(overhead_load: f64, max_tasks: usize) -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 1,
            capacity_permille: ((1.0 - overhead_load.clamp(0.0, 0.95)) * 1000.0).round() as u64,
            max_tasks,
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.overhead_load, config.max_tasks)
    }

    /// Whether a task of `estimate` ms could be admitted with `deadline`.
    pub fn can_schedule(&self, estimate: u64, deadline: Timestamp, now: Timestamp) -> bool {
        self.tasks.len() < self.max_tasks && self.feasible(Some((deadline, estimate)), now)
    }

    /// Admit a task, or refuse with [`PollError::Scheduling`].
    pub fn schedule(
        &mut self,
        key: PollKey,
        estimate: u64,
        deadline: Timestamp,
        now: Timestamp,
        payload: T,
    ) -> Result<HashTaskId, PollError> {
        if self.tasks.len() >= self.max_tasks {
            return Err(PollError::Scheduling(format!(
                "hash for {key}: {} tasks queued",
                self.tasks.len()
            )));
        }
        if !self.feasible(Some((deadline, estimate)), now) {
            return Err(PollError::Scheduling(format!(
                "hash for {key}: {estimate}ms does not fit before {deadline}"
            )));
        }
        let id = HashTaskId(self.next_id);
        self.next_id += 1;
        let pos = self
            .tasks
            .binary_search_by(|t| t.deadline.cmp(&deadline).then(std::cmp::Ordering::Less))
            .unwrap_or_else(|pos| pos);
        self.tasks.insert(
            pos,
            Task {
                id,
                key,
                estimate,
                deadline,
                payload: Some(payload),
            },
        );
        Ok(id)
    }

    /// Hand the earliest-deadline task that has not started to a worker.
    pub fn next_task(&mut self) -> Option<(HashTaskId, T)> {
        self.tasks
            .iter_mut()
            .find(|t| t.payload.is_some())
            .and_then(|t| t.payload.take().map(|p| (t.id, p)))
    }

    /// Release a finished task's capacity.
    pub fn complete(&mut self, id: HashTaskId) -> bool {
        match self.tasks.iter().position(|t| t.id == id) {
            Some(pos) => {
                self.tasks.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Drop tasks that never started and whose deadline has passed.
    pub fn expire(&mut self, now: Timestamp) -> Vec<(PollKey, T)> {
        let mut expired = Vec::new();
        let mut i = 0;
        while i < self.tasks.len() {
            if self.tasks[i].payload.is_some() && self.tasks[i].deadline.has_passed(now) {
                let task = self.tasks.remove(i);
                if let Some(payload) = task.payload {
                    expired.push((task.key, payload));
                }
            } else {
                i += 1;
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Total estimated work still committed (ms).
    pub fn committed(&self) -> u64 {
        self.tasks.iter().map(|t| t.estimate).sum()
    }

    fn feasible(&self, candidate: Option<(Timestamp, u64)>, now: Timestamp) -> bool {
        let mut work: Vec<(Timestamp, u64)> = self
            .tasks
            .iter()
            .filter(|t| !t.deadline.has_passed(now))
            .map(|t| (t.deadline, t.estimate))
            .chain(candidate)
            .collect();
        work.sort_by_key(|(deadline, _)| *deadline);

        let mut cumulative = 0u64;
        for (deadline, estimate) in work {
            cumulative = cumulative.saturating_add(estimate);
            let wall = cumulative.saturating_mul(1000).div_ceil(self.capacity_permille);
            if now.plus(wall) > deadline {
                return false;
            }
        }
        true
    }
}
