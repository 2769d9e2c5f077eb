//! Statistics collection and reporting utilities.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, fixed set of named counters.
///
/// Names are registered up front; increments of unknown names are ignored so a
/// typo never panics a hot path.
pub struct StatsCounter {
    counters: BTreeMap<&'static str, AtomicU64>,
}

impl StatsCounter {
    pub fn new(names: &[&'static str]) -> Self {
        let counters = names.iter().map(|&n| (n, AtomicU64::new(0))).collect();
        Self { counters }
    }

    pub fn increment(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
        }
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time copy of every counter, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        self.counters
            .iter()
            .map(|(&k, v)| (k, v.load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_registered_names_only() {
        let stats = StatsCounter::new(&["polls_called", "conflicts"]);
        stats.increment("polls_called");
        stats.add("polls_called", 2);
        stats.increment("unknown");
        assert_eq!(stats.get("polls_called"), 3);
        assert_eq!(stats.get("conflicts"), 0);
        assert_eq!(stats.get("unknown"), 0);
    }

    #[test]
    fn snapshot_is_sorted() {
        let stats = StatsCounter::new(&["b", "a"]);
        stats.increment("b");
        let snap: Vec<_> = stats.snapshot().into_iter().collect();
        assert_eq!(snap, vec![("a", 0), ("b", 1)]);
    }
}
