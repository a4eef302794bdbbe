//! Named monotonic counters used to sequence change log entries.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Named counters with atomic increments.
///
/// Increments never roll back: a value handed out to a transaction that
/// later aborts is simply skipped.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores counters from persisted values.
    pub fn from_values(values: &BTreeMap<String, u64>) -> Self {
        let counters = values
            .iter()
            .map(|(name, value)| (name.clone(), Arc::new(AtomicU64::new(*value))))
            .collect();
        Self {
            counters: RwLock::new(counters),
        }
    }

    fn counter(&self, name: &str) -> Arc<AtomicU64> {
        if let Some(counter) = self.counters.read().get(name) {
            return Arc::clone(counter);
        }
        Arc::clone(
            self.counters
                .write()
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(AtomicU64::new(0))),
        )
    }

    /// Increments the counter and returns the new value. The first value is 1.
    pub fn next(&self, name: &str) -> u64 {
        self.counter(name).fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|counter| counter.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Raises a counter to at least `value`.
    pub fn ensure_at_least(&self, name: &str, value: u64) {
        self.counter(name).fetch_max(value, Ordering::SeqCst);
    }

    pub fn values(&self) -> BTreeMap<String, u64> {
        self.counters
            .read()
            .iter()
            .map(|(name, counter)| (name.clone(), counter.load(Ordering::SeqCst)))
            .collect()
    }
}
