//! Metric scopes: named counters with lock-free increments.
//!
//! A scope is created once per component (queue producer/consumer, endpoint,
//! router) and hands out `Arc<AtomicU64>` counters; the hot path only ever
//! touches the atomic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Manager handing out named scopes.
#[derive(Default)]
pub struct MetricsManager {
    scopes: RwLock<HashMap<String, Arc<MetricScope>>>,
}

impl MetricsManager {
    pub fn new() -> Self {
        MetricsManager::default()
    }

    /// Get or create a scope.
    pub fn scope(&self, name: &str) -> Arc<MetricScope> {
        if let Some(scope) = self.scopes.read().get(name) {
            return Arc::clone(scope);
        }
        let mut scopes = self.scopes.write();
        Arc::clone(
            scopes
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(MetricScope::new(name))),
        )
    }

    /// Snapshot every counter of every scope.
    pub fn snapshot(&self) -> HashMap<String, HashMap<String, u64>> {
        self.scopes
            .read()
            .iter()
            .map(|(name, scope)| (name.clone(), scope.snapshot()))
            .collect()
    }
}

/// A named set of counters.
pub struct MetricScope {
    name: String,
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

impl MetricScope {
    fn new(name: &str) -> Self {
        MetricScope {
            name: name.to_owned(),
            counters: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get or register a counter. Callers keep the `Arc` and increment it
    /// directly.
    pub fn counter(&self, key: &str) -> Arc<AtomicU64> {
        if let Some(counter) = self.counters.read().get(key) {
            return Arc::clone(counter);
        }
        let mut counters = self.counters.write();
        Arc::clone(
            counters
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(AtomicU64::new(0))),
        )
    }

    pub fn value(&self, key: &str) -> u64 {
        self.counters
            .read()
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counters
            .read()
            .iter()
            .map(|(key, counter)| (key.clone(), counter.load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_are_shared_by_name() {
        let manager = MetricsManager::new();
        let a = manager.scope("queue");
        let b = manager.scope("queue");
        a.counter("pushed").fetch_add(3, Ordering::Relaxed);
        assert_eq!(b.value("pushed"), 3);
    }

    #[test]
    fn snapshot_collects_all_counters() {
        let manager = MetricsManager::new();
        let scope = manager.scope("endpoint");
        scope.counter("received").fetch_add(1, Ordering::Relaxed);
        let snap = manager.snapshot();
        assert_eq!(snap["endpoint"]["received"], 1);
    }
}
