//! Bounded MPMC event queue with flood spill.
//!
//! Producers block briefly under backpressure: `push` retries `try_push` up
//! to the configured attempt budget, sleeping between tries, then appends the
//! event as one JSON line to the flood file and drops it. Forward progress is
//! guaranteed at the price of durability for spilled events. Without a flood
//! policy, `push` blocks until space frees up.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::warn;

use crate::metrics::MetricScope;

struct Flood {
    file: Mutex<File>,
    path: PathBuf,
    attempts: u32,
    sleep: Duration,
}

/// Bounded multi-producer multi-consumer queue.
pub struct ConcurrentQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    flood: Option<Flood>,
    pushed: Arc<AtomicU64>,
    popped: Arc<AtomicU64>,
    flooded: Arc<AtomicU64>,
    depth: Arc<AtomicU64>,
}

impl<T: Serialize> ConcurrentQueue<T> {
    /// A queue without a flood policy: `push` blocks until space is free.
    pub fn new(capacity: usize, producer: &MetricScope, consumer: &MetricScope) -> Self {
        assert!(capacity > 0, "queue capacity must be positive");
        ConcurrentQueue {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            flood: None,
            pushed: producer.counter("pushed"),
            popped: consumer.counter("popped"),
            flooded: producer.counter("flooded"),
            depth: producer.counter("depth"),
        }
    }

    /// A queue that spills to `flood_file` once the retry budget is spent.
    pub fn with_flood(
        capacity: usize,
        producer: &MetricScope,
        consumer: &MetricScope,
        flood_file: impl AsRef<Path>,
        attempts: u32,
        sleep_micros: u64,
    ) -> io::Result<Self> {
        let path = flood_file.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut queue = Self::new(capacity, producer, consumer);
        queue.flood = Some(Flood {
            file: Mutex::new(file),
            path,
            attempts: attempts.max(1),
            sleep: Duration::from_micros(sleep_micros),
        });
        Ok(queue)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Non-blocking push; hands the item back when the queue is full.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.depth.store(items.len() as u64, Ordering::Relaxed);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Push with backpressure. With a flood policy the retry budget bounds
    /// the wait; on exhaustion the item is spilled and dropped.
    pub fn push(&self, item: T) {
        match &self.flood {
            None => {
                let mut items = self.items.lock();
                while items.len() >= self.capacity {
                    self.not_full.wait(&mut items);
                }
                items.push_back(item);
                self.pushed.fetch_add(1, Ordering::Relaxed);
                self.depth.store(items.len() as u64, Ordering::Relaxed);
                drop(items);
                self.not_empty.notify_one();
            }
            Some(flood) => {
                let mut pending = item;
                for attempt in 0..flood.attempts {
                    match self.try_push(pending) {
                        Ok(()) => return,
                        Err(back) => pending = back,
                    }
                    if attempt + 1 < flood.attempts {
                        std::thread::sleep(flood.sleep);
                    }
                }
                self.spill(flood, &pending);
            }
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<T> {
        let mut items = self.items.lock();
        let item = items.pop_front()?;
        self.popped.fetch_add(1, Ordering::Relaxed);
        self.depth.store(items.len() as u64, Ordering::Relaxed);
        drop(items);
        self.not_full.notify_one();
        Some(item)
    }

    /// Blocking pop.
    pub fn pop(&self) -> T {
        let mut items = self.items.lock();
        while items.is_empty() {
            self.not_empty.wait(&mut items);
        }
        let item = items.pop_front().expect("non-empty under lock");
        self.popped.fetch_add(1, Ordering::Relaxed);
        self.depth.store(items.len() as u64, Ordering::Relaxed);
        drop(items);
        self.not_full.notify_one();
        item
    }

    /// Pop with a deadline; `None` on timeout. Workers use this so a stop
    /// request is observed within one interval.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.is_empty() {
            if self.not_empty.wait_until(&mut items, deadline).timed_out() && items.is_empty() {
                return None;
            }
        }
        let item = items.pop_front().expect("non-empty under lock");
        self.popped.fetch_add(1, Ordering::Relaxed);
        self.depth.store(items.len() as u64, Ordering::Relaxed);
        drop(items);
        self.not_full.notify_one();
        Some(item)
    }

    fn spill(&self, flood: &Flood, item: &T) {
        self.flooded.fetch_add(1, Ordering::Relaxed);
        let line = match serde_json::to_string(item) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "cannot serialize event for the flood file; dropped");
                return;
            }
        };
        let mut file = flood.file.lock();
        if let Err(e) = writeln!(file, "{line}").and_then(|()| file.flush()) {
            warn!(
                flood_file = %flood.path.display(),
                error = %e,
                "cannot append to the flood file; event dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::metrics::MetricsManager;

    fn scopes(manager: &MetricsManager) -> (Arc<MetricScope>, Arc<MetricScope>) {
        (manager.scope("producer"), manager.scope("consumer"))
    }

    #[test]
    fn fifo_order() {
        let manager = MetricsManager::new();
        let (producer, consumer) = scopes(&manager);
        let queue: ConcurrentQueue<u32> = ConcurrentQueue::new(8, &producer, &consumer);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
        assert_eq!(queue.try_pop(), Some(3));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn try_push_bounces_at_capacity() {
        let manager = MetricsManager::new();
        let (producer, consumer) = scopes(&manager);
        let queue: ConcurrentQueue<u32> = ConcurrentQueue::new(2, &producer, &consumer);
        assert!(queue.try_push(1).is_ok());
        assert!(queue.try_push(2).is_ok());
        assert_eq!(queue.try_push(3), Err(3));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn flood_spills_one_line_per_dropped_event() {
        let dir = tempfile::tempdir().unwrap();
        let flood_path = dir.path().join("flood.ndjson");
        let manager = MetricsManager::new();
        let (producer, consumer) = scopes(&manager);
        let queue: ConcurrentQueue<serde_json::Value> =
            ConcurrentQueue::with_flood(2, &producer, &consumer, &flood_path, 3, 10).unwrap();

        queue.push(serde_json::json!({"n": 1}));
        queue.push(serde_json::json!({"n": 2}));
        // Queue full: these exhaust the retry budget and spill.
        queue.push(serde_json::json!({"n": 3}));
        queue.push(serde_json::json!({"n": 4}));

        assert_eq!(queue.len(), 2);
        assert_eq!(producer.value("flooded"), 2);

        let spilled = std::fs::read_to_string(&flood_path).unwrap();
        let lines: Vec<&str> = spilled.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(lines[0]).unwrap(),
            serde_json::json!({"n": 3})
        );
    }

    #[test]
    fn pop_timeout_expires_on_an_empty_queue() {
        let manager = MetricsManager::new();
        let (producer, consumer) = scopes(&manager);
        let queue: ConcurrentQueue<u32> = ConcurrentQueue::new(2, &producer, &consumer);
        assert_eq!(queue.pop_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn blocking_pop_wakes_on_push() {
        let manager = MetricsManager::new();
        let (producer, consumer) = scopes(&manager);
        let queue: Arc<ConcurrentQueue<u32>> =
            Arc::new(ConcurrentQueue::new(2, &producer, &consumer));

        let consumer_side = Arc::clone(&queue);
        let handle = thread::spawn(move || consumer_side.pop());
        thread::sleep(Duration::from_millis(20));
        queue.push(99);
        assert_eq!(handle.join().unwrap(), 99);
    }

    #[test]
    fn producers_and_consumers_interleave() {
        let manager = MetricsManager::new();
        let (producer, consumer) = scopes(&manager);
        let queue: Arc<ConcurrentQueue<u64>> =
            Arc::new(ConcurrentQueue::new(4, &producer, &consumer));

        let mut handles = Vec::new();
        for t in 0..4u64 {
            let q = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    q.push(t * 1000 + i);
                }
            }));
        }
        let mut consumers = Vec::new();
        for _ in 0..2 {
            let q = Arc::clone(&queue);
            consumers.push(thread::spawn(move || {
                let mut seen = 0u64;
                while seen < 100 {
                    if q.pop_timeout(Duration::from_millis(500)).is_some() {
                        seen += 1;
                    }
                }
                seen
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let total: u64 = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        assert_eq!(total, 200);
        assert!(queue.is_empty());
    }
}
