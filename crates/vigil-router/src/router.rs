//! Route table and worker pool.
//!
//! A route pairs a priority with a filter expression and a policy
//! expression. Workers pop events from the shared queue and walk the table
//! in priority order (ascending, insertion order breaking ties); the first
//! route whose filter accepts the event gets to evaluate its policy, and the
//! walk stops there. Events matching no route are dropped with a debug
//! trace.
//!
//! The table is read under a shared lock on the hot path and mutated under
//! the writer lock by the API handlers. Compiled expressions are immutable
//! and shared, so readers never observe a half-built route.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use vigil_policy::{evaluate, Event, Expression, PolicyBuilder};

use crate::error::RouterError;
use crate::queue::ConcurrentQueue;

/// How long a worker waits on the queue before re-checking the stop flag.
const POP_INTERVAL: Duration = Duration::from_millis(100);

struct RouteEntry {
    name: String,
    priority: i32,
    seq: u64,
    filter_name: String,
    policy_name: String,
    filter: Expression,
    policy: Expression,
}

/// Public view of one route table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    pub priority: i32,
    pub filter: String,
    pub policy: String,
}

/// Event router: route table plus worker pool.
pub struct Router {
    builder: PolicyBuilder,
    queue: Arc<ConcurrentQueue<Event>>,
    table: Arc<RwLock<Vec<RouteEntry>>>,
    next_seq: AtomicU64,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    threads: usize,
}

impl Router {
    pub fn new(
        builder: PolicyBuilder,
        queue: Arc<ConcurrentQueue<Event>>,
        threads: usize,
    ) -> Self {
        Router {
            builder,
            queue,
            table: Arc::new(RwLock::new(Vec::new())),
            next_seq: AtomicU64::new(0),
            running: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            threads: threads.max(1),
        }
    }

    /// Compile and insert a route. Compilation errors surface synchronously.
    pub fn add_route(
        &self,
        name: &str,
        priority: i32,
        filter_name: &str,
        policy_name: &str,
    ) -> Result<(), RouterError> {
        if self.table.read().iter().any(|r| r.name == name) {
            return Err(RouterError::DuplicateRoute(name.to_owned()));
        }
        let filter = self.builder.build_filter(filter_name)?;
        let policy = self.builder.build_policy(policy_name)?;

        let entry = RouteEntry {
            name: name.to_owned(),
            priority,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            filter_name: filter_name.to_owned(),
            policy_name: policy_name.to_owned(),
            filter,
            policy: policy.expression,
        };

        let mut table = self.table.write();
        // Re-check under the writer lock: another writer may have won.
        if table.iter().any(|r| r.name == name) {
            return Err(RouterError::DuplicateRoute(name.to_owned()));
        }
        table.push(entry);
        table.sort_by_key(|r| (r.priority, r.seq));
        info!(route = name, priority, policy = policy_name, "route added");
        Ok(())
    }

    pub fn remove_route(&self, name: &str) -> Result<(), RouterError> {
        let mut table = self.table.write();
        let before = table.len();
        table.retain(|r| r.name != name);
        if table.len() == before {
            return Err(RouterError::RouteNotFound(name.to_owned()));
        }
        info!(route = name, "route removed");
        Ok(())
    }

    pub fn clear(&self) {
        self.table.write().clear();
        info!("route table cleared");
    }

    /// Snapshot of the table, in dispatch order.
    pub fn route_table(&self) -> Vec<Route> {
        self.table
            .read()
            .iter()
            .map(|r| Route {
                name: r.name.clone(),
                priority: r.priority,
                filter: r.filter_name.clone(),
                policy: r.policy_name.clone(),
            })
            .collect()
    }

    /// Enqueue an event for the worker pool; spills per the queue's flood
    /// policy under sustained overload.
    pub fn fast_enqueue_event(&self, event: Event) {
        self.queue.push(event);
    }

    /// Walk the table once for one event. Returns whether a route matched.
    pub fn route_event(&self, event: Event) -> bool {
        dispatch(&self.table, event)
    }

    /// Spawn the worker pool. Idempotent while running.
    pub fn run(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("router is already running");
            return;
        }
        let mut workers = self.workers.lock();
        for id in 0..self.threads {
            let queue = Arc::clone(&self.queue);
            let table = Arc::clone(&self.table);
            let running = Arc::clone(&self.running);
            workers.push(std::thread::spawn(move || {
                worker_loop(&queue, &table, &running, id)
            }));
        }
        info!(threads = self.threads, "router started");
    }

    /// Request a cooperative stop and join the workers. Workers drain the
    /// queue before exiting; in-flight evaluations run to completion.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.join();
        }
        info!("router stopped");
    }
}

/// One pass over the route table for one event.
fn dispatch(table: &RwLock<Vec<RouteEntry>>, event: Event) -> bool {
    let table = table.read();
    for entry in table.iter() {
        if evaluate(&entry.filter, event.clone()).ok() {
            let result = evaluate(&entry.policy, event);
            debug!(route = %entry.name, ok = result.ok(), "event dispatched");
            return true;
        }
    }
    debug!("event matched no route; dropped");
    false
}

fn worker_loop(
    queue: &ConcurrentQueue<Event>,
    table: &RwLock<Vec<RouteEntry>>,
    running: &AtomicBool,
    id: usize,
) {
    debug!(worker = id, "router worker started");
    while running.load(Ordering::Acquire) {
        if let Some(event) = queue.pop_timeout(POP_INTERVAL) {
            dispatch(table, event);
        }
    }
    // Drain whatever is left so a stop does not strand queued events.
    while let Some(event) = queue.try_pop() {
        dispatch(table, event);
    }
    debug!(worker = id, "router worker stopped");
}
