//! # vigil-router
//!
//! Event dispatch for the vigil engine: a bounded MPMC queue with
//! flood-file spill, metric scopes with lock-free counters, and the router
//! that walks a priority-ordered route table over a worker pool.
//!
//! Endpoints enqueue parsed events with
//! [`Router::fast_enqueue_event`]; workers pop, pick the first route whose
//! filter matches, and evaluate that route's policy expression against the
//! event.

pub mod error;
pub mod metrics;
pub mod queue;
pub mod router;

pub use error::RouterError;
pub use metrics::{MetricScope, MetricsManager};
pub use queue::ConcurrentQueue;
pub use router::{Route, Router};
