//! Evaluation result carrying the event and a provenance trace.

use std::sync::Arc;

use crate::event::Event;

/// The outcome of evaluating a term or expression against an event.
///
/// Both successful and failed results carry the (possibly mutated) event;
/// failure is a value, not an error. The trace string is supplied by the
/// deciding leaf and is never re-formatted up the tree. Leaves pre-build
/// their trace strings at compile time, so returning one is a refcount bump,
/// not an allocation.
#[derive(Debug, Clone)]
pub struct EvalResult {
    ok: bool,
    event: Event,
    trace: Arc<str>,
}

impl EvalResult {
    /// A successful result.
    pub fn success(event: Event, trace: Arc<str>) -> Self {
        EvalResult {
            ok: true,
            event,
            trace,
        }
    }

    /// A failed result. The event is still carried.
    pub fn failure(event: Event, trace: Arc<str>) -> Self {
        EvalResult {
            ok: false,
            event,
            trace,
        }
    }

    pub fn ok(&self) -> bool {
        self.ok
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn into_event(self) -> Event {
        self.event
    }

    pub fn trace(&self) -> &str {
        &self.trace
    }

    pub(crate) fn trace_arc(&self) -> Arc<str> {
        Arc::clone(&self.trace)
    }
}
