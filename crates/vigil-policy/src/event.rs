//! Event document with typed pointer-path access.
//!
//! An [`Event`] wraps a mutable `serde_json::Value` behind a reference-counted
//! handle. The router threads the *same* document through an entire expression
//! tree, so side-effecting terms observe earlier writes within one evaluation.
//! Documents are never shared across workers; the lock exists only so the
//! handle can cross a thread boundary between the endpoint and the worker
//! that dequeues it.
//!
//! All accessors are keyed by JSON pointer path (`/a/b/c`). Writes create the
//! intermediate objects along the path.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// A reference-counted, mutable JSON event.
///
/// Cloning an `Event` clones the handle, not the document: both clones see
/// the same underlying value. Use [`Event::same_document`] to test handle
/// identity.
#[derive(Debug, Clone)]
pub struct Event {
    doc: Arc<Mutex<Value>>,
}

impl Event {
    /// Create an empty event (`{}`).
    pub fn new() -> Self {
        Event::from_value(Value::Object(Map::new()))
    }

    /// Wrap an existing JSON value.
    pub fn from_value(value: Value) -> Self {
        Event {
            doc: Arc::new(Mutex::new(value)),
        }
    }

    /// Parse a raw JSON string into an event.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        Ok(Event::from_value(serde_json::from_str(raw)?))
    }

    /// Whether two handles point at the same underlying document.
    pub fn same_document(a: &Event, b: &Event) -> bool {
        Arc::ptr_eq(&a.doc, &b.doc)
    }

    /// Snapshot the document (deep clone).
    pub fn to_value(&self) -> Value {
        self.doc.lock().clone()
    }

    // -- reads ---------------------------------------------------------------

    /// Whether a value exists at `path` (including an explicit `null`).
    pub fn exists(&self, path: &str) -> bool {
        self.doc.lock().pointer(path).is_some()
    }

    pub fn get_string(&self, path: &str) -> Option<String> {
        self.with(path, |v| v.as_str().map(str::to_owned))
    }

    pub fn get_int(&self, path: &str) -> Option<i64> {
        self.with(path, Value::as_i64)
    }

    pub fn get_float(&self, path: &str) -> Option<f64> {
        self.with(path, Value::as_f64)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.with(path, Value::as_bool)
    }

    pub fn get_array(&self, path: &str) -> Option<Vec<Value>> {
        self.with(path, |v| v.as_array().cloned())
    }

    pub fn get_object(&self, path: &str) -> Option<Map<String, Value>> {
        self.with(path, |v| v.as_object().cloned())
    }

    /// Fetch the value at `path` regardless of type.
    pub fn get_value(&self, path: &str) -> Option<Value> {
        self.doc.lock().pointer(path).cloned()
    }

    // -- type predicates -----------------------------------------------------

    pub fn is_string(&self, path: &str) -> bool {
        self.check(path, Value::is_string)
    }

    pub fn is_number(&self, path: &str) -> bool {
        self.check(path, Value::is_number)
    }

    pub fn is_bool(&self, path: &str) -> bool {
        self.check(path, Value::is_boolean)
    }

    pub fn is_array(&self, path: &str) -> bool {
        self.check(path, Value::is_array)
    }

    pub fn is_object(&self, path: &str) -> bool {
        self.check(path, Value::is_object)
    }

    pub fn is_null(&self, path: &str) -> bool {
        self.check(path, Value::is_null)
    }

    // -- writes --------------------------------------------------------------

    pub fn set_string(&self, path: &str, value: &str) {
        self.set_value(path, Value::String(value.to_owned()));
    }

    pub fn set_bool(&self, path: &str, value: bool) {
        self.set_value(path, Value::Bool(value));
    }

    pub fn set_int(&self, path: &str, value: i64) {
        self.set_value(path, Value::from(value));
    }

    pub fn set_float(&self, path: &str, value: f64) {
        self.set_value(path, Value::from(value));
    }

    pub fn set_object(&self, path: &str, value: Map<String, Value>) {
        self.set_value(path, Value::Object(value));
    }

    /// Write `value` at `path`, creating intermediate objects as needed.
    ///
    /// A segment that lands on a non-object value replaces it with an object,
    /// mirroring the destructive write semantics of the document accessors
    /// this engine was specified against.
    pub fn set_value(&self, path: &str, value: Value) {
        let mut doc = self.doc.lock();
        let segments: Vec<String> = pointer_segments(path);
        if segments.is_empty() {
            *doc = value;
            return;
        }
        let mut current = &mut *doc;
        for segment in &segments[..segments.len() - 1] {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            current = current
                .as_object_mut()
                .expect("just coerced to object")
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let last = &segments[segments.len() - 1];
        current
            .as_object_mut()
            .expect("just coerced to object")
            .insert(last.clone(), value);
    }

    fn with<T>(&self, path: &str, f: impl FnOnce(&Value) -> Option<T>) -> Option<T> {
        self.doc.lock().pointer(path).and_then(|v| f(v))
    }

    fn check(&self, path: &str, pred: impl FnOnce(&Value) -> bool) -> bool {
        self.doc.lock().pointer(path).is_some_and(pred)
    }
}

impl Default for Event {
    fn default() -> Self {
        Event::new()
    }
}

impl PartialEq for Event {
    /// Structural equality of the underlying documents.
    fn eq(&self, other: &Self) -> bool {
        if Event::same_document(self, other) {
            return true;
        }
        *self.doc.lock() == *other.doc.lock()
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.doc.lock().serialize(serializer)
    }
}

/// Split a pointer path into unescaped segments (`~1` → `/`, `~0` → `~`).
fn pointer_segments(path: &str) -> Vec<String> {
    path.split('/')
        .skip(1)
        .map(|seg| seg.replace("~1", "/").replace("~0", "~"))
        .collect()
}
