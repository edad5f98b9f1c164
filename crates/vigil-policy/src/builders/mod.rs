//! Helper builders: name → leaf-term factories.
//!
//! Every builder follows the same shape: parse the raw arguments into
//! [`Parameter`]s, enforce arity and per-position kind, pre-format the trace
//! strings, and return a [`Term`](crate::expression::Expression) whose
//! closure owns everything it needs. Failures at build time are
//! [`BuildError`]s; failures at evaluate time are failed results, never
//! errors.

pub mod comparison;
pub mod filter;
pub mod kvdb;
pub mod parse;
pub mod wdb;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BuildError, RegistryError};
use crate::event::Event;
use crate::kvdb::KvdbManager;
use crate::parameter::Parameter;
use crate::registry::Registry;

/// Collaborators the stateful helpers close over.
pub struct BuilderDeps {
    pub kvdb: Arc<KvdbManager>,
    pub wdb_socket: PathBuf,
    /// Per-call bound on blocking leaf I/O.
    pub io_timeout: Duration,
}

impl BuilderDeps {
    pub fn new(kvdb: Arc<KvdbManager>, wdb_socket: impl Into<PathBuf>) -> Self {
        BuilderDeps {
            kvdb,
            wdb_socket: wdb_socket.into(),
            io_timeout: Duration::from_millis(1000),
        }
    }
}

/// Register the complete helper roster. Called once at startup.
pub fn register_builders(registry: &mut Registry, deps: &BuilderDeps) -> Result<(), RegistryError> {
    comparison::register(registry)?;
    filter::register(registry)?;
    parse::register(registry)?;
    kvdb::register(registry, Arc::clone(&deps.kvdb))?;
    wdb::register(registry, deps.wdb_socket.clone(), deps.io_timeout)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Shared argument plumbing
// ---------------------------------------------------------------------------

pub(crate) fn check_arity(
    helper: &str,
    params: &[Parameter],
    expected: usize,
) -> Result<(), BuildError> {
    if params.len() != expected {
        return Err(BuildError::Arity {
            helper: helper.to_owned(),
            expected,
            got: params.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_min_arity(
    helper: &str,
    params: &[Parameter],
    expected: usize,
) -> Result<(), BuildError> {
    if params.len() < expected {
        return Err(BuildError::MinArity {
            helper: helper.to_owned(),
            expected,
            got: params.len(),
        });
    }
    Ok(())
}

pub(crate) fn check_arity_range(
    helper: &str,
    params: &[Parameter],
    min: usize,
    max: usize,
) -> Result<(), BuildError> {
    check_min_arity(helper, params, min)?;
    if params.len() > max {
        return Err(BuildError::Arity {
            helper: helper.to_owned(),
            expected: max,
            got: params.len(),
        });
    }
    Ok(())
}

/// Require a VALUE parameter and return its literal.
pub(crate) fn expect_value<'a>(helper: &str, param: &'a Parameter) -> Result<&'a str, BuildError> {
    match param {
        Parameter::Value(raw) => Ok(raw),
        Parameter::Reference(path) => Err(BuildError::ParameterKind {
            helper: helper.to_owned(),
            value: path.clone(),
            expected: "value",
        }),
    }
}

/// Require a single-character VALUE parameter.
pub(crate) fn expect_char(helper: &str, param: &Parameter) -> Result<char, BuildError> {
    let raw = expect_value(helper, param)?;
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(BuildError::Conversion {
            helper: helper.to_owned(),
            value: raw.to_owned(),
            target: "a single character",
        }),
    }
}

/// Resolve a parameter to a string at evaluate time: the literal for values,
/// the referenced event field for references. `None` when the reference is
/// missing or not a string.
pub(crate) fn resolve_string(event: &Event, param: &Parameter) -> Option<String> {
    match param {
        Parameter::Value(raw) => Some(raw.clone()),
        Parameter::Reference(path) => event.get_string(path),
    }
}

/// Trace-friendly helper name: `helper.<name>[<target>, <arg1>, …]`.
pub(crate) fn format_helper_name(helper: &str, target: &str, params: &[Parameter]) -> String {
    let mut out = format!("helper.{helper}[{target}");
    for param in params {
        out.push_str(", ");
        out.push_str(param.raw());
    }
    out.push(']');
    out
}

// ---------------------------------------------------------------------------
// Prebuilt trace strings
// ---------------------------------------------------------------------------

pub(crate) fn success_trace(name: &str) -> Arc<str> {
    Arc::from(format!("[{name}] -> Success"))
}

pub(crate) fn failure_trace(name: &str, reason: &str) -> Arc<str> {
    Arc::from(format!("[{name}] -> Failure: {reason}"))
}

pub(crate) fn target_not_found(name: &str, target: &str) -> Arc<str> {
    failure_trace(name, &format!("Target field '{target}' not found"))
}

pub(crate) fn parameter_not_found(name: &str, param: &Parameter) -> Arc<str> {
    failure_trace(name, &format!("Parameter \"{}\" not found", param.raw()))
}
