//! Compilation-time error types.
//!
//! Evaluation outcomes are never errors: a term that does not match returns a
//! failed [`EvalResult`](crate::result::EvalResult) value. The enums here cover
//! everything that can go wrong *before* an event is seen: malformed helper
//! definitions, unresolvable asset graphs, registry misuse and collaborator
//! I/O at load time.

use thiserror::Error;

/// Errors raised while building a single helper term.
///
/// Fatal for the asset being compiled; a policy containing a bad asset fails
/// to load.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The `(targetField, helper, args)` triple had the wrong shape.
    #[error("cannot process definition: {0}")]
    MalformedDefinition(String),

    /// Wrong number of parameters for the helper.
    #[error("\"{helper}\" expected {expected} parameters but got {got}")]
    Arity {
        helper: String,
        expected: usize,
        got: usize,
    },

    /// Fewer parameters than the helper's minimum.
    #[error("\"{helper}\" expected at least {expected} parameters but got {got}")]
    MinArity {
        helper: String,
        expected: usize,
        got: usize,
    },

    /// A parameter had the wrong kind (value where a reference is required,
    /// or vice versa).
    #[error("\"{helper}\": parameter \"{value}\" is expected to be a {expected}")]
    ParameterKind {
        helper: String,
        value: String,
        expected: &'static str,
    },

    /// A `$reference` argument could not be translated to a pointer path.
    #[error("cannot format reference \"{0}\" as a pointer path")]
    InvalidReference(String),

    /// A value parameter could not be converted to the required type.
    #[error("\"{helper}\": parameter \"{value}\" could not be converted to {target}")]
    Conversion {
        helper: String,
        value: String,
        target: &'static str,
    },

    /// A regex parameter failed to compile.
    #[error("\"{helper}\": invalid regex \"{pattern}\": {source}")]
    InvalidRegex {
        helper: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// An address or mask parameter of `ip_cidr_match` was invalid.
    #[error("\"{helper}\": invalid IPv4 {what} \"{value}\"")]
    InvalidAddress {
        helper: String,
        what: &'static str,
        value: String,
    },
}

/// Errors from the helper builder registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A builder was registered twice under the same name.
    #[error("builder \"{0}\" is already registered")]
    AlreadyRegistered(String),

    /// No builder registered under the requested name.
    #[error("builder \"{0}\" not found")]
    NotFound(String),
}

/// Errors raised while compiling an asset or composing a policy.
#[derive(Debug, Error)]
pub enum CompilerError {
    /// The asset or policy document does not have the expected shape.
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// A helper term inside the asset failed to build.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// A helper name did not resolve in the registry.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// An asset document could not be fetched from the store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An asset names a parent that is not part of the policy.
    #[error("asset \"{child}\" references unknown parent \"{parent}\"")]
    OrphanAsset { child: String, parent: String },

    /// A filter has no resolvable target in the policy.
    #[error("filter \"{0}\" has no valid targets in the policy")]
    OrphanFilter(String),

    /// The policy defines no decoder, rule or output asset.
    #[error("policy \"{0}\" defines no evaluable assets")]
    EmptyPolicy(String),
}

/// Errors from the asset/config store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document \"{0}\" not found in the store")]
    NotFound(String),

    #[error("cannot read document \"{name}\": {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse document \"{name}\": {reason}")]
    Parse { name: String, reason: String },
}

/// Errors from the KVDB collaborator.
#[derive(Debug, Error)]
pub enum KvdbError {
    #[error("database \"{0}\" does not exist")]
    NotFound(String),

    #[error("database \"{name}\": {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("database \"{name}\" is corrupt: {reason}")]
    Corrupt { name: String, reason: String },
}
