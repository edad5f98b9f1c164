//! # vigil-policy
//!
//! Asset compilation and expression evaluation for the vigil security-event
//! engine.
//!
//! Declarative assets (decoders, rules, outputs, filters) compile into a
//! shared tree of typed operations, composed per policy and evaluated
//! per event with short-circuit semantics over one mutable JSON document.
//!
//! ## Architecture
//!
//! - **Compile once**: helper builders validate arguments, convert literals
//!   and pre-format trace strings at load time; a bad asset fails the policy
//!   load, never an event.
//! - **Evaluate fast**: the hot path walks the expression tree with no
//!   allocation beyond refcount bumps; failures are values carrying the
//!   event and a prebuilt trace.
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use vigil_policy::{
//!     evaluate, register_builders, BuilderDeps, Event, HelperDefinition, KvdbManager, Registry,
//! };
//!
//! let dir = std::env::temp_dir().join("vigil-policy-doc");
//! let kvdb = Arc::new(KvdbManager::new(dir.join("kvdb")).unwrap());
//! let mut registry = Registry::new();
//! register_builders(&mut registry, &BuilderDeps::new(kvdb, dir.join("wdb.sock"))).unwrap();
//!
//! let def = HelperDefinition {
//!     target_field: "/f".into(),
//!     helper: "int_greater".into(),
//!     arguments: vec!["10".into()],
//! };
//! let builder = registry.lookup("int_greater").unwrap();
//! let check = builder.as_ref()(&def).unwrap();
//!
//! let event = Event::parse(r#"{"f": 12}"#).unwrap();
//! assert!(evaluate(&check, event).ok());
//! ```

pub mod asset;
pub mod builders;
pub mod error;
pub mod event;
pub mod expression;
pub mod fieldparse;
pub mod kvdb;
pub mod parameter;
pub mod policy;
pub mod registry;
pub mod result;
pub mod store;

// Re-export the most commonly used types and functions at crate root
pub use asset::{compile_asset, Asset, AssetType};
pub use builders::{register_builders, BuilderDeps};
pub use error::{BuildError, CompilerError, KvdbError, RegistryError, StoreError};
pub use event::Event;
pub use expression::{evaluate, evaluate_traced, EngineOp, Expression, Tracer};
pub use kvdb::{KvdbHandle, KvdbManager};
pub use parameter::{parse_parameters, Parameter};
pub use policy::{Policy, PolicyBuilder};
pub use registry::{HelperBuilder, HelperDefinition, Registry};
pub use result::EvalResult;
pub use store::{FileDriver, MemStore, Store};
