//! Helper builder registry.
//!
//! Maps helper names to builder closures. Populated once at startup by
//! [`register_builders`](crate::builders::register_builders) and read-only
//! afterwards; the router and compilers share it behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BuildError, RegistryError};
use crate::expression::Expression;

/// The `(targetField, helperName, rawArguments)` triple a builder consumes.
#[derive(Debug, Clone)]
pub struct HelperDefinition {
    /// Pointer path of the field the helper operates on.
    pub target_field: String,
    /// Helper name as written in the asset document.
    pub helper: String,
    /// Raw, unparsed arguments.
    pub arguments: Vec<String>,
}

/// A builder closure producing a leaf expression from a definition.
pub type HelperBuilder =
    Arc<dyn Fn(&HelperDefinition) -> Result<Expression, BuildError> + Send + Sync>;

/// Name → builder mapping.
#[derive(Default)]
pub struct Registry {
    builders: HashMap<String, HelperBuilder>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Register a builder. Duplicate names are an error.
    pub fn register<F>(&mut self, name: &str, builder: F) -> Result<(), RegistryError>
    where
        F: Fn(&HelperDefinition) -> Result<Expression, BuildError> + Send + Sync + 'static,
    {
        if self.builders.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_owned()));
        }
        self.builders.insert(name.to_owned(), Arc::new(builder));
        Ok(())
    }

    /// Look up a builder by helper name.
    pub fn lookup(&self, name: &str) -> Result<HelperBuilder, RegistryError> {
        self.builders
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_owned()))
    }

    /// Drop every registration.
    pub fn clear(&mut self) {
        self.builders.clear();
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}
