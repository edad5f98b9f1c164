//! Asset/config store collaborator.
//!
//! The core only ever reads: `get(name)` with a dotted name
//! (`decoder.syslog.0`) returns the document as JSON. The file driver maps
//! name segments to a nested path and probes YAML before JSON; the in-memory
//! store backs tests and the embedded fixtures.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::StoreError;

/// Read-only document retrieval by dotted name.
pub trait Store: Send + Sync {
    fn get(&self, name: &str) -> Result<Value, StoreError>;
}

/// File-backed store: `a.b.c` → `<base>/a/b/c.{yml,yaml,json}`.
pub struct FileDriver {
    base: PathBuf,
}

impl FileDriver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        FileDriver { base: base.into() }
    }
}

impl Store for FileDriver {
    fn get(&self, name: &str) -> Result<Value, StoreError> {
        let mut relative = PathBuf::new();
        for segment in name.split('.') {
            if segment.is_empty() || segment.contains(['/', '\\']) {
                return Err(StoreError::Parse {
                    name: name.to_owned(),
                    reason: "invalid name segment".to_owned(),
                });
            }
            relative.push(segment);
        }

        for ext in ["yml", "yaml", "json"] {
            let path = self.base.join(&relative).with_extension(ext);
            if !path.exists() {
                continue;
            }
            let raw = std::fs::read_to_string(&path).map_err(|source| StoreError::Io {
                name: name.to_owned(),
                source,
            })?;
            let parsed = if ext == "json" {
                serde_json::from_str(&raw).map_err(|e| StoreError::Parse {
                    name: name.to_owned(),
                    reason: e.to_string(),
                })
            } else {
                serde_yaml::from_str(&raw).map_err(|e| StoreError::Parse {
                    name: name.to_owned(),
                    reason: e.to_string(),
                })
            }?;
            return Ok(parsed);
        }
        Err(StoreError::NotFound(name.to_owned()))
    }
}

/// In-memory store for tests and fixtures.
#[derive(Default)]
pub struct MemStore {
    docs: RwLock<HashMap<String, Value>>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore::default()
    }

    pub fn insert(&self, name: &str, doc: Value) {
        self.docs.write().insert(name.to_owned(), doc);
    }

    /// Parse a YAML document and store it under `name`.
    pub fn insert_yaml(&self, name: &str, yaml: &str) -> Result<(), StoreError> {
        let doc = serde_yaml::from_str(yaml).map_err(|e| StoreError::Parse {
            name: name.to_owned(),
            reason: e.to_string(),
        })?;
        self.insert(name, doc);
        Ok(())
    }
}

impl Store for MemStore {
    fn get(&self, name: &str) -> Result<Value, StoreError> {
        self.docs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_owned()))
    }
}
