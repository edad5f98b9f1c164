//! Key-value database collaborator.
//!
//! Databases are named JSON-object files under a root directory, opened
//! lazily and internally synchronized; helpers and API handlers share the
//! manager behind an `Arc`. Mutations rewrite the backing file so fixtures
//! stay inspectable.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::KvdbError;

/// Manager of named databases under one root directory.
pub struct KvdbManager {
    root: PathBuf,
    open: RwLock<HashMap<String, Arc<KvdbHandle>>>,
}

/// One open database.
pub struct KvdbHandle {
    name: String,
    path: PathBuf,
    entries: RwLock<Map<String, Value>>,
}

impl KvdbManager {
    /// Create a manager rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, KvdbError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| KvdbError::Io {
            name: root.display().to_string(),
            source,
        })?;
        Ok(KvdbManager {
            root,
            open: RwLock::new(HashMap::new()),
        })
    }

    fn db_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    /// Open a database, optionally creating it.
    pub fn open(&self, name: &str, create_if_missing: bool) -> Result<Arc<KvdbHandle>, KvdbError> {
        if let Some(handle) = self.open.read().get(name) {
            return Ok(Arc::clone(handle));
        }

        let path = self.db_path(name);
        let created = !path.exists();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| KvdbError::Io {
                name: name.to_owned(),
                source,
            })?;
            match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(KvdbError::Corrupt {
                        name: name.to_owned(),
                        reason: "backing file is not a JSON object".to_owned(),
                    })
                }
                Err(e) => {
                    return Err(KvdbError::Corrupt {
                        name: name.to_owned(),
                        reason: e.to_string(),
                    })
                }
            }
        } else if create_if_missing {
            debug!(db = name, "creating key-value database");
            Map::new()
        } else {
            return Err(KvdbError::NotFound(name.to_owned()));
        };

        let handle = Arc::new(KvdbHandle {
            name: name.to_owned(),
            path,
            entries: RwLock::new(entries),
        });
        if created {
            handle.persist()?;
        }
        self.open
            .write()
            .insert(name.to_owned(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Whether a database exists, open or on disk.
    pub fn exists(&self, name: &str) -> bool {
        self.open.read().contains_key(name) || self.db_path(name).exists()
    }

    /// Delete a database and its backing file.
    pub fn delete_db(&self, name: &str) -> Result<(), KvdbError> {
        let existed_open = self.open.write().remove(name).is_some();
        let path = self.db_path(name);
        if path.exists() {
            fs::remove_file(&path).map_err(|source| KvdbError::Io {
                name: name.to_owned(),
                source,
            })?;
        } else if !existed_open {
            return Err(KvdbError::NotFound(name.to_owned()));
        }
        debug!(db = name, "deleted key-value database");
        Ok(())
    }

    /// Names of databases present on disk.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "json") {
                    path.file_stem().map(|s| s.to_string_lossy().into_owned())
                } else {
                    None
                }
            })
            .collect();
        names.sort();
        names
    }
}

impl KvdbHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn set(&self, key: &str, value: Value) -> Result<(), KvdbError> {
        self.entries.write().insert(key.to_owned(), value);
        self.persist()
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete_key(&self, key: &str) -> Result<bool, KvdbError> {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn persist(&self) -> Result<(), KvdbError> {
        let snapshot = Value::Object(self.entries.read().clone());
        let raw = serde_json::to_string_pretty(&snapshot).map_err(|e| KvdbError::Corrupt {
            name: self.name.clone(),
            reason: e.to_string(),
        })?;
        fs::write(&self.path, raw).map_err(|source| KvdbError::Io {
            name: self.name.clone(),
            source,
        })
    }
}

/// Test helper: seed a database with string pairs.
pub fn seed(manager: &KvdbManager, name: &str, pairs: &[(&str, Value)]) -> Result<(), KvdbError> {
    let handle = manager.open(name, true)?;
    for (key, value) in pairs {
        handle.set(key, value.clone())?;
    }
    Ok(())
}
