//! Persisted state
//!
//! A flat key/value store of JSON values, shaped like the extension's
//! `storage.local` area. Writes made by the gatekeeper are best-effort: a
//! failure is logged and the in-memory mirror stays authoritative until the
//! next successful write.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StorageError;

/// Key of the host risk cache map.
pub const HOST_CACHE_KEY: &str = "hostCache";
/// Key of the hostname allowlist map.
pub const ALLOWLIST_KEY: &str = "allowlistHosts";
/// Key of the exact-URL allowlist used by older versions.
pub const LEGACY_ALLOWLIST_KEY: &str = "allowlist";
/// Prefix of per-tab state keys.
pub const TAB_KEY_PREFIX: &str = "tab:";

pub fn tab_key(tab_id: i32) -> String {
    format!("{}{}", TAB_KEY_PREFIX, tab_id)
}

// =============================================================================
// Storage Trait
// =============================================================================

pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// One key changed in storage; `new_value == None` means it was removed.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub new_value: Option<Value>,
}

impl StorageChange {
    pub fn new(key: impl Into<String>, new_value: Option<Value>) -> Self {
        Self {
            key: key.into(),
            new_value,
        }
    }
}

/// Read and deserialize a key, treating a malformed value as absent.
pub fn load_typed<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Option<T> {
    match storage.get(key) {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                log::warn!("Discarding malformed stored {}: {}", key, e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            log::warn!("Failed to read {}: {}", key, e);
            None
        }
    }
}

/// Read a map, dropping individual entries that do not deserialize.
pub fn load_map<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> HashMap<String, T> {
    let Some(Value::Object(map)) = load_typed::<Value>(storage, key) else {
        return HashMap::new();
    };
    map.into_iter()
        .filter_map(|(k, v)| serde_json::from_value(v).ok().map(|parsed| (k, parsed)))
        .collect()
}

/// Serialize and write a key, logging instead of failing.
pub fn persist_best_effort<T: Serialize + ?Sized>(storage: &dyn Storage, key: &str, value: &T) {
    let result = serde_json::to_value(value)
        .map_err(StorageError::from)
        .and_then(|v| storage.set(key, v));
    if let Err(e) = result {
        log::warn!("Failed to persist {}: {}", key, e);
    }
}

/// Remove a key, logging instead of failing.
pub fn remove_best_effort(storage: &dyn Storage, key: &str) {
    if let Err(e) = storage.remove(key) {
        log::warn!("Failed to remove {}: {}", key, e);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Memory Storage
// =============================================================================

/// In-memory storage, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<Map<String, Value>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        lock(&self.values).insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.values).remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(lock(&self.values).keys().cloned().collect())
    }
}

// =============================================================================
// JSON File Storage
// =============================================================================

/// Storage backed by a single JSON object file, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonFileStorage {
    /// Open a state file. A missing file starts empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                match serde_json::from_str::<Value>(&content)? {
                    Value::Object(map) => map,
                    _ => return Err(StorageError::NotAnObject(path.display().to_string())),
                }
            }
        } else {
            Map::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &Map<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Storage for JsonFileStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(lock(&self.values).get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut values = lock(&self.values);
        values.insert(key.to_string(), value);
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut values = lock(&self.values);
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(lock(&self.values).keys().cloned().collect())
    }
}
