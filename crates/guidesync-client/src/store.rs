//! Persisted key/value storage for the session token.
//!
//! The browser client keeps its token in local storage under several
//! keys. [`TokenStore`] is the same contract: string values under string
//! keys, durable across restarts for [`JsonFileTokenStore`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;

use crate::error::ClientError;

/// Key/value storage for token state.
pub trait TokenStore: Send + Sync {
    /// Read the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if the backing store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, ClientError>;

    /// Write `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if the backing store cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), ClientError>;

    /// Remove `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if the backing store cannot be written.
    fn remove(&self, key: &str) -> Result<(), ClientError>;
}

/// In-process store; contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: DashMap<String, String>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        Ok(self.entries.get(key).map(|value| value.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        let _ = self.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ClientError> {
        let _ = self.entries.remove(key);
        Ok(())
    }
}

/// Store backed by a JSON object file, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileTokenStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileTokenStore {
    /// Open the store at `path`, reading existing entries if the file exists.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Storage`] if the file exists but cannot be
    /// read, or [`ClientError::Serde`] if it is not a JSON object of strings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let path = path.into();
        let entries = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                ClientError::Storage(format!("failed to read {}: {e}", path.display()))
            })?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ClientError::Storage(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, json).map_err(|e| {
            ClientError::Storage(format!("failed to write {}: {e}", self.path.display()))
        })
    }
}

impl TokenStore for JsonFileTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>, ClientError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ClientError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.get(key).is_some_and(|current| current == value) {
            return Ok(());
        }
        let _ = entries.insert(key.to_owned(), value.to_owned());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), ClientError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryTokenStore::new();
        assert_eq!(store.get("sessionToken").unwrap(), None);
        store.set("sessionToken", "abc").unwrap();
        assert_eq!(store.get("sessionToken").unwrap().as_deref(), Some("abc"));
        store.remove("sessionToken").unwrap();
        store.remove("sessionToken").unwrap();
        assert_eq!(store.get("sessionToken").unwrap(), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("token.json");

        let store = JsonFileTokenStore::open(&path).unwrap();
        store.set("sessionToken", "abc").unwrap();
        store.set("session_token", "abc").unwrap();
        store.remove("session_token").unwrap();
        drop(store);

        let reopened = JsonFileTokenStore::open(&path).unwrap();
        assert_eq!(reopened.get("sessionToken").unwrap().as_deref(), Some("abc"));
        assert_eq!(reopened.get("session_token").unwrap(), None);
    }

    #[test]
    fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonFileTokenStore::open(&path),
            Err(ClientError::Serde(_))
        ));
    }
}
