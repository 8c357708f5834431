//! Persistent key-value storage for session data.
//!
//! The client keeps exactly one long-lived secret, the bearer token. It is
//! stored through the small [`KeyValueStore`] abstraction so the CLI can
//! persist it in a file while tests keep it in memory.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Storage key holding the bearer token.
pub const TOKEN_KEY: &str = "token";

/// Errors from a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backing file is not a JSON object of strings.
    #[error("storage file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A simple string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process store; contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Store backed by a JSON object file.
///
/// The file is re-read on every access so several processes (or several CLI
/// invocations) observe each other's writes. Writes go to a sibling temp file
/// first and are renamed into place.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn corrupt(&self, source: serde_json::Error) -> StorageError {
        StorageError::Corrupt {
            path: self.path.clone(),
            source,
        }
    }

    fn load(&self) -> Result<HashMap<String, String>, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| self.corrupt(e))
    }

    fn save(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let json = serde_json::to_string_pretty(entries).map_err(|e| self.corrupt(e))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }

    fn update(
        &self,
        apply: impl FnOnce(&mut HashMap<String, String>),
    ) -> Result<(), StorageError> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        apply(&mut entries);
        self.save(&entries)
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}

/// Bearer token access on top of a [`KeyValueStore`].
///
/// Cheap to clone; all clones share the same backend.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}

impl TokenStore {
    #[must_use]
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    /// Token store kept in memory only.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// The stored token, if any.
    ///
    /// A backend read failure is logged and treated as "no token" so a broken
    /// session file never blocks anonymous requests.
    #[must_use]
    pub fn token(&self) -> Option<SecretString> {
        match self.backend.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()).map(SecretString::from),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stored token");
                None
            }
        }
    }

    /// Persist a token.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    pub fn set_token(&self, token: &SecretString) -> Result<(), StorageError> {
        self.backend.set(TOKEN_KEY, token.expose_secret())
    }

    /// Forget the stored token.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be written.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.backend.remove(TOKEN_KEY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        FileStore::new(&path).set(TOKEN_KEY, "abc").unwrap();
        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get(TOKEN_KEY).unwrap().as_deref(), Some("abc"));

        reopened.remove(TOKEN_KEY).unwrap();
        assert_eq!(FileStore::new(&path).get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent.json"));
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_file_store_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileStore::new(&path).get(TOKEN_KEY),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_token_store_ignores_empty_token() {
        let tokens = TokenStore::in_memory();
        assert!(tokens.token().is_none());
        tokens.set_token(&SecretString::from("")).unwrap();
        assert!(tokens.token().is_none());
        tokens.set_token(&SecretString::from("jwt")).unwrap();
        assert_eq!(tokens.token().unwrap().expose_secret(), "jwt");
        tokens.clear().unwrap();
        assert!(tokens.token().is_none());
    }
}
