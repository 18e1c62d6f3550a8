//! Table + key → bytes store.
//!
//! One abstraction backs all of the relay's shared mutable state (cascade
//! markers, session allow-lists) instead of bespoke file formats per
//! concern. Values are opaque bytes; serialization and TTL policy belong to
//! the callers.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::error::{StoreError, StoreResult};

/// Replace characters that are unsafe in file names.
///
/// Keys and table names pass through this before touching the filesystem,
/// so provider ids, chat ids, and session ids can be used verbatim.
#[must_use]
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// A minimal key-value store: `(table, key) → bytes`.
///
/// Implementations must be safe to share across tasks. Operations are
/// synchronous; both backends complete in microseconds and are called from
/// async code directly.
pub trait KvStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails; a missing key is `Ok(None)`.
    fn get(&self, table: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write a value, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be persisted.
    fn set(&self, table: &str, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove a value. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn delete(&self, table: &str, key: &str) -> StoreResult<()>;
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryKvStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, across all tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Check whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, table: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(entries.get(&(table.to_string(), key.to_string())).cloned())
    }

    fn set(&self, table: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        entries.insert((table.to_string(), key.to_string()), value.to_vec());
        Ok(())
    }

    fn delete(&self, table: &str, key: &str) -> StoreResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        entries.remove(&(table.to_string(), key.to_string()));
        Ok(())
    }
}

impl fmt::Debug for MemoryKvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryKvStore")
            .field("len", &self.len())
            .finish()
    }
}

/// File-backed store: one file per `(table, key)` under a root directory.
///
/// Writes go through a temp file in the same directory followed by a
/// rename, so readers never observe a partially written value. Last writer
/// wins; the relay's callers serialize writers where ordering matters.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    root: PathBuf,
}

impl FileKvStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, table: &str, key: &str) -> PathBuf {
        self.root
            .join(sanitize_key(table))
            .join(format!("{}.json", sanitize_key(key)))
    }
}

impl KvStore for FileKvStore {
    fn get(&self, table: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let path = self.entry_path(table, key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    fn set(&self, table: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        let path = self.entry_path(table, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value).map_err(|e| StoreError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }

    fn delete(&self, table: &str, key: &str) -> StoreResult<()> {
        let path = self.entry_path(table, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }
}
