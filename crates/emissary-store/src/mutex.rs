//! Filesystem mutual exclusion keyed by a string.
//!
//! A holder is represented by a token file created with `create_new`, so
//! creation either succeeds exclusively or observes an existing holder.
//! A crashed holder leaves its token behind; callers detect staleness by
//! token age against their own wait budget and force-clear it rather than
//! deadlocking forever.
//!
//! The state is advisory: release failures are swallowed, never propagated.

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::kv::sanitize_key;

/// A directory of lock-token files, one per key.
#[derive(Debug, Clone)]
pub struct FileMutex {
    dir: PathBuf,
}

impl FileMutex {
    /// Create a mutex registry rooted at `dir`. The directory is created
    /// lazily on the first acquisition attempt.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn token_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", sanitize_key(key)))
    }

    /// Try to take the token for `key` without waiting.
    ///
    /// Returns `Ok(None)` when another holder currently owns the token.
    ///
    /// # Errors
    ///
    /// Returns an error if the token directory or file cannot be created
    /// for reasons other than an existing holder.
    pub fn try_acquire(&self, key: &str) -> StoreResult<Option<FileMutexGuard>> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let path = self.token_path(key);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(Some(FileMutexGuard {
                path,
                released: false,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Age of the current token for `key`, if one exists and its
    /// modification time is readable.
    #[must_use]
    pub fn holder_age(&self, key: &str) -> Option<Duration> {
        let meta = fs::metadata(self.token_path(key)).ok()?;
        let modified = meta.modified().ok()?;
        SystemTime::now().duration_since(modified).ok()
    }

    /// Force-clear the token for `key`, e.g. after detecting a stale holder.
    pub fn force_clear(&self, key: &str) {
        let path = self.token_path(key);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to clear lock token {}: {e}", path.display());
            }
        }
    }
}

/// Held token. Released on [`release`](Self::release) or drop.
#[derive(Debug)]
pub struct FileMutexGuard {
    path: PathBuf,
    released: bool,
}

impl FileMutexGuard {
    /// Release the token. Idempotent; removal failures are swallowed since
    /// a leftover token is recoverable through staleness detection.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to release lock token {}: {e}", self.path.display());
            }
        }
    }
}

impl Drop for FileMutexGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let mutex = FileMutex::new(dir.path());

        let guard = mutex.try_acquire("telegram-42").unwrap();
        assert!(guard.is_some());
        // Second holder is refused while the token exists.
        assert!(mutex.try_acquire("telegram-42").unwrap().is_none());
        // A different key is independent.
        assert!(mutex.try_acquire("slack-C1").unwrap().is_some());
    }

    #[test]
    fn release_frees_the_token() {
        let dir = tempfile::tempdir().unwrap();
        let mutex = FileMutex::new(dir.path());

        let mut guard = mutex.try_acquire("k").unwrap().unwrap();
        guard.release();
        assert!(mutex.try_acquire("k").unwrap().is_some());
    }

    #[test]
    fn release_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mutex = FileMutex::new(dir.path());

        let mut guard = mutex.try_acquire("k").unwrap().unwrap();
        guard.release();
        guard.release();
    }

    #[test]
    fn drop_releases() {
        let dir = tempfile::tempdir().unwrap();
        let mutex = FileMutex::new(dir.path());
        {
            let _guard = mutex.try_acquire("k").unwrap().unwrap();
            assert!(mutex.try_acquire("k").unwrap().is_none());
        }
        assert!(mutex.try_acquire("k").unwrap().is_some());
    }

    #[test]
    fn holder_age_tracks_the_token() {
        let dir = tempfile::tempdir().unwrap();
        let mutex = FileMutex::new(dir.path());

        assert!(mutex.holder_age("k").is_none());
        let _guard = mutex.try_acquire("k").unwrap().unwrap();
        let age = mutex.holder_age("k").unwrap();
        assert!(age < Duration::from_secs(5));
    }

    #[test]
    fn force_clear_removes_a_leaked_token() {
        let dir = tempfile::tempdir().unwrap();
        let mutex = FileMutex::new(dir.path());

        let guard = mutex.try_acquire("k").unwrap().unwrap();
        std::mem::forget(guard);
        assert!(mutex.try_acquire("k").unwrap().is_none());

        mutex.force_clear("k");
        assert!(mutex.try_acquire("k").unwrap().is_some());
        // Clearing a missing token is a no-op.
        mutex.force_clear("missing");
    }
}
