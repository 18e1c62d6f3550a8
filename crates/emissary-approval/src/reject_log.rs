//! Append-only rejection log.
//!
//! One JSON object per line, rotated by size, masked before writing.
//! Appends from unrelated negotiations may race on the same host, so the
//! rotate-then-append sequence runs under a sibling lock file held with an
//! exclusive advisory lock. The log is strictly a side channel: callers
//! swallow append errors and never let them change a decision.

use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use emissary_core::{PermissionRequest, Platform, RequestId, Timestamp};

use crate::outcome::ReasonSource;

/// Attempts to take the append lock before giving up.
const LOCK_RETRIES: u32 = 40;
/// Backoff between append-lock attempts.
const LOCK_BACKOFF: Duration = Duration::from_millis(25);

/// One rejection, as persisted. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectLogEntry {
    /// When the rejection was decided.
    pub timestamp: Timestamp,
    /// Platform the operator was reached on.
    pub provider: Platform,
    /// Always `"deny"`; present so the lines are self-describing.
    pub decision: String,
    /// The rejected request.
    pub request_id: RequestId,
    /// The rejected tool.
    pub tool_name: String,
    /// Agent working directory.
    pub cwd: String,
    /// Rejection reason, already masked.
    pub reason: String,
    /// Where the reason came from.
    pub reason_source: ReasonSource,
}

impl RejectLogEntry {
    /// Build an entry for a rejection. `masked_reason` must already have
    /// passed through [`mask_secrets`](crate::mask_secrets).
    #[must_use]
    pub fn new(
        provider: Platform,
        request: &PermissionRequest,
        masked_reason: String,
        reason_source: ReasonSource,
    ) -> Self {
        Self {
            timestamp: Timestamp::now(),
            provider,
            decision: "deny".to_string(),
            request_id: request.id.clone(),
            tool_name: request.tool_name.clone(),
            cwd: request.cwd.display().to_string(),
            reason: masked_reason,
            reason_source,
        }
    }
}

/// Errors from the rejection log.
///
/// Callers treat all of these as diagnostics; none may alter a decision.
#[derive(Debug, thiserror::Error)]
pub enum RejectLogError {
    /// The append lock stayed busy through every retry.
    #[error("append lock busy: {0}")]
    LockBusy(String),

    /// Filesystem operation failed.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An entry could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl RejectLogError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Size-rotated JSON-lines log of rejections.
#[derive(Debug, Clone)]
pub struct RejectLog {
    path: PathBuf,
    rotate_bytes: u64,
    max_files: usize,
}

impl RejectLog {
    /// Create a log at `path`, rotating past `rotate_bytes` and retaining
    /// `max_files` generations (zero truncates in place).
    pub fn new(path: impl Into<PathBuf>, rotate_bytes: u64, max_files: usize) -> Self {
        Self {
            path: path.into(),
            rotate_bytes,
            max_files,
        }
    }

    /// Durably append one entry.
    ///
    /// Creates parent directories as needed, rotates first when the active
    /// file has grown past the threshold, and holds the append lock across
    /// the whole sequence so concurrent appenders never interleave lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock stays busy or the write fails. Callers
    /// on the rejection path swallow it.
    pub fn append(&self, entry: &RejectLogEntry) -> Result<(), RejectLogError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| RejectLogError::io(parent, e))?;
            }
        }

        let _lock = self.acquire_append_lock()?;
        self.rotate_if_needed()?;

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RejectLogError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| RejectLogError::io(&self.path, e))?;
        file.flush().map_err(|e| RejectLogError::io(&self.path, e))?;
        Ok(())
    }

    /// Read every entry in the active file. Maintenance/test helper;
    /// skips lines that fail to parse.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read (a missing file yields
    /// an empty list).
    pub fn read_entries(&self) -> Result<Vec<RejectLogEntry>, RejectLogError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RejectLogError::io(&self.path, e)),
        };
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// Path of rotated generation `n` (`<log>.1` is the newest).
    #[must_use]
    pub fn generation_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate_if_needed(&self) -> Result<(), RejectLogError> {
        let size = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if size <= self.rotate_bytes {
            return Ok(());
        }

        if self.max_files == 0 {
            // No retention: drop the oldest data by truncating in place.
            fs::File::create(&self.path).map_err(|e| RejectLogError::io(&self.path, e))?;
            return Ok(());
        }

        // Shift generations up, dropping the one past the retention count,
        // then move the active file to generation 1.
        let oldest = self.generation_path(self.max_files);
        if oldest.exists() {
            let _ = fs::remove_file(&oldest);
        }
        for n in (1..self.max_files).rev() {
            let from = self.generation_path(n);
            if from.exists() {
                let to = self.generation_path(n.saturating_add(1));
                let _ = fs::rename(&from, &to);
            }
        }
        fs::rename(&self.path, self.generation_path(1))
            .map_err(|e| RejectLogError::io(&self.path, e))?;
        Ok(())
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn acquire_append_lock(&self) -> Result<AppendLock, RejectLogError> {
        let path = self.lock_path();
        for _attempt in 0..LOCK_RETRIES {
            let file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| RejectLogError::io(&path, e))?;
            if fs2::FileExt::try_lock_exclusive(&file).is_ok() {
                return Ok(AppendLock { file, path });
            }
            std::thread::sleep(LOCK_BACKOFF);
        }
        Err(RejectLogError::LockBusy(path.display().to_string()))
    }
}

/// Held append lock; unlocked and removed on drop, even when a write threw.
struct AppendLock {
    file: fs::File,
    path: PathBuf,
}

impl Drop for AppendLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            debug!("failed to unlock {}: {e}", self.path.display());
        }
        let _ = fs::remove_file(&self.path);
    }
}
