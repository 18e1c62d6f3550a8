//! Relay configuration values.
//!
//! The core consumes values only; loading them (files, environment) is the
//! entry point's concern. Every field has a production default so a bare
//! `RelayConfig::default()` works.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the negotiation core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Overall request deadline, in milliseconds.
    pub request_timeout_ms: u64,
    /// Reason sub-dialog timeout, in milliseconds. Always bounded by the
    /// time remaining to the request deadline.
    pub reason_timeout_ms: u64,
    /// Maximum rejection-reason length, in characters. Longer input is
    /// plainly truncated.
    pub reason_max_chars: usize,
    /// Case-insensitive keywords recognized as an explicit "no reason".
    pub skip_keywords: Vec<String>,
    /// Cascade auto-reject window, in milliseconds. A fixed constant; it
    /// does not scale with the request timeout.
    pub cascade_window_ms: u64,
    /// Session allow-list validity from creation, in milliseconds.
    pub session_ttl_ms: u64,
    /// Poll interval for lock and platform waits, in milliseconds.
    pub poll_interval_ms: u64,
    /// Rejection log path.
    pub log_path: PathBuf,
    /// Rotate the log once it exceeds this many bytes.
    pub log_rotate_bytes: u64,
    /// Rotated generations to retain. Zero truncates the active file in
    /// place instead of rotating.
    pub log_max_files: usize,
    /// Directory for user-lock token files.
    pub lock_dir: PathBuf,
    /// Root directory for the cascade/session stores.
    pub state_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5 * 60 * 1000,
            reason_timeout_ms: 60 * 1000,
            reason_max_chars: 500,
            skip_keywords: vec![
                "skip".to_string(),
                "none".to_string(),
                "no reason".to_string(),
                "-".to_string(),
            ],
            cascade_window_ms: 5000,
            session_ttl_ms: 24 * 60 * 60 * 1000,
            poll_interval_ms: 500,
            log_path: PathBuf::from(".emissary/reject.log"),
            log_rotate_bytes: 1024 * 1024,
            log_max_files: 5,
            lock_dir: PathBuf::from(".emissary/locks"),
            state_dir: PathBuf::from(".emissary/state"),
        }
    }
}

impl RelayConfig {
    /// Overall request deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reason sub-dialog timeout.
    #[must_use]
    pub fn reason_timeout(&self) -> Duration {
        Duration::from_millis(self.reason_timeout_ms)
    }

    /// Cascade auto-reject window.
    #[must_use]
    pub fn cascade_window(&self) -> Duration {
        Duration::from_millis(self.cascade_window_ms)
    }

    /// Session allow-list validity window.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl_ms)
    }

    /// Poll interval for bounded waits.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
