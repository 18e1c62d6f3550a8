//! Identifier and platform types shared across the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Chat platform that carries the operator dialog.
///
/// Each platform has exactly one [`ChatProvider`](crate::ChatProvider)
/// implementation; the relay core never talks to a platform API directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Telegram bot API (inline-keyboard prompts).
    Telegram,
    /// Slack Web API (interactive-message prompts).
    Slack,
}

impl Platform {
    /// Lowercase wire name, as persisted in the rejection log.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Slack => "slack",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identifier for a permission request.
///
/// Prefer the caller-supplied tool-invocation id so the request can be traced
/// across the platform's message-edit trail and the rejection log; fall back
/// to [`RequestId::generate`] when the entry point has none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Wrap a caller-supplied identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a `request-<unix-millis>-<random>` identifier.
    #[must_use]
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis();
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("request-{millis}-{}", &random[..8]))
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for one agent run.
///
/// Requests carrying the same session id share the session allow-list, so an
/// "approve for session" decision covers later calls of the same tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an explicit session identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Resolve a session id: explicit id, else environment-level id, else
    /// derived from the working directory.
    ///
    /// The cwd derivation is deterministic (UUIDv5 over the path), so
    /// repeated requests from the same directory in the same run map to one
    /// session even without an explicit id.
    #[must_use]
    pub fn resolve(explicit: Option<&str>, env: Option<&str>, cwd: &Path) -> Self {
        match (explicit, env) {
            (Some(id), _) => Self::new(id),
            (None, Some(id)) => Self::new(id),
            (None, None) => Self::from_cwd(cwd),
        }
    }

    /// Derive a session id from a working directory.
    #[must_use]
    pub fn from_cwd(cwd: &Path) -> Self {
        let uuid = Uuid::new_v5(&Uuid::NAMESPACE_URL, cwd.to_string_lossy().as_bytes());
        Self(format!("cwd-{uuid}"))
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wall-clock timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// Get the current timestamp.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Time elapsed since this timestamp, saturating to zero on clock skew.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.0)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Check whether this timestamp is older than `window`.
    #[must_use]
    pub fn is_older_than(&self, window: Duration) -> bool {
        self.elapsed() > window
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%SZ"))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}
