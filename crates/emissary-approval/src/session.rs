//! Session allow-list cache.
//!
//! "Approve for session" records the tool name against the agent session.
//! Later requests for the same `(session, tool)` pair resolve without a
//! prompt until the record's validity window closes. An optimization, not a
//! security boundary: every failure mode is a cache miss, which degrades to
//! re-prompting the operator.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use emissary_core::{SessionId, Timestamp};
use emissary_store::KvStore;
use serde::{Deserialize, Serialize};
use tracing::warn;

const TABLE: &str = "sessions";

/// One persisted allow-list per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    session_id: SessionId,
    allowed_tools: BTreeSet<String>,
    /// Validity anchors here and survives later tool additions; a stale
    /// record is bypassed, never refreshed.
    created_at: Timestamp,
}

impl SessionRecord {
    fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            allowed_tools: BTreeSet::new(),
            created_at: Timestamp::now(),
        }
    }
}

/// Per-session set of tools pre-approved for the remainder of the session.
pub struct SessionAllowList {
    store: Arc<dyn KvStore>,
    ttl: Duration,
}

impl SessionAllowList {
    /// Create an allow-list with the given validity window.
    pub fn new(store: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Check whether `tool` was approved for `session` within the window.
    #[must_use]
    pub fn is_allowed(&self, session: &SessionId, tool: &str) -> bool {
        self.load(session)
            .is_some_and(|record| record.allowed_tools.contains(tool))
    }

    /// Record `tool` as approved for `session`, creating the record if
    /// absent. An expired record is replaced by a fresh one rather than
    /// extended.
    pub fn record_allowed(&self, session: &SessionId, tool: &str) {
        let mut record = self
            .load(session)
            .unwrap_or_else(|| SessionRecord::new(session.clone()));
        record.allowed_tools.insert(tool.to_string());

        let bytes = match serde_json::to_vec(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to encode session record for {session}: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(TABLE, session.as_str(), &bytes) {
            warn!("session allow-list write failed for {session}: {e}");
        }
    }

    fn load(&self, session: &SessionId) -> Option<SessionRecord> {
        let bytes = match self.store.get(TABLE, session.as_str()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("session allow-list read failed for {session}, treating as miss: {e}");
                return None;
            }
        };
        let record: SessionRecord = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!("corrupt session record for {session}, treating as miss: {e}");
                return None;
            }
        };
        if record.created_at.is_older_than(self.ttl) {
            return None;
        }
        Some(record)
    }
}

impl std::fmt::Debug for SessionAllowList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionAllowList")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
