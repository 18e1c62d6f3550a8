//! Cascade auto-reject state.
//!
//! When an operator rejects a request, a short-lived marker is written for
//! their lock key. The next negotiation for the same key, started within
//! the cascade window, resolves as the same rejection without prompting —
//! so an agent retrying a denied action cannot re-spam the operator.
//!
//! Cascade state is only read and written inside the user lock's critical
//! section, which is what makes the read-check-write sequence safe.

use std::sync::Arc;
use std::time::Duration;

use emissary_core::{RequestId, Timestamp};
use emissary_store::KvStore;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::lock::LockKey;
use crate::outcome::ReasonSource;

const TABLE: &str = "cascade";

/// The marker left behind by a rejection.
///
/// Carries the normalized (but unmasked) reason so a cascade hit reproduces
/// exactly what the agent was told the first time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeState {
    /// When the rejection happened; anchors the cascade window.
    pub created_at: Timestamp,
    /// Normalized rejection reason.
    pub reason: String,
    /// Where the reason came from.
    pub reason_source: ReasonSource,
    /// The rejected request.
    pub request_id: RequestId,
    /// The rejected tool.
    pub tool_name: String,
}

impl CascadeState {
    /// Create a marker for a rejection that just happened.
    #[must_use]
    pub fn new(
        request_id: RequestId,
        tool_name: impl Into<String>,
        reason: impl Into<String>,
        reason_source: ReasonSource,
    ) -> Self {
        Self {
            created_at: Timestamp::now(),
            reason: reason.into(),
            reason_source,
            request_id,
            tool_name: tool_name.into(),
        }
    }
}

/// Reads and writes cascade markers keyed by [`LockKey`].
///
/// Every failure path degrades to "no cascade": a broken store means the
/// operator gets prompted again, never that a request is silently decided.
pub struct CascadeStore {
    store: Arc<dyn KvStore>,
    window: Duration,
}

impl CascadeStore {
    /// Create a cascade store with the given validity window.
    pub fn new(store: Arc<dyn KvStore>, window: Duration) -> Self {
        Self { store, window }
    }

    /// Unexpired cascade state for `key`, if any.
    #[must_use]
    pub fn read(&self, key: &LockKey) -> Option<CascadeState> {
        let bytes = match self.store.get(TABLE, &key.token_stem()) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("cascade read failed for {key}, treating as absent: {e}");
                return None;
            }
        };
        let state: CascadeState = match serde_json::from_slice(&bytes) {
            Ok(state) => state,
            Err(e) => {
                warn!("corrupt cascade state for {key}, treating as absent: {e}");
                return None;
            }
        };
        if state.created_at.is_older_than(self.window) {
            return None;
        }
        Some(state)
    }

    /// Write a fresh marker for `key`.
    pub fn write(&self, key: &LockKey, state: &CascadeState) {
        let bytes = match serde_json::to_vec(state) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to encode cascade state for {key}: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(TABLE, &key.token_stem(), &bytes) {
            warn!("cascade write failed for {key}: {e}");
        }
    }

    /// Remove the marker for `key` (on approval).
    pub fn clear(&self, key: &LockKey) {
        if let Err(e) = self.store.delete(TABLE, &key.token_stem()) {
            warn!("cascade clear failed for {key}: {e}");
        }
    }
}

impl std::fmt::Debug for CascadeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeStore")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
