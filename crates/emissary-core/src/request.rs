//! Permission request descriptor and deadline arithmetic.
//!
//! A [`PermissionRequest`] is built by the hook entry point for one tool
//! call and lives only for the duration of one negotiation. The
//! [`Deadline`] is the single authoritative time ceiling: lock waits,
//! decision waits, and reason waits are all carved out of its remaining
//! budget, never added on top of it.

use serde_json::{Map, Value};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::types::{RequestId, SessionId};

/// Hard wall-clock ceiling for one negotiation.
///
/// Monotonic (`Instant`-based); `remaining()` saturates at zero.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// A deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// Time left before the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    /// Check whether the deadline has passed.
    #[must_use]
    pub fn is_elapsed(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Bound a wait slice to the remaining budget.
    #[must_use]
    pub fn clamp(&self, slice: Duration) -> Duration {
        slice.min(self.remaining())
    }
}

/// One in-flight approval negotiation, as handed over by the entry point.
///
/// `tool_input` is an opaque key/value map rendered into the operator-facing
/// prompt; it is never persisted in full.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    /// Stable identifier across the prompt trail and the rejection log.
    pub id: RequestId,
    /// Name of the tool awaiting permission.
    pub tool_name: String,
    /// Opaque tool arguments.
    pub tool_input: Map<String, Value>,
    /// Working directory of the agent process.
    pub cwd: PathBuf,
    /// Session this request belongs to.
    pub session_id: SessionId,
    /// Absolute ceiling for the whole negotiation.
    pub deadline: Deadline,
}

impl PermissionRequest {
    /// Create a request with a generated id and a cwd-derived session.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, cwd: impl Into<PathBuf>, deadline: Deadline) -> Self {
        let cwd = cwd.into();
        Self {
            id: RequestId::generate(),
            tool_name: tool_name.into(),
            tool_input: Map::new(),
            session_id: SessionId::from_cwd(&cwd),
            cwd,
            deadline,
        }
    }

    /// Use the caller-supplied tool-invocation id.
    #[must_use]
    pub fn with_id(mut self, id: RequestId) -> Self {
        self.id = id;
        self
    }

    /// Attach the tool arguments.
    #[must_use]
    pub fn with_tool_input(mut self, input: Map<String, Value>) -> Self {
        self.tool_input = input;
        self
    }

    /// Use an explicit session id instead of the cwd derivation.
    #[must_use]
    pub fn with_session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    /// Time left before this request's deadline.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.remaining()
    }
}
