//! Error taxonomy for the negotiation core.
//!
//! The split that matters: [`NegotiationError::LockTimeout`] and
//! [`NegotiationError::Expired`] are *non-decisions* — the operator never
//! said anything — and must stay distinguishable from an explicit
//! rejection, which is a normal [`NegotiationOutcome`](crate::NegotiationOutcome).

use emissary_core::{ProviderError, RequestId};

use crate::state::{NegotiationEvent, NegotiationState};

/// Errors that can end a negotiation without an operator decision.
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    /// Could not serialize with another in-flight negotiation before the
    /// deadline. Non-decision.
    #[error("lock timeout after {waited_ms}ms for key {key}")]
    LockTimeout {
        /// The operator key that stayed locked.
        key: String,
        /// How long the negotiation waited.
        waited_ms: u64,
    },

    /// The operator never responded to the decision prompt. Non-decision.
    #[error("request {request_id} expired before a decision was made")]
    Expired {
        /// The request whose prompt expired.
        request_id: RequestId,
    },

    /// The decision prompt could not be sent.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Store backend failure during lock acquisition.
    #[error("storage error: {0}")]
    Storage(String),

    /// A state-machine edge the protocol does not allow.
    #[error("invalid transition from {from} on {event}")]
    InvalidTransition {
        /// State the machine was in.
        from: NegotiationState,
        /// Event that does not apply to it.
        event: NegotiationEvent,
    },
}

impl NegotiationError {
    /// Check whether this error is a non-decision the entry point may
    /// resolve with its own default policy (as opposed to an internal
    /// failure).
    #[must_use]
    pub fn is_non_decision(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Expired { .. })
    }
}

/// Result type for negotiation operations.
pub type NegotiationResult<T> = Result<T, NegotiationError>;
