//! Explicit negotiation state machine.
//!
//! ```text
//! WaitingDecision ── OperatorApproved ───────▶ Approved
//!                 ── OperatorApprovedSession ▶ ApprovedSession
//!                 ── OperatorRejected ───────▶ WaitingReason
//!                 ── DeadlineElapsed ────────▶ Expired
//! WaitingReason   ── ReasonProvided ─────────▶ RejectedWithReason
//!                 ── ReasonSkipped ──────────▶ RejectedNoReason(explicit_skip)
//!                 ── ReasonTimedOut ─────────▶ RejectedNoReason(timeout)
//!                 ── DeadlineElapsed ────────▶ Expired
//! ```
//!
//! All states other than the two `Waiting*` states are terminal. The
//! negotiation driver threads every transition through [`NegotiationState::apply`],
//! so an impossible edge is a typed error rather than a silent branch.

use std::fmt;

use crate::error::{NegotiationError, NegotiationResult};
use crate::outcome::ReasonSource;

/// The lifecycle state of one negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// The decision prompt is live; waiting for the operator.
    WaitingDecision,
    /// The operator rejected; the reason sub-dialog is live.
    WaitingReason,
    /// Terminal: approved this call.
    Approved,
    /// Terminal: approved for the rest of the session.
    ApprovedSession,
    /// Terminal: rejected with operator-supplied text.
    RejectedWithReason,
    /// Terminal: rejected without text (skip or reason timeout).
    RejectedNoReason(ReasonSource),
    /// Terminal: no decision before the deadline. A non-decision, never to
    /// be conflated with a rejection.
    Expired,
}

/// Events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationEvent {
    /// Operator approved this call.
    OperatorApproved,
    /// Operator approved the tool for the session.
    OperatorApprovedSession,
    /// Operator rejected the call.
    OperatorRejected,
    /// Non-empty reason text arrived.
    ReasonProvided,
    /// The "no reason" affordance was used (or the reason prompt could not
    /// be sent at all).
    ReasonSkipped,
    /// The reason sub-dialog expired.
    ReasonTimedOut,
    /// The request deadline elapsed.
    DeadlineElapsed,
}

impl NegotiationState {
    /// Check whether this state ends the negotiation.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::WaitingDecision | Self::WaitingReason)
    }

    /// Apply one event, producing the next state.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::InvalidTransition`] for an edge the
    /// protocol does not define (including any event on a terminal state).
    pub fn apply(self, event: NegotiationEvent) -> NegotiationResult<Self> {
        use NegotiationEvent as E;
        use NegotiationState as S;
        match (self, event) {
            (S::WaitingDecision, E::OperatorApproved) => Ok(S::Approved),
            (S::WaitingDecision, E::OperatorApprovedSession) => Ok(S::ApprovedSession),
            (S::WaitingDecision, E::OperatorRejected) => Ok(S::WaitingReason),
            (S::WaitingDecision, E::DeadlineElapsed) => Ok(S::Expired),
            (S::WaitingReason, E::ReasonProvided) => Ok(S::RejectedWithReason),
            (S::WaitingReason, E::ReasonSkipped) => {
                Ok(S::RejectedNoReason(ReasonSource::ExplicitSkip))
            }
            (S::WaitingReason, E::ReasonTimedOut) => {
                Ok(S::RejectedNoReason(ReasonSource::Timeout))
            }
            (S::WaitingReason, E::DeadlineElapsed) => Ok(S::Expired),
            (from, event) => Err(NegotiationError::InvalidTransition { from, event }),
        }
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitingDecision => write!(f, "waiting_decision"),
            Self::WaitingReason => write!(f, "waiting_reason"),
            Self::Approved => write!(f, "approved"),
            Self::ApprovedSession => write!(f, "approved_session"),
            Self::RejectedWithReason => write!(f, "rejected_with_reason"),
            Self::RejectedNoReason(source) => write!(f, "rejected_no_reason({source})"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

impl fmt::Display for NegotiationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorApproved => write!(f, "operator_approved"),
            Self::OperatorApprovedSession => write!(f, "operator_approved_session"),
            Self::OperatorRejected => write!(f, "operator_rejected"),
            Self::ReasonProvided => write!(f, "reason_provided"),
            Self::ReasonSkipped => write!(f, "reason_skipped"),
            Self::ReasonTimedOut => write!(f, "reason_timed_out"),
            Self::DeadlineElapsed => write!(f, "deadline_elapsed"),
        }
    }
}
