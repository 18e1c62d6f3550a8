//! Terminal negotiation outcomes and rejection-reason provenance.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Provenance of a rejection reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonSource {
    /// Non-empty text supplied by the operator.
    UserInput,
    /// The operator affirmatively chose "no reason".
    ExplicitSkip,
    /// The reason sub-dialog expired without input.
    Timeout,
}

impl ReasonSource {
    /// Lowercase wire name, as persisted in the rejection log.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserInput => "user_input",
            Self::ExplicitSkip => "explicit_skip",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ReasonSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal decision returned to the entry point.
///
/// Non-decisions (lock timeout, expiry) are *not* outcomes; they surface as
/// [`NegotiationError`](crate::NegotiationError) so the entry point cannot
/// mistake silence for operator intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum NegotiationOutcome {
    /// Approve this single tool call.
    Approve,
    /// Approve this tool for the remainder of the session.
    ApproveSession,
    /// Reject the tool call.
    Reject {
        /// Normalized reason text, unmasked (masking applies to the log
        /// only, never to what the agent is told).
        reason: String,
        /// Where the reason came from.
        reason_source: ReasonSource,
    },
}

impl NegotiationOutcome {
    /// Check whether this outcome lets the tool call proceed.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        !matches!(self, Self::Reject { .. })
    }

    /// The rejection reason, if this is a rejection.
    #[must_use]
    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            Self::Reject { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for NegotiationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::ApproveSession => write!(f, "approve (session)"),
            Self::Reject {
                reason,
                reason_source,
            } if reason.is_empty() => write!(f, "reject ({reason_source})"),
            Self::Reject {
                reason,
                reason_source,
            } => write!(f, "reject ({reason_source}): {reason}"),
        }
    }
}
