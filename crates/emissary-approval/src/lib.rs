//! Permission negotiation for chat-relayed tool approvals.
//!
//! One [`Negotiator`] relays a single tool-permission request to a human
//! operator and returns the terminal decision within a hard deadline:
//!
//! 1. Session allow-list check — tools already approved for the session
//!    resolve without prompting.
//! 2. User lock — negotiations for the same operator are serialized; the
//!    wait is carved out of the request deadline.
//! 3. Cascade check — a rejection moments ago auto-rejects this request
//!    without re-spamming the operator.
//! 4. Decision prompt — approve / approve-for-session / reject, polled
//!    within the remaining budget.
//! 5. Reason sub-dialog — on rejection, a free-text reason with its own
//!    timeout budget carved out of the parent deadline.
//! 6. Rejection log — masked, rotated, append-only; a failed write never
//!    changes the decision.
//!
//! Non-decisions (lock timeout, prompt expiry) are typed apart from
//! rejections so the entry point can apply its own default policy.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod cascade;
pub mod config;
pub mod error;
pub mod lock;
pub mod negotiation;
pub mod normalize;
pub mod outcome;
pub mod prelude;
pub mod reject_log;
pub mod session;
pub mod state;

pub use cascade::{CascadeState, CascadeStore};
pub use config::RelayConfig;
pub use error::{NegotiationError, NegotiationResult};
pub use lock::{LockKey, UserLock, UserLockGuard};
pub use negotiation::Negotiator;
pub use normalize::{mask_secrets, normalize_reason};
pub use outcome::{NegotiationOutcome, ReasonSource};
pub use reject_log::{RejectLog, RejectLogEntry};
pub use session::SessionAllowList;
pub use state::{NegotiationEvent, NegotiationState};
