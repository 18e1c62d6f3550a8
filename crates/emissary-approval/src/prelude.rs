//! Convenience re-exports for entry points and providers.
//!
//! ```rust
//! use emissary_approval::prelude::*;
//! ```

pub use emissary_core::prelude::*;

pub use crate::cascade::{CascadeState, CascadeStore};
pub use crate::config::RelayConfig;
pub use crate::error::{NegotiationError, NegotiationResult};
pub use crate::lock::{LockKey, UserLock, UserLockGuard};
pub use crate::negotiation::Negotiator;
pub use crate::outcome::{NegotiationOutcome, ReasonSource};
pub use crate::reject_log::{RejectLog, RejectLogEntry};
pub use crate::session::SessionAllowList;
