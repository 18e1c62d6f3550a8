//! Convenience re-exports for downstream crates.
//!
//! ```rust
//! use emissary_core::prelude::*;
//! ```

pub use crate::provider::{
    ChatAddress, ChatProvider, DecisionPrompt, DecisionSignal, PromptHandle, ProviderError,
    ReasonSignal,
};
pub use crate::request::{Deadline, PermissionRequest};
pub use crate::types::{Platform, RequestId, SessionId, Timestamp};
