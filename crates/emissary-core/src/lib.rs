//! Emissary Core - Foundation types for the Emissary permission relay.
//!
//! This crate provides:
//! - Identifier newtypes for requests and agent sessions
//! - The [`PermissionRequest`] descriptor handed over by the hook entry point
//! - Deadline arithmetic shared by every wait in a negotiation
//! - The [`ChatProvider`] trait implemented once per chat platform
//! - Common types used throughout the relay

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod provider;
pub mod request;
pub mod types;
pub mod utils;

pub use provider::{
    ChatAddress, ChatProvider, DecisionPrompt, DecisionSignal, PromptHandle, ProviderError,
    ReasonSignal,
};
pub use request::{Deadline, PermissionRequest};
pub use types::{Platform, RequestId, SessionId, Timestamp};
pub use utils::truncate_to_boundary;
