//! Chat-provider interface.
//!
//! Each chat platform implements [`ChatProvider`] once. The negotiation core
//! drives the full round trip through this trait and never touches a
//! platform API directly, so the protocol logic stays testable with
//! scripted providers.
//!
//! The platforms expose pull-style update/reaction queries, so the interface
//! is shaped around bounded polls: `poll_*` waits at most one slice and the
//! caller loops within its remaining deadline budget.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use std::time::Duration;

use crate::request::PermissionRequest;
use crate::types::{Platform, RequestId};
use crate::utils::truncate_to_boundary;

/// Characters of rendered tool input shown to the operator.
const INPUT_PREVIEW_CHARS: usize = 300;

/// Where the operator lives: platform + chat/channel + optional user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatAddress {
    /// The platform carrying the dialog.
    pub platform: Platform,
    /// Chat or channel identifier on that platform.
    pub chat_id: String,
    /// Specific user within the chat, when decisions are per-user.
    pub user_id: Option<String>,
}

impl ChatAddress {
    /// Address a whole chat or channel.
    pub fn new(platform: Platform, chat_id: impl Into<String>) -> Self {
        Self {
            platform,
            chat_id: chat_id.into(),
            user_id: None,
        }
    }

    /// Narrow the address to one user within the chat.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

impl fmt::Display for ChatAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.user_id {
            Some(user) => write!(f, "{}:{}:{user}", self.platform, self.chat_id),
            None => write!(f, "{}:{}", self.platform, self.chat_id),
        }
    }
}

/// Errors from a chat-platform client.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// A prompt message could not be sent.
    #[error("failed to send prompt: {0}")]
    Send(String),

    /// A poll for responses failed.
    ///
    /// The negotiation core treats this as "no signal this tick" and keeps
    /// retrying within the remaining deadline.
    #[error("failed to poll for responses: {0}")]
    Poll(String),
}

/// Opaque handle identifying one prompt message on the platform.
///
/// Signals are only ever honored for the handle they address; a button
/// press or reaction on an older message must never resolve a live request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PromptHandle {
    /// Platform message identifier of the prompt.
    pub message_id: String,
    /// The request this prompt belongs to.
    pub request_id: RequestId,
}

impl PromptHandle {
    /// Create a handle for a sent prompt message.
    pub fn new(message_id: impl Into<String>, request_id: RequestId) -> Self {
        Self {
            message_id: message_id.into(),
            request_id,
        }
    }
}

/// One polling tick's worth of operator decision signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSignal {
    /// Approve this single tool call.
    Approve,
    /// Approve this tool for the remainder of the session.
    ApproveSession,
    /// Reject the tool call.
    Reject,
    /// No decision yet.
    Pending,
}

/// One polling tick's worth of rejection-reason signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonSignal {
    /// Free-text reason supplied by the operator.
    Text(String),
    /// The operator used the explicit "no reason" affordance.
    ExplicitSkip,
    /// No reason input yet.
    Pending,
}

/// The operator-facing decision prompt, platform-neutral.
#[derive(Debug, Clone)]
pub struct DecisionPrompt {
    /// Request this prompt presents.
    pub request_id: RequestId,
    /// Tool awaiting permission.
    pub tool_name: String,
    /// Working directory of the agent.
    pub cwd: String,
    /// Compact, truncated preview of the tool arguments.
    pub input_preview: String,
}

impl DecisionPrompt {
    /// Build a prompt from a request descriptor.
    #[must_use]
    pub fn from_request(request: &PermissionRequest) -> Self {
        let rendered = serde_json::Value::Object(request.tool_input.clone()).to_string();
        Self {
            request_id: request.id.clone(),
            tool_name: request.tool_name.clone(),
            cwd: request.cwd.display().to_string(),
            input_preview: truncate_to_boundary(&rendered, INPUT_PREVIEW_CHARS).to_string(),
        }
    }

    /// Render the prompt body as plain text.
    ///
    /// Providers apply their own markup (HTML, mrkdwn) on top.
    #[must_use]
    pub fn render(&self) -> String {
        let mut text = format!("Permission required: {}\n", self.tool_name);
        let _ = writeln!(text, "cwd: {}", self.cwd);
        if self.input_preview != "{}" {
            let _ = writeln!(text, "input: {}", self.input_preview);
        }
        let _ = write!(text, "request: {}", self.request_id);
        text
    }
}

/// Interface to one chat platform.
///
/// Implementations live outside the core (one per platform) and own all
/// HTTP plumbing, markup, and message bookkeeping.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Post the decision prompt (approve / approve-for-session / reject).
    ///
    /// A failure here aborts the negotiation; there is nothing to wait on.
    async fn send_decision_prompt(
        &self,
        prompt: &DecisionPrompt,
    ) -> Result<PromptHandle, ProviderError>;

    /// Poll for a decision addressed to `handle`, waiting at most `slice`.
    ///
    /// Only signals for this exact prompt may be reported. Signals on stale
    /// prompts, or reactions the bot itself added, are the provider's to
    /// discard.
    async fn poll_decision(
        &self,
        handle: &PromptHandle,
        slice: Duration,
    ) -> Result<DecisionSignal, ProviderError>;

    /// Ask the operator for a free-text rejection reason.
    ///
    /// The prompt must carry an explicit "no reason" affordance. A failure
    /// here folds into an immediate explicit skip on the caller's side.
    async fn send_reason_prompt(
        &self,
        handle: &PromptHandle,
    ) -> Result<PromptHandle, ProviderError>;

    /// Poll for reason input addressed to `handle`, waiting at most `slice`.
    async fn poll_reason(
        &self,
        handle: &PromptHandle,
        slice: Duration,
    ) -> Result<ReasonSignal, ProviderError>;

    /// Best-effort: annotate the prompt as expired, referencing the request
    /// id, so a late button press is not silently ignored. Must not raise.
    async fn mark_expired(&self, handle: &PromptHandle);

    /// Best-effort: annotate the prompt with its terminal outcome.
    async fn mark_resolved(&self, handle: &PromptHandle, summary: &str);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Deadline;
    use serde_json::{Map, Value};

    fn request_with_input() -> PermissionRequest {
        let mut input = Map::new();
        input.insert("command".to_string(), Value::String("rm -rf /tmp/x".into()));
        PermissionRequest::new(
            "Bash",
            "/work/repo",
            Deadline::after(Duration::from_secs(1)),
        )
        .with_tool_input(input)
    }

    #[test]
    fn prompt_carries_request_context() {
        let request = request_with_input();
        let prompt = DecisionPrompt::from_request(&request);
        assert_eq!(prompt.tool_name, "Bash");
        assert_eq!(prompt.cwd, "/work/repo");
        assert!(prompt.input_preview.contains("rm -rf"));

        let text = prompt.render();
        assert!(text.contains("Permission required: Bash"));
        assert!(text.contains(request.id.as_str()));
    }

    #[test]
    fn empty_input_is_not_rendered() {
        let request = PermissionRequest::new(
            "WebSearch",
            "/work",
            Deadline::after(Duration::from_secs(1)),
        );
        let text = DecisionPrompt::from_request(&request).render();
        assert!(!text.contains("input:"));
    }

    #[test]
    fn oversized_input_is_truncated() {
        let mut input = Map::new();
        input.insert("blob".to_string(), Value::String("x".repeat(2000)));
        let request = PermissionRequest::new(
            "Write",
            "/work",
            Deadline::after(Duration::from_secs(1)),
        )
        .with_tool_input(input);
        let prompt = DecisionPrompt::from_request(&request);
        assert!(prompt.input_preview.chars().count() <= INPUT_PREVIEW_CHARS);
    }

    #[test]
    fn address_display() {
        let addr = ChatAddress::new(Platform::Telegram, "42");
        assert_eq!(addr.to_string(), "telegram:42");
        let addr = addr.with_user("7");
        assert_eq!(addr.to_string(), "telegram:42:7");
    }
}
