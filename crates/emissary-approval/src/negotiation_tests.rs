//! End-to-end negotiation tests with scripted chat providers.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use emissary_core::{
    ChatAddress, ChatProvider, Deadline, DecisionPrompt, DecisionSignal, PermissionRequest,
    Platform, PromptHandle, ProviderError, ReasonSignal, RequestId, SessionId,
};
use emissary_store::{FileKvStore, KvStore};

use crate::config::RelayConfig;
use crate::error::NegotiationError;
use crate::negotiation::Negotiator;
use crate::outcome::{NegotiationOutcome, ReasonSource};

/// Scripted chat platform: answers every decision prompt the same way
/// after a fixed delay, per-prompt, the way a human would.
struct ScriptedProvider {
    decision: DecisionSignal,
    decision_delay: Duration,
    reason: ReasonSignal,
    reason_delay: Duration,
    fail_decision_send: bool,
    fail_reason_send: bool,
    counter: AtomicUsize,
    sent_at: Mutex<HashMap<String, Instant>>,
    decision_prompts: Mutex<Vec<Instant>>,
    reason_prompts: AtomicUsize,
    expired_marks: AtomicUsize,
    resolved: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(decision: DecisionSignal) -> Self {
        Self {
            decision,
            decision_delay: Duration::ZERO,
            reason: ReasonSignal::Pending,
            reason_delay: Duration::ZERO,
            fail_decision_send: false,
            fail_reason_send: false,
            counter: AtomicUsize::new(0),
            sent_at: Mutex::new(HashMap::new()),
            decision_prompts: Mutex::new(Vec::new()),
            reason_prompts: AtomicUsize::new(0),
            expired_marks: AtomicUsize::new(0),
            resolved: Mutex::new(Vec::new()),
        }
    }

    fn with_decision_delay(mut self, delay: Duration) -> Self {
        self.decision_delay = delay;
        self
    }

    fn with_reason(mut self, reason: ReasonSignal) -> Self {
        self.reason = reason;
        self
    }

    fn failing_decision_send(mut self) -> Self {
        self.fail_decision_send = true;
        self
    }

    fn failing_reason_send(mut self) -> Self {
        self.fail_reason_send = true;
        self
    }

    fn prompts_sent(&self) -> usize {
        self.decision_prompts.lock().unwrap().len()
    }

    fn prompt_times(&self) -> Vec<Instant> {
        self.decision_prompts.lock().unwrap().clone()
    }

    fn reason_prompts_sent(&self) -> usize {
        self.reason_prompts.load(Ordering::SeqCst)
    }

    fn times_marked_expired(&self) -> usize {
        self.expired_marks.load(Ordering::SeqCst)
    }

    fn resolved_summaries(&self) -> Vec<String> {
        self.resolved.lock().unwrap().clone()
    }

    fn next_handle(&self, prefix: &str, request_id: &RequestId) -> PromptHandle {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let message_id = format!("{prefix}-{n}");
        self.sent_at
            .lock()
            .unwrap()
            .insert(message_id.clone(), Instant::now());
        PromptHandle::new(message_id, request_id.clone())
    }

    /// Sleep within `slice` until the scripted response for `handle` is
    /// due. Returns whether it is due now.
    async fn response_due(&self, handle: &PromptHandle, delay: Duration, slice: Duration) -> bool {
        let sent = self
            .sent_at
            .lock()
            .unwrap()
            .get(&handle.message_id)
            .copied();
        let Some(sent) = sent else {
            tokio::time::sleep(slice).await;
            return false;
        };
        let due_in = delay.saturating_sub(sent.elapsed());
        if due_in.is_zero() {
            return true;
        }
        if due_in >= slice {
            tokio::time::sleep(slice).await;
            return false;
        }
        tokio::time::sleep(due_in).await;
        true
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn send_decision_prompt(
        &self,
        prompt: &DecisionPrompt,
    ) -> Result<PromptHandle, ProviderError> {
        if self.fail_decision_send {
            return Err(ProviderError::Send("scripted send failure".to_string()));
        }
        let handle = self.next_handle("msg", &prompt.request_id);
        self.decision_prompts.lock().unwrap().push(Instant::now());
        Ok(handle)
    }

    async fn poll_decision(
        &self,
        handle: &PromptHandle,
        slice: Duration,
    ) -> Result<DecisionSignal, ProviderError> {
        if self.response_due(handle, self.decision_delay, slice).await
            && self.decision != DecisionSignal::Pending
        {
            return Ok(self.decision);
        }
        Ok(DecisionSignal::Pending)
    }

    async fn send_reason_prompt(
        &self,
        handle: &PromptHandle,
    ) -> Result<PromptHandle, ProviderError> {
        if self.fail_reason_send {
            return Err(ProviderError::Send("scripted send failure".to_string()));
        }
        self.reason_prompts.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_handle("reason", &handle.request_id))
    }

    async fn poll_reason(
        &self,
        handle: &PromptHandle,
        slice: Duration,
    ) -> Result<ReasonSignal, ProviderError> {
        if self.response_due(handle, self.reason_delay, slice).await
            && self.reason != ReasonSignal::Pending
        {
            return Ok(self.reason.clone());
        }
        Ok(ReasonSignal::Pending)
    }

    async fn mark_expired(&self, _handle: &PromptHandle) {
        self.expired_marks.fetch_add(1, Ordering::SeqCst);
    }

    async fn mark_resolved(&self, _handle: &PromptHandle, summary: &str) {
        self.resolved.lock().unwrap().push(summary.to_string());
    }
}

fn test_config(dir: &Path) -> RelayConfig {
    RelayConfig {
        poll_interval_ms: 10,
        cascade_window_ms: 2000,
        log_path: dir.join("reject.log"),
        lock_dir: dir.join("locks"),
        state_dir: dir.join("state"),
        ..RelayConfig::default()
    }
}

fn negotiator(
    provider: Arc<ScriptedProvider>,
    config: &RelayConfig,
) -> Negotiator {
    let store: Arc<dyn KvStore> = Arc::new(FileKvStore::new(&config.state_dir));
    Negotiator::new(
        provider,
        ChatAddress::new(Platform::Telegram, "42"),
        store,
        config.clone(),
    )
}

fn request(tool: &str, session: &str, budget: Duration) -> PermissionRequest {
    PermissionRequest::new(tool, "/work/repo", Deadline::after(budget))
        .with_session_id(SessionId::new(session))
}

// ---------------------------------------------------------------------------
// Decision outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn operator_approval_resolves_the_request() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(DecisionSignal::Approve));
    let config = test_config(dir.path());
    let negotiator = negotiator(Arc::clone(&provider), &config);

    let outcome = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(2)))
        .await
        .unwrap();

    assert_eq!(outcome, NegotiationOutcome::Approve);
    assert_eq!(provider.prompts_sent(), 1);
    assert_eq!(provider.resolved_summaries(), vec!["approved".to_string()]);
    // Nothing rejected, nothing logged.
    assert!(crate::reject_log::RejectLog::new(&config.log_path, 1024, 1)
        .read_entries()
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn session_approval_caches_the_tool() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(DecisionSignal::ApproveSession));
    let config = test_config(dir.path());
    let negotiator = negotiator(Arc::clone(&provider), &config);

    let first = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(first, NegotiationOutcome::ApproveSession);
    assert_eq!(provider.prompts_sent(), 1);

    // Same (session, tool): approved without a prompt.
    let second = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(second, NegotiationOutcome::Approve);
    assert_eq!(provider.prompts_sent(), 1);

    // A different tool in the same session still prompts.
    let third = negotiator
        .negotiate(&request("Write", "s1", Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(third, NegotiationOutcome::ApproveSession);
    assert_eq!(provider.prompts_sent(), 2);
}

#[tokio::test]
async fn rejection_collects_reason_and_logs() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new(DecisionSignal::Reject)
            .with_reason(ReasonSignal::Text("touches prod".to_string())),
    );
    let config = test_config(dir.path());
    let negotiator = negotiator(Arc::clone(&provider), &config);

    let outcome = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(2)))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        NegotiationOutcome::Reject {
            reason: "touches prod".to_string(),
            reason_source: ReasonSource::UserInput,
        }
    );
    assert_eq!(provider.reason_prompts_sent(), 1);
    assert_eq!(provider.resolved_summaries(), vec!["rejected".to_string()]);

    let entries = crate::reject_log::RejectLog::new(&config.log_path, 1024 * 1024, 1)
        .read_entries()
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].tool_name, "Bash");
    assert_eq!(entries[0].reason, "touches prod");
    assert_eq!(entries[0].reason_source, ReasonSource::UserInput);
}

// ---------------------------------------------------------------------------
// Cascade window
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cascade_auto_rejects_within_window() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new(DecisionSignal::Reject)
            .with_reason(ReasonSignal::Text("not now".to_string())),
    );
    let config = test_config(dir.path());
    let negotiator = negotiator(Arc::clone(&provider), &config);

    let first = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(2)))
        .await
        .unwrap();
    assert!(!first.is_approved());
    assert_eq!(provider.prompts_sent(), 1);

    // A retry moments later reproduces the rejection without any prompt.
    let second = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(
        second,
        NegotiationOutcome::Reject {
            reason: "not now".to_string(),
            reason_source: ReasonSource::UserInput,
        }
    );
    assert_eq!(provider.prompts_sent(), 1);
    assert_eq!(provider.reason_prompts_sent(), 1);

    // Every rejection gets its own log line, cascade hits included.
    let entries = crate::reject_log::RejectLog::new(&config.log_path, 1024 * 1024, 1)
        .read_entries()
        .unwrap();
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn cascade_expires_after_its_window() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new(DecisionSignal::Reject)
            .with_reason(ReasonSignal::ExplicitSkip),
    );
    let mut config = test_config(dir.path());
    config.cascade_window_ms = 50;
    let negotiator = negotiator(Arc::clone(&provider), &config);

    negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(provider.prompts_sent(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Window over: the operator is prompted again.
    negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(provider.prompts_sent(), 2);
}

// ---------------------------------------------------------------------------
// Reason sub-dialog
// ---------------------------------------------------------------------------

#[tokio::test]
async fn skip_keyword_classifies_as_explicit_skip() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new(DecisionSignal::Reject)
            .with_reason(ReasonSignal::Text("  SKIP ".to_string())),
    );
    let config = test_config(dir.path());
    let negotiator = negotiator(Arc::clone(&provider), &config);

    let outcome = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(2)))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        NegotiationOutcome::Reject {
            reason: String::new(),
            reason_source: ReasonSource::ExplicitSkip,
        }
    );
}

#[tokio::test]
async fn explicit_skip_affordance_is_honored() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new(DecisionSignal::Reject).with_reason(ReasonSignal::ExplicitSkip),
    );
    let config = test_config(dir.path());
    let negotiator = negotiator(Arc::clone(&provider), &config);

    let outcome = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        NegotiationOutcome::Reject {
            reason: String::new(),
            reason_source: ReasonSource::ExplicitSkip,
        }
    );
}

#[tokio::test]
async fn reason_timeout_is_bounded_by_the_parent_deadline() {
    let dir = tempfile::tempdir().unwrap();
    // Operator rejects at ~100ms and then goes silent.
    let provider = Arc::new(
        ScriptedProvider::new(DecisionSignal::Reject)
            .with_decision_delay(Duration::from_millis(100)),
    );
    let mut config = test_config(dir.path());
    // Configured reason timeout (1s) exceeds what the deadline leaves
    // (~500ms); the remaining budget must win.
    config.reason_timeout_ms = 1000;
    let negotiator = negotiator(Arc::clone(&provider), &config);

    let started = Instant::now();
    let outcome = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_millis(600)))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(
        outcome,
        NegotiationOutcome::Reject {
            reason: String::new(),
            reason_source: ReasonSource::Timeout,
        }
    );
    // Bounded by the 600ms deadline, not by the 1s reason timeout.
    assert!(elapsed < Duration::from_millis(900), "took {elapsed:?}");
    assert!(elapsed >= Duration::from_millis(450), "took {elapsed:?}");
}

#[tokio::test]
async fn reason_prompt_send_failure_folds_to_explicit_skip() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(DecisionSignal::Reject).failing_reason_send());
    let config = test_config(dir.path());
    let negotiator = negotiator(Arc::clone(&provider), &config);

    let started = Instant::now();
    let outcome = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(5)))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        NegotiationOutcome::Reject {
            reason: String::new(),
            reason_source: ReasonSource::ExplicitSkip,
        }
    );
    // Terminal immediately: no reason wait happened.
    assert!(started.elapsed() < Duration::from_secs(1));
}

// ---------------------------------------------------------------------------
// Non-decisions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn silent_operator_expires_the_request() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(DecisionSignal::Pending));
    let config = test_config(dir.path());
    let negotiator = negotiator(Arc::clone(&provider), &config);

    let started = Instant::now();
    let err = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_millis(150)))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, NegotiationError::Expired { .. }));
    assert!(err.is_non_decision());
    assert_eq!(provider.times_marked_expired(), 1);
    // The whole negotiation stayed inside the deadline (plus scheduling
    // slack).
    assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");

    // Expiry is not a rejection: nothing logged, no cascade armed.
    assert!(
        crate::reject_log::RejectLog::new(&config.log_path, 1024, 1)
            .read_entries()
            .unwrap()
            .is_empty()
    );
    let retry_provider_prompts_before = provider.prompts_sent();
    let _ = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_millis(100)))
        .await;
    assert_eq!(provider.prompts_sent(), retry_provider_prompts_before.saturating_add(1));
}

#[tokio::test]
async fn decision_prompt_send_failure_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(ScriptedProvider::new(DecisionSignal::Approve).failing_decision_send());
    let config = test_config(dir.path());
    let negotiator = negotiator(Arc::clone(&provider), &config);

    let err = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::Provider(_)));
    assert!(!err.is_non_decision());
}

// ---------------------------------------------------------------------------
// Lock ordering
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn lock_serializes_negotiations_for_one_operator() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new(DecisionSignal::Approve)
            .with_decision_delay(Duration::from_millis(200)),
    );
    let config = test_config(dir.path());
    let negotiator = Arc::new(negotiator(Arc::clone(&provider), &config));

    let first = {
        let negotiator = Arc::clone(&negotiator);
        tokio::spawn(async move {
            negotiator
                .negotiate(&request("Bash", "s1", Duration::from_secs(3)))
                .await
        })
    };
    // Start the second negotiation ~100ms into the first.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = {
        let negotiator = Arc::clone(&negotiator);
        tokio::spawn(async move {
            negotiator
                .negotiate(&request("Write", "s2", Duration::from_secs(3)))
                .await
        })
    };

    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());

    // The second prompt went out only after the first negotiation released
    // its lock (operator answered at ~200ms).
    let times = provider.prompt_times();
    assert_eq!(times.len(), 2);
    let gap = times[1].duration_since(times[0]);
    assert!(gap >= Duration::from_millis(150), "gap was {gap:?}");
}

#[tokio::test(flavor = "multi_thread")]
async fn lock_timeout_is_a_sealed_non_decision() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new(DecisionSignal::Approve)
            .with_decision_delay(Duration::from_millis(300)),
    );
    let config = test_config(dir.path());
    let negotiator = Arc::new(negotiator(Arc::clone(&provider), &config));

    let holder = {
        let negotiator = Arc::clone(&negotiator);
        tokio::spawn(async move {
            negotiator
                .negotiate(&request("Bash", "s1", Duration::from_secs(3)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Not enough budget to outwait the holder.
    let err = negotiator
        .negotiate(&request("Write", "s2", Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, NegotiationError::LockTimeout { .. }));
    assert!(err.is_non_decision());

    assert!(holder.await.unwrap().is_ok());
    // The starved negotiation never prompted.
    assert_eq!(provider.prompts_sent(), 1);
}

// ---------------------------------------------------------------------------
// Log behavior on the rejection path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn secrets_are_masked_in_the_log_but_not_the_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let secret_reason = "token=abcdef1234567890abcdef1234567890";
    let provider = Arc::new(
        ScriptedProvider::new(DecisionSignal::Reject)
            .with_reason(ReasonSignal::Text(secret_reason.to_string())),
    );
    let config = test_config(dir.path());
    let negotiator = negotiator(Arc::clone(&provider), &config);

    let outcome = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(2)))
        .await
        .unwrap();

    // The agent is told the operator's words verbatim.
    assert_eq!(outcome.rejection_reason(), Some(secret_reason));

    // The persisted line is masked.
    let entries = crate::reject_log::RejectLog::new(&config.log_path, 1024 * 1024, 1)
        .read_entries()
        .unwrap();
    assert_eq!(entries[0].reason, "token=abcd***7890");
}

#[tokio::test]
async fn log_failure_never_changes_the_decision() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        ScriptedProvider::new(DecisionSignal::Reject)
            .with_reason(ReasonSignal::Text("bad idea".to_string())),
    );
    let mut config = test_config(dir.path());
    // Point the log at a directory so every append fails.
    config.log_path = dir.path().to_path_buf();
    let negotiator = negotiator(Arc::clone(&provider), &config);

    let outcome = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(2)))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        NegotiationOutcome::Reject {
            reason: "bad idea".to_string(),
            reason_source: ReasonSource::UserInput,
        }
    );

    // The cascade was still armed despite the failed append.
    let second = negotiator
        .negotiate(&request("Bash", "s1", Duration::from_secs(2)))
        .await
        .unwrap();
    assert!(!second.is_approved());
    assert_eq!(provider.prompts_sent(), 1);
}
