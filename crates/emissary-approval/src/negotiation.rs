//! Permission negotiation: one request end-to-end.
//!
//! The [`Negotiator`] owns the full lifecycle described in the crate docs.
//! One instance serves one operator address; `negotiate` may be called from
//! any number of concurrent tasks, and the user lock serializes the ones
//! that actually need the operator.
//!
//! Timing discipline: every wait below — lock acquisition, decision
//! polling, reason polling — is carved out of the request deadline's
//! remaining budget. Nothing is ever added on top of it, which is what
//! keeps the whole negotiation inside the externally imposed ceiling.

use std::sync::Arc;
use std::time::Instant;

use emissary_core::{
    ChatAddress, ChatProvider, Deadline, DecisionPrompt, DecisionSignal, PermissionRequest,
    PromptHandle, ReasonSignal,
};
use emissary_store::KvStore;
use tracing::{debug, warn};

use crate::cascade::{CascadeState, CascadeStore};
use crate::config::RelayConfig;
use crate::error::{NegotiationError, NegotiationResult};
use crate::lock::{LockKey, UserLock};
use crate::normalize::{mask_secrets, normalize_reason};
use crate::outcome::{NegotiationOutcome, ReasonSource};
use crate::reject_log::{RejectLog, RejectLogEntry};
use crate::session::SessionAllowList;
use crate::state::{NegotiationEvent, NegotiationState};

/// Orchestrates permission negotiations for one operator address.
pub struct Negotiator {
    provider: Arc<dyn ChatProvider>,
    address: ChatAddress,
    config: RelayConfig,
    lock: UserLock,
    cascade: CascadeStore,
    sessions: SessionAllowList,
    log: RejectLog,
}

impl Negotiator {
    /// Create a negotiator talking to `address` through `provider`, with
    /// shared state (cascade markers, session allow-lists) in `store`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        address: ChatAddress,
        store: Arc<dyn KvStore>,
        config: RelayConfig,
    ) -> Self {
        let lock = UserLock::new(&config.lock_dir, config.poll_interval());
        let cascade = CascadeStore::new(Arc::clone(&store), config.cascade_window());
        let sessions = SessionAllowList::new(store, config.session_ttl());
        let log = RejectLog::new(
            &config.log_path,
            config.log_rotate_bytes,
            config.log_max_files,
        );
        Self {
            provider,
            address,
            config,
            lock,
            cascade,
            sessions,
            log,
        }
    }

    /// Negotiate one permission request to a terminal decision.
    ///
    /// Resolves by `request.deadline` or fails with a non-decision.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::LockTimeout`] and [`NegotiationError::Expired`]
    /// are sealed non-decisions; the entry point must not read them as
    /// approval or denial. [`NegotiationError::Provider`] means the
    /// decision prompt could not even be sent.
    pub async fn negotiate(
        &self,
        request: &PermissionRequest,
    ) -> NegotiationResult<NegotiationOutcome> {
        // Tools already approved for this session resolve without the lock
        // or a prompt. A cache miss of any kind falls through to prompting.
        if self
            .sessions
            .is_allowed(&request.session_id, &request.tool_name)
        {
            debug!(
                "tool {} pre-approved for session {}",
                request.tool_name, request.session_id
            );
            return Ok(NegotiationOutcome::Approve);
        }

        let key = LockKey::from_address(&self.address);
        let mut guard = self.lock.acquire(&key, request.deadline.remaining()).await?;
        let result = self.negotiate_locked(request, &key).await;
        // Release last: the log append and cascade write above happen
        // before the next waiter can enter its critical section. The guard
        // also releases on drop, covering every early-exit path.
        guard.release();
        result
    }

    async fn negotiate_locked(
        &self,
        request: &PermissionRequest,
        key: &LockKey,
    ) -> NegotiationResult<NegotiationOutcome> {
        // A rejection moments ago for this operator answers the request
        // without re-prompting.
        if let Some(cascade) = self.cascade.read(key) {
            debug!(
                "cascade hit for {key}: auto-rejecting {} after rejection of {}",
                request.id, cascade.request_id
            );
            return Ok(self.finish_rejection(
                request,
                cascade.reason,
                cascade.reason_source,
                None,
            ));
        }

        if request.deadline.is_elapsed() {
            return Err(NegotiationError::Expired {
                request_id: request.id.clone(),
            });
        }

        let state = NegotiationState::WaitingDecision;
        let prompt = DecisionPrompt::from_request(request);
        let handle = self.provider.send_decision_prompt(&prompt).await?;

        match self.await_decision(&handle, &request.deadline).await {
            DecisionSignal::Approve => {
                state.apply(NegotiationEvent::OperatorApproved)?;
                self.cascade.clear(key);
                self.provider.mark_resolved(&handle, "approved").await;
                Ok(NegotiationOutcome::Approve)
            }
            DecisionSignal::ApproveSession => {
                state.apply(NegotiationEvent::OperatorApprovedSession)?;
                self.sessions
                    .record_allowed(&request.session_id, &request.tool_name);
                self.cascade.clear(key);
                self.provider
                    .mark_resolved(&handle, "approved for session")
                    .await;
                Ok(NegotiationOutcome::ApproveSession)
            }
            DecisionSignal::Reject => {
                let reason_state = state.apply(NegotiationEvent::OperatorRejected)?;
                let (reason, source, event) =
                    self.collect_reason(&handle, &request.deadline).await;
                reason_state.apply(event)?;
                let outcome = self.finish_rejection(request, reason, source, Some(key));
                self.provider.mark_resolved(&handle, "rejected").await;
                Ok(outcome)
            }
            DecisionSignal::Pending => {
                state.apply(NegotiationEvent::DeadlineElapsed)?;
                // Best-effort annotation so a late button press gets an
                // "already expired" explanation instead of silence.
                self.provider.mark_expired(&handle).await;
                Err(NegotiationError::Expired {
                    request_id: request.id.clone(),
                })
            }
        }
    }

    /// Poll for a decision until one arrives or the deadline passes.
    ///
    /// Provider errors count as "no signal this tick" and are retried
    /// within the remaining budget.
    async fn await_decision(&self, handle: &PromptHandle, deadline: &Deadline) -> DecisionSignal {
        loop {
            if deadline.is_elapsed() {
                return DecisionSignal::Pending;
            }
            let slice = deadline.clamp(self.config.poll_interval());
            let tick = Instant::now();
            match self.provider.poll_decision(handle, slice).await {
                Ok(DecisionSignal::Pending) => {}
                Ok(signal) => return signal,
                Err(e) => debug!("decision poll failed, retrying within budget: {e}"),
            }
            pace(tick, slice).await;
        }
    }

    /// Run the reason sub-dialog after a rejection.
    ///
    /// The wait is bounded by `min(configured reason timeout, remaining
    /// request budget)`. Every exit is a terminal rejection variant; this
    /// never escalates to a non-decision.
    async fn collect_reason(
        &self,
        handle: &PromptHandle,
        deadline: &Deadline,
    ) -> (String, ReasonSource, NegotiationEvent) {
        let budget = self.config.reason_timeout().min(deadline.remaining());
        let reason_deadline = Deadline::after(budget);

        let reason_handle = match self.provider.send_reason_prompt(handle).await {
            Ok(handle) => handle,
            Err(e) => {
                // Fail toward a terminal decision, not toward hanging.
                warn!("reason prompt could not be sent, treating as explicit skip: {e}");
                return (
                    String::new(),
                    ReasonSource::ExplicitSkip,
                    NegotiationEvent::ReasonSkipped,
                );
            }
        };

        loop {
            if reason_deadline.is_elapsed() {
                return (
                    String::new(),
                    ReasonSource::Timeout,
                    NegotiationEvent::ReasonTimedOut,
                );
            }
            let slice = reason_deadline.clamp(self.config.poll_interval());
            let tick = Instant::now();
            match self.provider.poll_reason(&reason_handle, slice).await {
                Ok(ReasonSignal::Text(text)) => {
                    let (reason, source) = normalize_reason(
                        &text,
                        &self.config.skip_keywords,
                        self.config.reason_max_chars,
                    );
                    let event = if source == ReasonSource::UserInput {
                        NegotiationEvent::ReasonProvided
                    } else {
                        NegotiationEvent::ReasonSkipped
                    };
                    return (reason, source, event);
                }
                Ok(ReasonSignal::ExplicitSkip) => {
                    return (
                        String::new(),
                        ReasonSource::ExplicitSkip,
                        NegotiationEvent::ReasonSkipped,
                    );
                }
                Ok(ReasonSignal::Pending) => {}
                Err(e) => debug!("reason poll failed, retrying within budget: {e}"),
            }
            pace(tick, slice).await;
        }
    }

    /// Seal a rejection: log it, optionally arm the cascade window, build
    /// the outcome.
    ///
    /// The log append happens before the cascade write so the next waiter
    /// on this key observes both or neither. An append failure is a
    /// diagnostic only; the cascade write and the returned decision
    /// proceed regardless.
    fn finish_rejection(
        &self,
        request: &PermissionRequest,
        reason: String,
        source: ReasonSource,
        arm_cascade: Option<&LockKey>,
    ) -> NegotiationOutcome {
        let entry = RejectLogEntry::new(
            self.address.platform,
            request,
            mask_secrets(&reason),
            source,
        );
        if let Err(e) = self.log.append(&entry) {
            warn!("rejection log append failed (decision unchanged): {e}");
        }

        if let Some(key) = arm_cascade {
            let state = CascadeState::new(
                request.id.clone(),
                request.tool_name.as_str(),
                reason.as_str(),
                source,
            );
            self.cascade.write(key, &state);
        }

        NegotiationOutcome::Reject {
            reason,
            reason_source: source,
        }
    }
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator")
            .field("address", &self.address)
            .field("cascade", &self.cascade)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

/// Keep the polling cadence fixed even when a provider poll returns
/// immediately: sleep out the rest of the slice.
async fn pace(tick: Instant, slice: std::time::Duration) {
    let elapsed = tick.elapsed();
    if elapsed < slice {
        tokio::time::sleep(slice.saturating_sub(elapsed)).await;
    }
}

#[cfg(test)]
#[path = "negotiation_tests.rs"]
mod tests;
