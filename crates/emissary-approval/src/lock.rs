//! Per-operator mutual exclusion.
//!
//! Negotiations for the same operator are totally ordered: at most one is
//! waiting on a prompt for a given [`LockKey`] at a time. Negotiations for
//! different keys never wait on each other.

use std::time::{Duration, Instant};

use emissary_core::{ChatAddress, Platform};
use emissary_store::{FileMutex, FileMutexGuard, sanitize_key};
use tracing::{debug, warn};

use crate::error::{NegotiationError, NegotiationResult};

/// Identifies the operator whose decisions must be serialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    platform: Platform,
    chat_id: String,
    user_id: Option<String>,
}

impl LockKey {
    /// Build the key for an operator address.
    #[must_use]
    pub fn from_address(address: &ChatAddress) -> Self {
        Self {
            platform: address.platform,
            chat_id: address.chat_id.clone(),
            user_id: address.user_id.clone(),
        }
    }

    /// Filesystem-safe stem used for the lock token and cascade entry.
    #[must_use]
    pub fn token_stem(&self) -> String {
        match &self.user_id {
            Some(user) => format!(
                "{}-{}-{}",
                self.platform,
                sanitize_key(&self.chat_id),
                sanitize_key(user)
            ),
            None => format!("{}-{}", self.platform, sanitize_key(&self.chat_id)),
        }
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.token_stem())
    }
}

/// Exclusive per-operator lock backed by filesystem tokens.
///
/// `acquire` polls with a fixed interval rather than blocking, so the wait
/// is observable and strictly bounded by the caller's budget. A token left
/// behind by a crashed holder is detected by age (older than the caller's
/// own wait budget) and force-cleared once per acquisition attempt.
#[derive(Debug, Clone)]
pub struct UserLock {
    mutex: FileMutex,
    poll_interval: Duration,
}

impl UserLock {
    /// Create a lock registry storing tokens under `dir`.
    pub fn new(dir: impl Into<std::path::PathBuf>, poll_interval: Duration) -> Self {
        Self {
            mutex: FileMutex::new(dir),
            poll_interval,
        }
    }

    /// Acquire the lock for `key`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::LockTimeout`] when the holder does not
    /// release in time — a sealed non-decision, not an approval or denial —
    /// and [`NegotiationError::Storage`] if the token directory is broken.
    pub async fn acquire(
        &self,
        key: &LockKey,
        timeout: Duration,
    ) -> NegotiationResult<UserLockGuard> {
        let stem = key.token_stem();
        let started = Instant::now();

        // A token already older than this caller's entire wait budget
        // predates the negotiation by more than it is willing to wait:
        // presume its holder crashed and clear it once, up front. A live
        // holder's token is never re-judged mid-wait.
        if !timeout.is_zero()
            && self
                .mutex
                .holder_age(&stem)
                .is_some_and(|age| age > timeout)
        {
            warn!("force-clearing stale user lock token {stem}");
            self.mutex.force_clear(&stem);
        }

        loop {
            match self.mutex.try_acquire(&stem) {
                Ok(Some(inner)) => {
                    debug!("acquired user lock {stem}");
                    return Ok(UserLockGuard { inner });
                }
                Ok(None) => {}
                Err(e) => return Err(NegotiationError::Storage(e.to_string())),
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(NegotiationError::LockTimeout {
                    key: stem,
                    waited_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                });
            }
            let nap = self.poll_interval.min(timeout.saturating_sub(elapsed));
            tokio::time::sleep(nap).await;
        }
    }
}

/// Held user lock. Released explicitly or on drop, whichever comes first.
#[derive(Debug)]
pub struct UserLockGuard {
    inner: FileMutexGuard,
}

impl UserLockGuard {
    /// Release the lock. Idempotent; failures are swallowed.
    pub fn release(&mut self) {
        self.inner.release();
    }
}
