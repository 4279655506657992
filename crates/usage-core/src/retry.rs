//! Exponential backoff for failed refreshes.
//!
//! Provides:
//! - [`RetryPolicy`]: which errors are retried and how long to wait
//!   (2^n seconds for attempt n, capped at three attempts per chain)
//! - [`RetryScheduler`]: the retry counter plus at most one pending,
//!   cancellable deferred retry
//!
//! A scheduled retry does not call back into the controller. When its delay
//! elapses it sends a [`RetryFired`] message carrying the generation it was
//! scheduled under; the owner checks [`RetryScheduler::accept`] before acting.

use crate::cancel::Generation;
use crate::error::FetchError;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Backoff configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum automatic retries per failure chain.
    pub max_retries: u32,
    /// Delay unit; attempt n waits `base_delay * 2^n`.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub const MAX_RETRIES: u32 = 3;
    pub const BASE_DELAY: Duration = Duration::from_secs(1);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (1-indexed): 2s, 4s, 8s.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Self::MAX_RETRIES,
            base_delay: Self::BASE_DELAY,
        }
    }
}

/// Message sent when a scheduled retry's delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryFired {
    pub generation: u64,
}

/// Outcome of [`RetryScheduler::maybe_schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Terminal error for this chain; surfaced without retry.
    NotRetryable,
    /// Cap reached; counter reset and the chain ends.
    Exhausted,
    Scheduled { attempt: u32, delay: Duration },
}

/// Retry counter and pending deferred retry.
pub struct RetryScheduler {
    policy: RetryPolicy,
    count: u32,
    generation: Generation,
    pending: Option<JoinHandle<()>>,
    fired_tx: mpsc::Sender<RetryFired>,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy, fired_tx: mpsc::Sender<RetryFired>) -> Self {
        Self {
            policy,
            count: 0,
            generation: Generation::new(),
            pending: None,
            fired_tx,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Decide whether to retry after `error`, scheduling the deferred retry if so.
    pub fn maybe_schedule(&mut self, error: &FetchError) -> RetryDecision {
        if !error.is_retryable() {
            debug!("{} is not retryable", error.kind());
            return RetryDecision::NotRetryable;
        }

        if self.count >= self.policy.max_retries {
            warn!(
                "All {} retry attempts exhausted. Last error: {}",
                self.policy.max_retries, error
            );
            self.count = 0;
            return RetryDecision::Exhausted;
        }

        self.cancel();
        self.count += 1;
        let attempt = self.count;
        let delay = self.policy.calculate_delay(attempt);
        let generation = self.generation.current();
        let tx = self.fired_tx.clone();

        info!(
            "Retry {}/{} after {}: waiting {:?}",
            attempt, self.policy.max_retries, error, delay
        );

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The owner may be gone during shutdown.
            let _ = tx.send(RetryFired { generation }).await;
        }));

        RetryDecision::Scheduled { attempt, delay }
    }

    /// Accept a fired retry if it belongs to the current generation.
    ///
    /// Returns false for retries cancelled after they were scheduled,
    /// including ones whose message was already queued.
    pub fn accept(&mut self, fired: RetryFired) -> bool {
        if !self.generation.is_current(fired.generation) || self.pending.is_none() {
            debug!("Dropping stale retry (generation {})", fired.generation);
            return false;
        }
        self.pending = None;
        true
    }

    /// Cancel the pending retry, keeping the counter.
    pub fn cancel(&mut self) {
        self.generation.bump();
        if let Some(handle) = self.pending.take() {
            handle.abort();
            debug!("Cancelled pending retry");
        }
    }

    /// Cancel the pending retry and start a fresh chain.
    pub fn reset(&mut self) {
        self.cancel();
        self.count = 0;
    }
}

impl Drop for RetryScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}
