//! Retry and failure policy for page fetches
//!
//! Classifies each [`FetchError`] as transient or permanent and turns a failed
//! attempt into a [`RetryDecision`]. Transient failures are retried with
//! exponential backoff up to `max_attempts` retries; permanent failures give
//! up immediately regardless of the remaining budget.
//!
//! # Example
//!
//! ```
//! use gallery_dl_core::config::RetryConfig;
//! use gallery_dl_core::error::FetchError;
//! use gallery_dl_core::retry::{RetryDecision, RetryPolicy};
//! use gallery_dl_core::types::PageTask;
//!
//! let policy = RetryPolicy::new(RetryConfig::default());
//! let page = PageTask::new(0, "https://example.com/1.jpg", "/tmp/001.jpg");
//!
//! assert!(matches!(
//!     policy.on_failure(&page, &FetchError::Timeout, 1),
//!     RetryDecision::Retry { .. }
//! ));
//! assert_eq!(
//!     policy.on_failure(&page, &FetchError::NotFound, 1),
//!     RetryDecision::GiveUp
//! );
//! ```

use crate::config::RetryConfig;
use crate::error::FetchError;
use crate::types::PageTask;
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets, 5xx) return `true`.
/// Permanent failures (404, 403, malformed URLs) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout => true,
            FetchError::Connection(_) => true,
            // 5xx and 429 are the only statuses mapped to ServerError
            FetchError::ServerError(_) => true,
            // The engine was killed by the watchdog; a fresh attempt may succeed
            FetchError::EngineUnresponsive => true,
            FetchError::NotFound => false,
            FetchError::Forbidden => false,
            FetchError::MalformedUrl(_) => false,
            FetchError::EngineFailure(_) => false,
            FetchError::Io(_) => false,
            FetchError::Cancelled => false,
        }
    }
}

/// What to do with a failed page
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Fetch the page again after the delay
    Retry {
        /// Backoff before the next attempt
        after: Duration,
    },
    /// Mark the page permanently failed
    GiveUp,
}

/// Per-page retry policy
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from configuration
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Configuration in effect
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Decide what to do after `attempt_count` attempts have been made
    ///
    /// `attempt_count` includes the attempt that just failed, so the first
    /// failure is reported with `attempt_count == 1`.
    pub fn on_failure(
        &self,
        task: &PageTask,
        error: &FetchError,
        attempt_count: u32,
    ) -> RetryDecision {
        if !error.is_retryable() {
            tracing::debug!(
                page = task.index,
                error = %error,
                "Permanent page failure, giving up"
            );
            return RetryDecision::GiveUp;
        }

        let retries_so_far = attempt_count.saturating_sub(1);
        if retries_so_far >= self.config.max_attempts {
            tracing::warn!(
                page = task.index,
                error = %error,
                attempts = attempt_count,
                "Page failed after all retry attempts exhausted"
            );
            return RetryDecision::GiveUp;
        }

        let delay = self.backoff_delay(retries_so_far);
        let after = if self.config.jitter {
            add_jitter(delay)
        } else {
            delay
        };

        tracing::debug!(
            page = task.index,
            error = %error,
            attempt = attempt_count,
            max_attempts = self.config.max_attempts,
            delay_ms = after.as_millis() as u64,
            "Page failed, scheduling retry"
        );

        RetryDecision::Retry { after }
    }

    /// Base delay for the given retry number (0 for the first retry), capped
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = self.config.backoff_multiplier.powi(retry.min(64) as i32);
        let secs = self.config.initial_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.config.max_delay.as_secs_f64() {
            return self.config.max_delay;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(self.config.initial_delay)
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the
/// result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
