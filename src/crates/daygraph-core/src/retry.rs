//! Retry policy and the per-node retry coordinator
//!
//! Transient trouble (rate limits, 5xx, timeouts) deserves another attempt;
//! permanent trouble (auth, validation) does not. [`RetryPolicy`] configures
//! how many attempts a node gets and how long to wait between them, and
//! [`run_with_retry`] drives the attempts, consulting each failure's
//! [`FailureKind`](crate::error::FailureKind) before scheduling another try.
//!
//! # Backoff
//!
//! Delay before retry `n` (1-based failed attempt) is
//! `initial_interval * backoff_factor^(n-1)`, capped at `max_interval`, then
//! multiplied by a random jitter factor in `0.5..=1.5` when jitter is on.
//! With the defaults (initial 0.5s, factor 2.0):
//!
//! - after attempt 1: ~0.5s
//! - after attempt 2: ~1.0s
//! - after attempt 3: ~2.0s
//!
//! Jitter spreads simultaneous retries so sibling branches hitting the same
//! rate-limited backend do not stampede it in lockstep.
//!
//! # Rollback contract
//!
//! The coordinator returns only the final successful attempt's value; deltas
//! proposed by failed attempts are never seen by the caller. Anything an
//! attempt did *outside* its return value (an API call already sent, a ledger
//! record already appended) is not rolled back. Node authors must keep such
//! side effects safe to repeat.
//!
//! # Examples
//!
//! ```rust
//! use daygraph_core::error::NodeFailure;
//! use daygraph_core::retry::{run_with_retry, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::new(3).with_initial_interval(0.001).with_jitter(false);
//! let result = run_with_retry(&policy, |attempt| async move {
//!     if attempt < 3 {
//!         Err(NodeFailure::transient("flaky", "backend hiccup"))
//!     } else {
//!         Ok(attempt)
//!     }
//! })
//! .await;
//! assert_eq!(result.unwrap(), 3);
//! # });
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::NodeFailure;

/// Configuration for retrying failed node invocations.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. At least one attempt
    /// always runs.
    pub max_attempts: usize,
    /// Base delay before the first retry, in seconds.
    pub initial_interval: f64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_factor: f64,
    /// Upper bound on the delay, in seconds.
    pub max_interval: f64,
    /// Whether to randomize each delay by a factor in `0.5..=1.5`.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Policy with `max_attempts` and the standard backoff curve.
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            jitter: true,
        }
    }

    /// Policy that never retries.
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Set the base delay before the first retry.
    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    /// Set the backoff multiplier.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the delay ceiling.
    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to sleep after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        if attempt == 0 || attempt >= self.max_attempts {
            return Duration::ZERO;
        }

        let exponent = (attempt - 1).min(i32::MAX as usize) as i32;
        let base = self.initial_interval * self.backoff_factor.powi(exponent);
        let capped = base.min(self.max_interval).max(0.0);

        let seconds = if self.jitter {
            capped * rand::thread_rng().gen_range(0.5..=1.5)
        } else {
            capped
        };

        Duration::from_secs_f64(seconds)
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn allows_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Drive `make_attempt` under `policy` until it succeeds or retries run out.
///
/// `make_attempt` receives the 1-based attempt number and produces one
/// invocation. The first attempt always runs. A failure is retried only while
/// its kind is retryable and the policy allows more attempts; a
/// [`Permanent`](crate::error::FailureKind::Permanent) failure returns
/// immediately.
pub async fn run_with_retry<T, F, Fut>(policy: &RetryPolicy, mut make_attempt: F) -> Result<T, NodeFailure>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, NodeFailure>>,
{
    let mut attempt = 1;
    loop {
        match make_attempt(attempt).await {
            Ok(value) => return Ok(value),
            Err(failure) => {
                if !failure.is_retryable() || !policy.allows_retry(attempt) {
                    return Err(failure);
                }

                let delay = policy.delay_after(attempt);
                warn!(
                    node = %failure.node,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %failure.message,
                    "node attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
