//! Retry utilities with exponential backoff and jitter.
//!
//! Wraps any async operation that may fail transiently. The delay starts at
//! [`RetryPolicy::initial_delay`], grows by [`RetryPolicy::backoff_multiplier`]
//! after every retryable failure and is capped at [`RetryPolicy::max_delay`].
//! The slept delay is perturbed by up to `±jitter × delay` so that many
//! operations failing together do not retry in lockstep.
//!
//! Retrying stops when:
//! - the operation succeeds,
//! - it fails with an error marked [`Error::Permanent`] anywhere in its
//!   chain (an outermost marker is stripped from the returned error),
//! - the policy's retry predicate rejects the error (returned as-is),
//! - the attempts are used up ([`Error::RetriesExhausted`]),
//! - the cancellation token fires during an attempt or a backoff sleep
//!   ([`Error::Cancelled`]).
//!
//! # Example
//!
//! ```ignore
//! use tracebench_common::retry::{retry_with_data, RetryPolicy};
//!
//! let policy = RetryPolicy::default().with_max_attempts(5);
//! let list = retry_with_data(&cancel, &policy, "list_volumes", || async {
//!     cluster.list_volumes(&selector).await
//! })
//! .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Default number of attempts, including the first one
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the first retry
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);
/// Default upper bound on the delay between retries
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
/// Default backoff multiplier
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
/// Default jitter, as a fraction of the delay
pub const DEFAULT_JITTER: f64 = 0.1;

/// Decides whether a failed attempt should be retried
pub type RetryPredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Observes each retry: `(attempt, error, delay_chosen)`
pub type RetryObserver = Arc<dyn Fn(u32, &Error, Duration) + Send + Sync>;

/// Retry configuration.
///
/// Built once with the `with_*` methods and then shared freely; it holds no
/// mutable state, so one policy can drive many concurrent retries.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first (values below 1 act as 1)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Random perturbation of each delay, as a fraction in `0.0..=1.0`
    pub jitter: f64,
    retry_if: Option<RetryPredicate>,
    on_retry: Option<RetryObserver>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_MULTIPLIER,
            jitter: DEFAULT_JITTER,
            retry_if: None,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("retry_if", &self.retry_if.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay before the first retry
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the upper bound on the delay between retries
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the jitter fraction (clamped to `0.0..=1.0`)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Only retry errors for which `predicate` returns true.
    ///
    /// Replaces the default rule of retrying every non-permanent error.
    pub fn with_retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    /// Call `observer` before every backoff sleep
    pub fn with_on_retry<O>(mut self, observer: O) -> Self
    where
        O: Fn(u32, &Error, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn should_retry(&self, err: &Error) -> bool {
        match &self.retry_if {
            Some(predicate) => predicate(err),
            None => true,
        }
    }

    /// Exponential step, capped at `max_delay`
    fn next_delay(&self, delay: Duration) -> Duration {
        let next = delay.as_secs_f64() * self.backoff_multiplier;
        saturating_secs(next.min(self.max_delay.as_secs_f64()))
    }

    /// Uniform perturbation in `[delay - jitter*delay, delay + jitter*delay]`
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let offset = rand::thread_rng().gen_range(-1.0..=1.0) * self.jitter;
        saturating_secs(delay.as_secs_f64() * (1.0 + offset))
    }
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Execute an async operation with retries, discarding its output.
pub async fn retry<F, Fut>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    retry_with_data(cancel, policy, operation_name, operation).await
}

/// Execute an async operation with exponential backoff and jitter.
///
/// # Arguments
/// * `cancel` - Aborts the current attempt or backoff sleep when triggered
/// * `policy` - Retry configuration
/// * `operation_name` - Name for logging and error reporting
/// * `operation` - The async operation to retry
///
/// # Returns
/// The value of the first successful attempt, or the error that ended the
/// retry loop.
pub async fn retry_with_data<T, F, Fut>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.attempts();
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        if cancel.is_cancelled() {
            return Err(Error::cancelled(operation_name));
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(operation_name)),
            outcome = operation() => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_permanent() => {
                debug!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    "Operation failed permanently"
                );
                return Err(match e {
                    Error::Permanent { source } => *source,
                    other => other,
                });
            }
            Err(e) => e,
        };

        if !policy.should_retry(&err) {
            debug!(
                operation = %operation_name,
                attempt = attempt,
                error = %err,
                "Error rejected by retry predicate"
            );
            return Err(err);
        }

        if attempt >= max_attempts {
            warn!(
                operation = %operation_name,
                attempt = attempt,
                error = %err,
                "Operation failed after max retries"
            );
            return Err(Error::RetriesExhausted {
                operation: operation_name.to_string(),
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let wait = policy.jittered(delay);
        if let Some(observer) = &policy.on_retry {
            observer(attempt, &err, wait);
        }

        debug!(
            operation = %operation_name,
            attempt = attempt,
            error = %err,
            delay_ms = wait.as_millis() as u64,
            "Operation failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(operation_name)),
            _ = tokio::time::sleep(wait) => {}
        }

        delay = policy.next_delay(delay);
    }
}
