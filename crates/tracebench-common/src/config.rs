//! Framework timeouts and limits
//!
//! [`FrameworkConfig`] starts from built-in defaults and can be overridden
//! from a YAML document, from `TRACEBENCH_*` environment variables, or in
//! code with the `with_*` builders. Durations are expressed in whole seconds
//! in both YAML and the environment.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Default timeout for custom resources to disappear after deletion
pub const DEFAULT_CR_DELETION_TIMEOUT: Duration = Duration::from_secs(120);
/// Default interval between custom resource deletion checks
pub const DEFAULT_CR_DELETION_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default timeout for the namespace to disappear after deletion
pub const DEFAULT_NAMESPACE_TIMEOUT: Duration = Duration::from_secs(120);
/// Default interval between namespace deletion checks
pub const DEFAULT_NAMESPACE_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default timeout for readiness waits
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(120);
/// Default interval between readiness checks
pub const DEFAULT_READY_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default cap on concurrent status queries
pub const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 5;

/// Environment variable overriding the custom resource deletion timeout
pub const ENV_CR_DELETION_TIMEOUT: &str = "TRACEBENCH_CR_DELETION_TIMEOUT";
/// Environment variable overriding the custom resource poll interval
pub const ENV_CR_DELETION_POLL_INTERVAL: &str = "TRACEBENCH_CR_DELETION_POLL_INTERVAL";
/// Environment variable overriding the namespace deletion timeout
pub const ENV_NAMESPACE_TIMEOUT: &str = "TRACEBENCH_NAMESPACE_TIMEOUT";
/// Environment variable overriding the namespace poll interval
pub const ENV_NAMESPACE_POLL_INTERVAL: &str = "TRACEBENCH_NAMESPACE_POLL_INTERVAL";
/// Environment variable overriding the readiness timeout
pub const ENV_READY_TIMEOUT: &str = "TRACEBENCH_READY_TIMEOUT";
/// Environment variable overriding the readiness poll interval
pub const ENV_READY_POLL_INTERVAL: &str = "TRACEBENCH_READY_POLL_INTERVAL";
/// Environment variable overriding the concurrent query cap
pub const ENV_MAX_CONCURRENT_QUERIES: &str = "TRACEBENCH_MAX_CONCURRENT_QUERIES";
/// Environment variable overriding the number of delete attempts
pub const ENV_DELETE_RETRY_ATTEMPTS: &str = "TRACEBENCH_DELETE_RETRY_ATTEMPTS";

/// Timeouts, poll intervals and limits used by sessions and teardown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FrameworkConfig {
    /// How long to wait for deleted custom resources to disappear
    #[serde(with = "seconds")]
    pub cr_deletion_timeout: Duration,
    /// Interval between custom resource deletion checks
    #[serde(with = "seconds")]
    pub cr_deletion_poll_interval: Duration,
    /// How long to wait for the namespace to disappear
    #[serde(with = "seconds")]
    pub namespace_timeout: Duration,
    /// Interval between namespace deletion checks
    #[serde(with = "seconds")]
    pub namespace_poll_interval: Duration,
    /// How long to wait for a resource to become ready
    #[serde(with = "seconds")]
    pub ready_timeout: Duration,
    /// Interval between readiness checks
    #[serde(with = "seconds")]
    pub ready_poll_interval: Duration,
    /// Cap on concurrent status queries
    pub max_concurrent_queries: usize,
    /// Attempts per delete or finalizer patch, including the first
    pub delete_retry_attempts: u32,
    /// Delay before the first delete retry
    #[serde(with = "seconds")]
    pub delete_retry_initial_delay: Duration,
    /// Upper bound on the delay between delete retries
    #[serde(with = "seconds")]
    pub delete_retry_max_delay: Duration,
    /// Backoff multiplier for delete retries
    pub delete_retry_multiplier: f64,
    /// Jitter fraction for delete retries
    pub delete_retry_jitter: f64,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            cr_deletion_timeout: DEFAULT_CR_DELETION_TIMEOUT,
            cr_deletion_poll_interval: DEFAULT_CR_DELETION_POLL_INTERVAL,
            namespace_timeout: DEFAULT_NAMESPACE_TIMEOUT,
            namespace_poll_interval: DEFAULT_NAMESPACE_POLL_INTERVAL,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            ready_poll_interval: DEFAULT_READY_POLL_INTERVAL,
            max_concurrent_queries: DEFAULT_MAX_CONCURRENT_QUERIES,
            delete_retry_attempts: retry.max_attempts,
            delete_retry_initial_delay: retry.initial_delay,
            delete_retry_max_delay: retry.max_delay,
            delete_retry_multiplier: retry.backoff_multiplier,
            delete_retry_jitter: retry.jitter,
        }
    }
}

impl FrameworkConfig {
    /// Defaults with overrides from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults with overrides from `lookup`.
    ///
    /// Malformed or zero values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        let durations: [(&str, &mut Duration); 6] = [
            (ENV_CR_DELETION_TIMEOUT, &mut cfg.cr_deletion_timeout),
            (ENV_CR_DELETION_POLL_INTERVAL, &mut cfg.cr_deletion_poll_interval),
            (ENV_NAMESPACE_TIMEOUT, &mut cfg.namespace_timeout),
            (ENV_NAMESPACE_POLL_INTERVAL, &mut cfg.namespace_poll_interval),
            (ENV_READY_TIMEOUT, &mut cfg.ready_timeout),
            (ENV_READY_POLL_INTERVAL, &mut cfg.ready_poll_interval),
        ];
        for (key, slot) in durations {
            if let Some(secs) = parse_positive::<u64>(&lookup, key) {
                *slot = Duration::from_secs(secs);
            }
        }

        if let Some(n) = parse_positive::<usize>(&lookup, ENV_MAX_CONCURRENT_QUERIES) {
            cfg.max_concurrent_queries = n;
        }
        if let Some(n) = parse_positive::<u32>(&lookup, ENV_DELETE_RETRY_ATTEMPTS) {
            cfg.delete_retry_attempts = n;
        }

        cfg
    }

    /// Parse a YAML document; absent fields keep their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid framework config: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that would make waits or retries meaningless
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("cr_deletion_timeout", self.cr_deletion_timeout),
            ("cr_deletion_poll_interval", self.cr_deletion_poll_interval),
            ("namespace_timeout", self.namespace_timeout),
            ("namespace_poll_interval", self.namespace_poll_interval),
            ("ready_timeout", self.ready_timeout),
            ("ready_poll_interval", self.ready_poll_interval),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(Error::config(format!("{} must be greater than zero", name)));
            }
        }

        if self.max_concurrent_queries == 0 {
            return Err(Error::config("max_concurrent_queries must be at least 1"));
        }
        if self.delete_retry_attempts == 0 {
            return Err(Error::config("delete_retry_attempts must be at least 1"));
        }
        if self.delete_retry_multiplier < 1.0 {
            return Err(Error::config("delete_retry_multiplier must be at least 1.0"));
        }
        if !(0.0..=1.0).contains(&self.delete_retry_jitter) {
            return Err(Error::config("delete_retry_jitter must be between 0.0 and 1.0"));
        }
        Ok(())
    }

    /// Copy with a different custom resource deletion timeout
    pub fn with_cr_deletion_timeout(&self, timeout: Duration) -> Self {
        Self {
            cr_deletion_timeout: timeout,
            ..self.clone()
        }
    }

    /// Copy with a different custom resource poll interval
    pub fn with_cr_deletion_poll_interval(&self, interval: Duration) -> Self {
        Self {
            cr_deletion_poll_interval: interval,
            ..self.clone()
        }
    }

    /// Copy with a different namespace deletion timeout
    pub fn with_namespace_timeout(&self, timeout: Duration) -> Self {
        Self {
            namespace_timeout: timeout,
            ..self.clone()
        }
    }

    /// Copy with a different namespace poll interval
    pub fn with_namespace_poll_interval(&self, interval: Duration) -> Self {
        Self {
            namespace_poll_interval: interval,
            ..self.clone()
        }
    }

    /// Copy with a different readiness timeout
    pub fn with_ready_timeout(&self, timeout: Duration) -> Self {
        Self {
            ready_timeout: timeout,
            ..self.clone()
        }
    }

    /// Copy with a different concurrent query cap
    pub fn with_max_concurrent_queries(&self, n: usize) -> Self {
        Self {
            max_concurrent_queries: n,
            ..self.clone()
        }
    }

    /// Copy with a different delete retry schedule
    pub fn with_delete_retry(&self, attempts: u32, initial_delay: Duration) -> Self {
        Self {
            delete_retry_attempts: attempts,
            delete_retry_initial_delay: initial_delay,
            ..self.clone()
        }
    }

    /// Retry policy for deletes and finalizer patches.
    ///
    /// Only errors classified as retryable are retried, so a 403 fails on
    /// the first attempt.
    pub fn delete_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.delete_retry_attempts)
            .with_initial_delay(self.delete_retry_initial_delay)
            .with_max_delay(self.delete_retry_max_delay)
            .with_multiplier(self.delete_retry_multiplier)
            .with_jitter(self.delete_retry_jitter)
            .with_retry_if(Error::is_retryable)
            .with_on_retry(|attempt, err, delay| {
                warn!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying delete");
            })
    }
}

fn parse_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Some(value),
        _ => {
            warn!(key, value = %raw, "ignoring invalid configuration override");
            None
        }
    }
}

/// Serialize a `Duration` as whole seconds
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
