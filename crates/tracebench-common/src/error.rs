//! Error types for tracebench operations
//!
//! Errors are a small closed set of tagged variants. Orchestration code
//! inspects the tag (not-found, timeout, cancelled, permanent, retryable),
//! never the message, to decide whether to retry, escalate or give up.
//!
//! Best-effort operations never stop at the first failure. They gather every
//! failure and fold them into a single [`Error::Multiple`] with
//! [`Error::join`] or [`aggregate`].

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for tracebench operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The addressed resource does not exist
    #[error("{}", describe_not_found(.kind, .namespace, .name))]
    NotFound {
        /// Resource kind (e.g. "tempostacks.tempo.grafana.com")
        kind: String,
        /// Namespace, empty for cluster-scoped resources
        namespace: String,
        /// Resource name
        name: String,
    },

    /// An internal deadline elapsed before the awaited condition held
    #[error("timeout after {elapsed:?} waiting for {operation}")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// How long was spent waiting
        elapsed: Duration,
    },

    /// An external stop request aborted the operation
    #[error("{operation} cancelled")]
    Cancelled {
        /// What was interrupted
        operation: String,
    },

    /// Marks an error that must not be retried, regardless of remaining attempts
    #[error("{source}")]
    Permanent {
        /// The wrapped failure
        source: Box<Error>,
    },

    /// Marks an error as transient; retrying is expected to help
    #[error("{source}")]
    Retryable {
        /// The wrapped failure
        source: Box<Error>,
    },

    /// Every retry attempt failed
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Operation name used for logging
        operation: String,
        /// Number of attempts made
        attempts: u32,
        /// Error returned by the final attempt
        source: Box<Error>,
    },

    /// Failure recorded while running one teardown phase
    #[error("{phase} phase: {source}")]
    Phase {
        /// Human-readable phase name
        phase: String,
        /// Aggregated phase failure
        source: Box<Error>,
    },

    /// Several independent failures combined into one
    #[error("{}", join_messages(.errors))]
    Multiple {
        /// Every failure, in the order it was collected
        errors: Vec<Error>,
    },

    /// Invalid configuration or arguments
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "delete", "poll")
        context: String,
    },
}

fn describe_not_found(kind: &str, namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        format!("{} {} not found", kind, name)
    } else {
        format!("{} {}/{} not found", kind, namespace, name)
    }
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a not-found error for a namespaced or cluster-scoped resource
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Wrap an error so the retry engine stops immediately
    pub fn permanent(err: Error) -> Self {
        Self::Permanent {
            source: Box::new(err),
        }
    }

    /// Wrap an error to state that retrying is expected to help
    pub fn retryable(err: Error) -> Self {
        Self::Retryable {
            source: Box::new(err),
        }
    }

    /// Attach a teardown phase name to an error
    pub fn phase(phase: impl Into<String>, err: Error) -> Self {
        Self::Phase {
            phase: phase.into(),
            source: Box::new(err),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Combine a list of errors.
    ///
    /// Returns `None` for an empty list, the error itself for a single entry,
    /// and [`Error::Multiple`] otherwise.
    pub fn join(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple { errors }),
        }
    }

    /// Flatten nested aggregates and phase wrappers into individual failures
    pub fn leaves(&self) -> Vec<&Error> {
        match self {
            Error::Multiple { errors } => errors.iter().flat_map(Error::leaves).collect(),
            Error::Phase { source, .. } => source.leaves(),
            other => vec![other],
        }
    }

    /// Number of individual failures carried by this error
    pub fn failure_count(&self) -> usize {
        self.leaves().len()
    }

    /// Strip `Retryable`/`Permanent` markers to reach the underlying failure
    pub fn root(&self) -> &Error {
        match self {
            Error::Retryable { source } | Error::Permanent { source } => source.root(),
            other => other,
        }
    }

    /// Whether the resource the error refers to is absent
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }

    /// Whether this is an internal deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Error::Timeout { .. })
    }

    /// Whether this is an external stop request
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled { .. })
    }

    /// Whether this error, or any error it wraps, is marked as non-retryable
    ///
    /// Looks through [`Error::Retryable`] and [`Error::Phase`] wrappers and
    /// into every member of [`Error::Multiple`].
    pub fn is_permanent(&self) -> bool {
        match self {
            Error::Permanent { .. } => true,
            Error::Retryable { source } | Error::Phase { source, .. } => source.is_permanent(),
            Error::Multiple { errors } => errors.iter().any(Error::is_permanent),
            _ => false,
        }
    }

    /// Check if this error is retryable
    ///
    /// Configuration and permanent errors are not. Kubernetes 4xx responses
    /// are not, except request timeouts (408) and throttling (429).
    /// Cancellation is never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    !(400..500).contains(&ae.code) || ae.code == 408 || ae.code == 429
                }
                _ => true,
            },
            Error::NotFound { .. } => false,
            Error::Timeout { .. } => true,
            Error::Cancelled { .. } => false,
            Error::Permanent { .. } => false,
            Error::Retryable { source } => !source.is_permanent(),
            Error::RetriesExhausted { .. } => false,
            Error::Phase { source, .. } => source.is_retryable(),
            Error::Multiple { errors } => errors.iter().all(Error::is_retryable),
            Error::Config { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Fold a list of collected failures into a single result
pub fn aggregate(errors: Vec<Error>) -> Result<(), Error> {
    match Error::join(errors) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
