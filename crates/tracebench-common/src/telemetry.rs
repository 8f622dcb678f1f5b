//! Log subscriber setup
//!
//! Test binaries and tools call [`init_tracing`] once at startup. Library
//! code only emits `tracing` events and never installs a subscriber itself.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter applied when `RUST_LOG` is unset or invalid
pub const DEFAULT_LOG_FILTER: &str = "info,tracebench=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during subscriber initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber is already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output settings for the log subscriber
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
    /// Filter used when `RUST_LOG` is not set
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json: std::env::var("TRACEBENCH_LOG_JSON").is_ok_and(|v| v == "1" || v == "true"),
            default_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Install the global subscriber with default settings.
///
/// Does nothing if a subscriber is already installed, so it is safe to call
/// from every test.
pub fn init_tracing() {
    let _ = try_init_tracing(TelemetryConfig::default());
}

/// Install the global subscriber, failing if one is already set
pub fn try_init_tracing(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    let (json_layer, text_layer) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true);
        (Some(layer), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer().with_target(true)))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_reports_error_and_init_is_idempotent() {
        init_tracing();
        init_tracing();
        let err = try_init_tracing(TelemetryConfig::default()).unwrap_err();
        assert!(err.to_string().contains("subscriber"));
    }
}
