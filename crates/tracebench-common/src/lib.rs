//! Common building blocks for tracebench: errors, concurrency, retry and polling

#![deny(missing_docs)]

pub mod concurrent;
pub mod config;
pub mod error;
pub mod kinds;
pub mod poll;
pub mod retry;
pub mod telemetry;

pub use config::FrameworkConfig;
pub use error::Error;
pub use kinds::ResourceKind;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label key marking resources created by the framework
pub const LABEL_MANAGED_BY: &str = "tempo-perf-test.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on framework resources
pub const LABEL_MANAGED_BY_VALUE: &str = "framework";

/// Label key carrying the owning session's namespace
pub const LABEL_INSTANCE: &str = "tempo-perf-test.io/instance";
