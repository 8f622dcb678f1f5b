//! Resource tracking and teardown for tracebench test sessions
//!
//! A [`Session`] records what setup code created and, at the end of a run,
//! removes it in five ordered best-effort phases (see [`teardown`]).

#![deny(missing_docs)]

pub mod client;
pub mod kube_client;
pub mod session;
pub mod teardown;
pub mod tracker;
pub mod wait;

pub use client::{ClusterApi, VolumeInfo, VolumePhase};
pub use kube_client::KubeCluster;
pub use session::Session;
pub use teardown::{PhaseOutcome, Teardown, TeardownPhase, TeardownReport};
pub use tracker::{ManagedResource, ResourceTracker};
