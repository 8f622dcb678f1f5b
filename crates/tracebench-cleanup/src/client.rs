//! Cluster operations the teardown depends on
//!
//! [`ClusterApi`] is the only way teardown talks to the control plane, so
//! tests can substitute a mock or an in-memory cluster.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use tracebench_common::{ResourceKind, Result};

/// Lifecycle phase of a persistent volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumePhase {
    /// Not yet available for binding
    Pending,
    /// Free and not bound to a claim
    Available,
    /// Bound to a claim
    Bound,
    /// Claim deleted, volume not yet reclaimed
    Released,
    /// Automatic reclamation failed
    Failed,
    /// Phase not reported or not recognised
    Unknown(String),
}

impl VolumePhase {
    /// Parse the `status.phase` string reported by the API server
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Pending,
            Some("Available") => Self::Available,
            Some("Bound") => Self::Bound,
            Some("Released") => Self::Released,
            Some("Failed") => Self::Failed,
            Some(other) => Self::Unknown(other.to_string()),
            None => Self::Unknown(String::new()),
        }
    }

    /// Whether no claim is using the volume, so deleting it loses no live data
    pub fn is_reclaimable(&self) -> bool {
        matches!(self, Self::Available | Self::Released)
    }
}

/// Identity and state of a persistent volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    /// Volume name
    pub name: String,
    /// Current lifecycle phase
    pub phase: VolumePhase,
    /// Namespace of the claim the volume is or was bound to
    pub claim_namespace: Option<String>,
}

/// Control-plane operations used by sessions and teardown.
///
/// An empty `namespace` addresses a cluster-scoped resource.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Delete a resource. Succeeds if the resource is already gone.
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()>;

    /// Names of resources of `kind` matching `label_selector`
    async fn list_names(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>>;

    /// Whether the resource currently exists
    async fn exists(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<bool>;

    /// Remove every finalizer from a resource.
    ///
    /// Returns `false` when the resource is gone or had no finalizers.
    async fn clear_finalizers(&self, kind: ResourceKind, namespace: &str, name: &str)
        -> Result<bool>;

    /// Persistent volumes matching `label_selector`; an empty selector lists all
    async fn list_volumes(&self, label_selector: &str) -> Result<Vec<VolumeInfo>>;
}
