//! Teardown phases and their fixed order

use std::fmt;

/// One step of session teardown.
///
/// Phases always run in [`TeardownPhase::ALL`] order. A failed phase is
/// recorded and the next one still runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TeardownPhase {
    /// Delete tracked custom resources, or labelled ones if none were tracked
    DeleteCustomResources,
    /// Wait for deleted custom resources to disappear, stripping finalizers on timeout
    AwaitCustomResourceDeletion,
    /// Delete cluster-scoped resources such as cluster roles and bindings
    DeleteClusterScopedResources,
    /// Delete the session namespace and wait for it to disappear
    DeleteNamespace,
    /// Delete unbound persistent volumes left behind by the session
    ReclaimOrphanedVolumes,
}

impl TeardownPhase {
    /// Every phase, in execution order
    pub const ALL: [TeardownPhase; 5] = [
        TeardownPhase::DeleteCustomResources,
        TeardownPhase::AwaitCustomResourceDeletion,
        TeardownPhase::DeleteClusterScopedResources,
        TeardownPhase::DeleteNamespace,
        TeardownPhase::ReclaimOrphanedVolumes,
    ];

    /// Stable name used in logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            TeardownPhase::DeleteCustomResources => "DeleteCustomResources",
            TeardownPhase::AwaitCustomResourceDeletion => "AwaitCustomResourceDeletion",
            TeardownPhase::DeleteClusterScopedResources => "DeleteClusterScopedResources",
            TeardownPhase::DeleteNamespace => "DeleteNamespace",
            TeardownPhase::ReclaimOrphanedVolumes => "ReclaimOrphanedVolumes",
        }
    }

    /// The phase that runs after this one
    pub fn next(&self) -> Option<TeardownPhase> {
        let index = Self::ALL.iter().position(|p| p == self)?;
        Self::ALL.get(index + 1).copied()
    }
}

impl fmt::Display for TeardownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
