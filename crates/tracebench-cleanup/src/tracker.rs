//! Ledger of resources a session created
//!
//! Setup code records every resource it creates, possibly from many tasks at
//! once. Teardown reads a snapshot copy, so it never holds the lock while
//! talking to the cluster.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracebench_common::ResourceKind;

/// One resource under lifecycle control
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagedResource {
    /// API coordinates
    pub kind: ResourceKind,
    /// Namespace, empty for cluster-scoped resources
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ManagedResource {
    /// A namespaced resource
    pub fn namespaced(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// A cluster-scoped resource
    pub fn cluster_scoped(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::namespaced(kind, "", name)
    }

    /// Whether the resource lives outside any namespace
    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }
}

impl fmt::Display for ManagedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_cluster_scoped() {
            write!(f, "{} {}", self.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    custom: Vec<ManagedResource>,
    cluster_scoped: Vec<ManagedResource>,
}

/// Thread-safe record of created resources.
///
/// Entries are appended whole under the lock, so a snapshot never sees a
/// partially written entry.
#[derive(Debug, Default)]
pub struct ResourceTracker {
    ledger: Mutex<Ledger>,
}

impl ResourceTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Critical sections only append or copy, so a poisoned ledger is still whole
    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a namespaced custom resource
    pub fn track_custom(&self, resource: ManagedResource) {
        self.lock().custom.push(resource);
    }

    /// Record a cluster-scoped resource
    pub fn track_cluster_scoped(&self, resource: ManagedResource) {
        self.lock().cluster_scoped.push(resource);
    }

    /// Copy of the tracked custom resources, in insertion order
    pub fn snapshot_custom(&self) -> Vec<ManagedResource> {
        self.lock().custom.clone()
    }

    /// Copy of the tracked cluster-scoped resources, in insertion order
    pub fn snapshot_cluster_scoped(&self) -> Vec<ManagedResource> {
        self.lock().cluster_scoped.clone()
    }

    /// Total number of tracked entries
    pub fn len(&self) -> usize {
        let ledger = self.lock();
        ledger.custom.len() + ledger.cluster_scoped.len()
    }

    /// Whether nothing has been tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracebench_common::kinds::{CLUSTER_ROLE, OTEL_COLLECTOR, TEMPO_STACK};

    #[test]
    fn snapshots_keep_insertion_order_and_scopes_apart() {
        let tracker = ResourceTracker::new();
        tracker.track_custom(ManagedResource::namespaced(TEMPO_STACK, "perf", "simplest"));
        tracker.track_cluster_scoped(ManagedResource::cluster_scoped(CLUSTER_ROLE, "reader"));
        tracker.track_custom(ManagedResource::namespaced(OTEL_COLLECTOR, "perf", "otel"));

        let custom = tracker.snapshot_custom();
        assert_eq!(custom.len(), 2);
        assert_eq!(custom[0].name, "simplest");
        assert_eq!(custom[1].name, "otel");

        let cluster = tracker.snapshot_cluster_scoped();
        assert_eq!(cluster.len(), 1);
        assert!(cluster[0].is_cluster_scoped());
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let tracker = ResourceTracker::new();
        tracker.track_custom(ManagedResource::namespaced(TEMPO_STACK, "perf", "a"));
        let snapshot = tracker.snapshot_custom();
        tracker.track_custom(ManagedResource::namespaced(TEMPO_STACK, "perf", "b"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(tracker.snapshot_custom().len(), 2);
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let tracker = Arc::new(ResourceTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        tracker.track_custom(ManagedResource::namespaced(
                            TEMPO_STACK,
                            "perf",
                            format!("stack-{}-{}", t, i),
                        ));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.snapshot_custom().len(), 400);
    }

    #[test]
    fn display_includes_namespace_only_when_set() {
        let namespaced = ManagedResource::namespaced(TEMPO_STACK, "perf", "simplest");
        assert_eq!(namespaced.to_string(), "tempostacks.tempo.grafana.com perf/simplest");
        let cluster = ManagedResource::cluster_scoped(CLUSTER_ROLE, "reader");
        assert_eq!(cluster.to_string(), "clusterroles.rbac.authorization.k8s.io reader");
    }
}
