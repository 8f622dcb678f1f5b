//! Multi-phase session teardown
//!
//! [`Teardown::run`] walks every [`TeardownPhase`] in order:
//!
//! 1. Delete custom resources (tracked ones, or labelled ones as a fallback)
//! 2. Wait for them to disappear; on timeout strip their finalizers once and
//!    move on without re-polling
//! 3. Delete cluster-scoped resources (same fallback rule)
//! 4. Delete the namespace and wait for it to disappear
//! 5. Reclaim unbound persistent volumes left behind by the session
//!
//! Every phase is best-effort. Its errors are recorded in the
//! [`TeardownReport`] and the next phase runs regardless. Deletes and
//! finalizer patches go through the retry engine; "not found" always counts
//! as success.

mod phase;
mod report;
mod resources;
mod volumes;

pub use phase::TeardownPhase;
pub use report::{PhaseOutcome, TeardownReport};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use tracebench_common::retry::{retry, RetryPolicy};
use tracebench_common::{Error, FrameworkConfig, Result};

use crate::client::ClusterApi;
use crate::tracker::ManagedResource;

#[derive(Debug, Default)]
struct Counters {
    custom_deleted: AtomicUsize,
    cluster_scoped_deleted: AtomicUsize,
    finalizers_stripped: AtomicUsize,
    volumes_reclaimed: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn into_inner<T>(mutex: Mutex<T>) -> T {
    mutex.into_inner().unwrap_or_else(PoisonError::into_inner)
}

/// Teardown of one session's resources
pub struct Teardown {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    config: FrameworkConfig,
    cancel: CancellationToken,
    delete_policy: RetryPolicy,
    counters: Counters,
}

impl Teardown {
    /// Prepare a teardown of `namespace`; nothing runs until [`Teardown::run`]
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        namespace: impl Into<String>,
        config: FrameworkConfig,
        cancel: CancellationToken,
    ) -> Self {
        let delete_policy = config.delete_retry_policy();
        Self {
            cluster,
            namespace: namespace.into(),
            config,
            cancel,
            delete_policy,
            counters: Counters::default(),
        }
    }

    /// Run every phase against the given ledger snapshots
    pub async fn run(
        &self,
        custom: Vec<ManagedResource>,
        cluster_scoped: Vec<ManagedResource>,
    ) -> TeardownReport {
        info!(namespace = %self.namespace, "starting teardown");
        let mut report = TeardownReport::new(&self.namespace);
        let mut awaiting = Vec::new();

        for phase in TeardownPhase::ALL {
            let span = info_span!("teardown", namespace = %self.namespace, phase = %phase);
            let start = Instant::now();

            let result = if self.cancel.is_cancelled() {
                Err(Error::cancelled(format!("{} phase", phase)))
            } else {
                match phase {
                    TeardownPhase::DeleteCustomResources => {
                        let (deleted, result) =
                            self.delete_custom_resources(&custom).instrument(span).await;
                        awaiting = deleted;
                        result
                    }
                    TeardownPhase::AwaitCustomResourceDeletion => {
                        self.await_custom_resource_deletion(std::mem::take(&mut awaiting))
                            .instrument(span)
                            .await
                    }
                    TeardownPhase::DeleteClusterScopedResources => {
                        self.delete_cluster_scoped_resources(&cluster_scoped)
                            .instrument(span)
                            .await
                    }
                    TeardownPhase::DeleteNamespace => {
                        self.delete_namespace().instrument(span).await
                    }
                    TeardownPhase::ReclaimOrphanedVolumes => {
                        self.reclaim_orphaned_volumes().instrument(span).await
                    }
                }
            };

            match &result {
                Ok(()) => info!(namespace = %self.namespace, phase = %phase, "phase complete"),
                Err(e) => warn!(
                    namespace = %self.namespace,
                    phase = %phase,
                    error = %e,
                    "phase failed, continuing teardown"
                ),
            }
            report.record(phase, result.err(), start.elapsed());
        }

        report.custom_resources_deleted = self.counters.custom_deleted.load(Ordering::Relaxed);
        report.cluster_scoped_deleted = self.counters.cluster_scoped_deleted.load(Ordering::Relaxed);
        report.finalizers_stripped = self.counters.finalizers_stripped.load(Ordering::Relaxed);
        report.volumes_reclaimed = self.counters.volumes_reclaimed.load(Ordering::Relaxed);

        info!(
            namespace = %self.namespace,
            failed_phases = report.failed_phases().len(),
            "teardown finished"
        );
        report
    }

    /// Delete one resource, retrying transient failures
    async fn delete_with_retry(&self, resource: &ManagedResource) -> Result<()> {
        let operation = format!("delete {}", resource);
        retry(&self.cancel, &self.delete_policy, &operation, || async {
            match self
                .cluster
                .delete(resource.kind, &resource.namespace, &resource.name)
                .await
            {
                Err(e) if e.is_not_found() => Ok(()),
                other => other,
            }
        })
        .await
    }
}
