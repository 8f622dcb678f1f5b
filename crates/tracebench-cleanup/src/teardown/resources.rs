//! Custom resource, cluster-scoped resource and namespace phases

use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::Mutex;

use tracing::{debug, info, warn};

use tracebench_common::concurrent::{for_each, map_with_limit};
use tracebench_common::error::aggregate;
use tracebench_common::kinds::{
    cluster_scoped_kinds, label_selector, managed_custom_kinds, NAMESPACE,
};
use tracebench_common::poll::poll_until;
use tracebench_common::retry::retry_with_data;
use tracebench_common::{Error, ResourceKind, Result};

use super::{bump, into_inner, lock, Teardown};
use crate::tracker::ManagedResource;
use crate::wait::wait_for_absent;

/// Drop repeated entries, keeping first-seen order
fn dedup(resources: &[ManagedResource]) -> Vec<ManagedResource> {
    let mut seen = HashSet::new();
    resources
        .iter()
        .filter(|r| seen.insert(*r))
        .cloned()
        .collect()
}

fn combine(first: Result<()>, second: Result<()>) -> Result<()> {
    aggregate(first.err().into_iter().chain(second.err()).collect())
}

impl Teardown {
    pub(super) async fn delete_custom_resources(
        &self,
        tracked: &[ManagedResource],
    ) -> (Vec<ManagedResource>, Result<()>) {
        let (targets, discovery) = if tracked.is_empty() {
            info!("no tracked custom resources, using label-based cleanup");
            self.discover_by_label(managed_custom_kinds(), &self.namespace)
                .await
        } else {
            info!(count = tracked.len(), "deleting tracked custom resources");
            (dedup(tracked), Ok(()))
        };

        let (deleted, result) = self
            .delete_all(targets, &self.counters.custom_deleted)
            .await;
        (deleted, combine(discovery, result))
    }

    pub(super) async fn await_custom_resource_deletion(
        &self,
        pending: Vec<ManagedResource>,
    ) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let timeout = self.config.cr_deletion_timeout;
        info!(count = pending.len(), timeout = ?timeout, "waiting for custom resources to be deleted");

        let pending = Mutex::new(pending);
        let outcome = poll_until(
            &self.cancel,
            timeout,
            self.config.cr_deletion_poll_interval,
            false,
            "custom resource deletion",
            || self.prune_deleted(&pending),
        )
        .await;

        match outcome {
            Ok(()) => {
                info!("all custom resources deleted");
                Ok(())
            }
            Err(e) if e.is_timeout() => {
                let remaining = into_inner(pending);
                warn!(
                    remaining = remaining.len(),
                    "timeout waiting for custom resource deletion, removing finalizers"
                );

                let stripped = self.strip_finalizers(&remaining).await;
                let names: Vec<String> = remaining.iter().map(ToString::to_string).collect();
                let timed_out = Error::timeout(
                    format!("custom resource deletion (remaining: {})", names.join(", ")),
                    timeout,
                );
                aggregate(std::iter::once(timed_out).chain(stripped.err()).collect())
            }
            Err(e) => Err(e),
        }
    }

    pub(super) async fn delete_cluster_scoped_resources(
        &self,
        tracked: &[ManagedResource],
    ) -> Result<()> {
        let (targets, discovery) = if tracked.is_empty() {
            info!("no tracked cluster-scoped resources, using label-based cleanup");
            self.discover_by_label(cluster_scoped_kinds(), "").await
        } else {
            info!(count = tracked.len(), "deleting tracked cluster-scoped resources");
            (dedup(tracked), Ok(()))
        };

        let (_, result) = self
            .delete_all(targets, &self.counters.cluster_scoped_deleted)
            .await;
        combine(discovery, result)
    }

    pub(super) async fn delete_namespace(&self) -> Result<()> {
        let namespace = ManagedResource::cluster_scoped(NAMESPACE, self.namespace.clone());
        self.delete_with_retry(&namespace).await?;

        info!(timeout = ?self.config.namespace_timeout, "namespace deletion requested");
        wait_for_absent(
            self.cluster.as_ref(),
            &self.cancel,
            &namespace,
            self.config.namespace_timeout,
            self.config.namespace_poll_interval,
        )
        .await
    }

    /// Delete every target concurrently, returning the ones that succeeded
    async fn delete_all(
        &self,
        targets: Vec<ManagedResource>,
        counter: &AtomicUsize,
    ) -> (Vec<ManagedResource>, Result<()>) {
        let deleted = Mutex::new(Vec::with_capacity(targets.len()));

        let result = for_each(targets, |resource| {
            let deleted = &deleted;
            async move {
                debug!(resource = %resource, "deleting");
                if let Err(e) = self.delete_with_retry(&resource).await {
                    warn!(resource = %resource, error = %e, "failed to delete");
                    return Err(e);
                }
                bump(counter);
                lock(deleted).push(resource);
                Ok(())
            }
        })
        .await;

        (into_inner(deleted), result)
    }

    /// List labelled resources of every kind in `namespace`.
    ///
    /// Kinds the API server does not serve are skipped.
    async fn discover_by_label(
        &self,
        kinds: &[ResourceKind],
        namespace: &str,
    ) -> (Vec<ManagedResource>, Result<()>) {
        let selector = label_selector(&self.namespace);
        let found = Mutex::new(Vec::new());

        let result = for_each(kinds.iter().copied(), |kind| {
            let found = &found;
            let selector = &selector;
            async move {
                match self.cluster.list_names(kind, namespace, selector).await {
                    Ok(names) => {
                        debug!(kind = %kind, count = names.len(), "found labelled resources");
                        lock(found).extend(
                            names
                                .into_iter()
                                .map(|name| ManagedResource::namespaced(kind, namespace, name)),
                        );
                        Ok(())
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(kind = %kind, "kind not served, skipping");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(kind = %kind, error = %e, "failed to list labelled resources");
                        Err(e)
                    }
                }
            }
        })
        .await;

        (into_inner(found), result)
    }

    /// One poll round: drop resources that are gone, report whether none remain
    async fn prune_deleted(&self, pending: &Mutex<Vec<ManagedResource>>) -> Result<bool> {
        let current = lock(pending).clone();

        let present = map_with_limit(
            &self.cancel,
            current.clone(),
            self.config.max_concurrent_queries,
            |_, resource| async move {
                match self
                    .cluster
                    .exists(resource.kind, &resource.namespace, &resource.name)
                    .await
                {
                    Ok(present) => Ok(present),
                    Err(e) if e.is_not_found() => Ok(false),
                    Err(e) => {
                        warn!(resource = %resource, error = %e, "error checking deletion status");
                        Ok(true)
                    }
                }
            },
        )
        .await
        .into_result()?;

        let still_pending: Vec<ManagedResource> = current
            .into_iter()
            .zip(present)
            .filter_map(|(resource, present)| {
                if !present {
                    debug!(resource = %resource, "deleted");
                }
                present.then_some(resource)
            })
            .collect();

        let done = still_pending.is_empty();
        if !done {
            debug!(remaining = still_pending.len(), "waiting for custom resources to be deleted");
        }
        *lock(pending) = still_pending;
        Ok(done)
    }

    /// Remove finalizers from resources that outlived the deletion timeout
    async fn strip_finalizers(&self, remaining: &[ManagedResource]) -> Result<()> {
        for_each(remaining.iter().cloned(), |resource| async move {
            let operation = format!("clear finalizers on {}", resource);
            let stripped = retry_with_data(&self.cancel, &self.delete_policy, &operation, || async {
                match self
                    .cluster
                    .clear_finalizers(resource.kind, &resource.namespace, &resource.name)
                    .await
                {
                    Err(e) if e.is_not_found() => Ok(false),
                    other => other,
                }
            })
            .await
            .inspect_err(|e| warn!(resource = %resource, error = %e, "failed to remove finalizers"))?;

            if stripped {
                info!(resource = %resource, "removed finalizers from stuck resource");
                bump(&self.counters.finalizers_stripped);
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracebench_common::kinds::TEMPO_STACK;

    #[test]
    fn dedup_keeps_first_occurrence_order() {
        let a = ManagedResource::namespaced(TEMPO_STACK, "perf", "a");
        let b = ManagedResource::namespaced(TEMPO_STACK, "perf", "b");
        let deduped = dedup(&[a.clone(), b.clone(), a.clone()]);
        assert_eq!(deduped, vec![a, b]);
    }

    #[test]
    fn combine_keeps_both_failures() {
        let err = combine(Err(Error::internal("list")), Err(Error::internal("delete"))).unwrap_err();
        assert_eq!(err.failure_count(), 2);
        assert!(combine(Ok(()), Ok(())).is_ok());
    }
}
