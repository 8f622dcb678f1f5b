//! Orphaned persistent volume reclamation

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tracebench_common::concurrent::{for_each, Collector};
use tracebench_common::error::aggregate;
use tracebench_common::kinds::{instance_selector, PERSISTENT_VOLUME};
use tracebench_common::{Error, Result};

use super::{bump, Teardown};
use crate::client::{ClusterApi, VolumeInfo};
use crate::tracker::ManagedResource;

/// Which query produced a volume list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Volumes carrying the session instance label
    Labelled,
    /// Every volume, to be matched on claim namespace
    All,
}

async fn list_pass(
    cluster: Arc<dyn ClusterApi>,
    cancel: CancellationToken,
    pass: Pass,
    selector: String,
) -> Result<(Pass, Vec<VolumeInfo>)> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled("list persistent volumes")),
        listed = cluster.list_volumes(&selector) => {
            listed
                .map(|volumes| (pass, volumes))
                .inspect_err(|e| warn!(pass = ?pass, error = %e, "failed to list persistent volumes"))
        }
    }
}

/// Volumes from both passes that belong to `namespace`, each name once.
///
/// Labelled volumes come first; the full listing only contributes volumes
/// whose claim was in `namespace`.
fn select_candidates(
    namespace: &str,
    labelled: Vec<VolumeInfo>,
    all: Vec<VolumeInfo>,
) -> Vec<VolumeInfo> {
    let mut seen = HashSet::new();
    let claimed = all
        .into_iter()
        .filter(|v| v.claim_namespace.as_deref() == Some(namespace));

    labelled
        .into_iter()
        .chain(claimed)
        .filter(|v| seen.insert(v.name.clone()))
        .collect()
}

impl Teardown {
    pub(super) async fn reclaim_orphaned_volumes(&self) -> Result<()> {
        let mut collector = Collector::new();
        collector.go(list_pass(
            self.cluster.clone(),
            self.cancel.clone(),
            Pass::Labelled,
            instance_selector(&self.namespace),
        ));
        collector.go(list_pass(
            self.cluster.clone(),
            self.cancel.clone(),
            Pass::All,
            String::new(),
        ));
        let collected = collector.wait().await;

        let mut labelled = Vec::new();
        let mut all = Vec::new();
        for (pass, volumes) in collected.results {
            match pass {
                Pass::Labelled => labelled = volumes,
                Pass::All => all = volumes,
            }
        }

        let (reclaimable, in_use): (Vec<_>, Vec<_>) =
            select_candidates(&self.namespace, labelled, all)
                .into_iter()
                .partition(|v| v.phase.is_reclaimable());
        for volume in &in_use {
            debug!(volume = %volume.name, phase = ?volume.phase, "skipping volume that is not released or available");
        }

        let deleted = for_each(reclaimable, |volume| async move {
            let resource = ManagedResource::cluster_scoped(PERSISTENT_VOLUME, volume.name);
            self.delete_with_retry(&resource)
                .await
                .inspect_err(|e| warn!(volume = %resource.name, error = %e, "failed to delete orphaned volume"))?;
            debug!(volume = %resource.name, "deleted orphaned volume");
            bump(&self.counters.volumes_reclaimed);
            Ok(())
        })
        .await;

        let reclaimed = self
            .counters
            .volumes_reclaimed
            .load(std::sync::atomic::Ordering::Relaxed);
        if reclaimed > 0 {
            info!(count = reclaimed, "deleted orphaned persistent volumes");
        }

        aggregate(collected.error.into_iter().chain(deleted.err()).collect())
    }
}
