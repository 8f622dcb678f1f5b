//! Readiness and deletion waits built on the condition poller

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tracebench_common::poll::poll_until;
use tracebench_common::Result;

use crate::client::ClusterApi;
use crate::tracker::ManagedResource;

/// Wait until `resource` exists.
///
/// A not-found probe counts as "not yet"; any other probe error ends the
/// wait.
pub async fn wait_for_present(
    cluster: &dyn ClusterApi,
    cancel: &CancellationToken,
    resource: &ManagedResource,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    let operation = format!("{} to exist", resource);
    poll_until(cancel, timeout, interval, true, &operation, || async {
        match cluster
            .exists(resource.kind, &resource.namespace, &resource.name)
            .await
        {
            Ok(present) => Ok(present),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    })
    .await
}

/// Wait until `resource` no longer exists
pub async fn wait_for_absent(
    cluster: &dyn ClusterApi,
    cancel: &CancellationToken,
    resource: &ManagedResource,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    let operation = format!("{} to be deleted", resource);
    poll_until(cancel, timeout, interval, true, &operation, || async {
        match cluster
            .exists(resource.kind, &resource.namespace, &resource.name)
            .await
        {
            Ok(present) => Ok(!present),
            Err(e) if e.is_not_found() => Ok(true),
            Err(e) => Err(e),
        }
    })
    .await
}
