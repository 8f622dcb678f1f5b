//! Test session owning a namespace and everything created for it
//!
//! Setup code creates resources through its own clients, labels them with
//! [`Session::managed_labels`] and records them with the `track_*` methods.
//! At the end of the run [`Session::cleanup`] removes all of it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tracebench_common::kinds;
use tracebench_common::{Error, FrameworkConfig, ResourceKind, Result};

use crate::client::ClusterApi;
use crate::teardown::{Teardown, TeardownReport};
use crate::tracker::{ManagedResource, ResourceTracker};
use crate::wait::{wait_for_absent, wait_for_present};

/// Kubernetes limit on namespace name length
const MAX_NAMESPACE_LEN: usize = 63;

/// Validate a namespace name as an RFC 1123 label.
///
/// Rules:
/// - Must not be empty or longer than 63 characters
/// - May contain lowercase letters, digits, and hyphens
/// - Must start and end with a letter or digit
pub fn validate_namespace(namespace: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(Error::config("namespace cannot be empty"));
    }
    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(Error::config(format!(
            "namespace must be at most {} characters: {}",
            MAX_NAMESPACE_LEN, namespace
        )));
    }
    if !namespace
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::config(format!(
            "namespace must be lowercase alphanumeric with hyphens: {}",
            namespace
        )));
    }
    if namespace.starts_with('-') || namespace.ends_with('-') {
        return Err(Error::config(format!(
            "namespace must start and end with an alphanumeric character: {}",
            namespace
        )));
    }
    Ok(())
}

/// One test session's namespace, ledger and teardown entry point
pub struct Session {
    namespace: String,
    cluster: Arc<dyn ClusterApi>,
    config: FrameworkConfig,
    tracker: ResourceTracker,
    cancel: CancellationToken,
}

impl Session {
    /// Create a session for `namespace`.
    ///
    /// Fails on an invalid namespace name or configuration.
    pub fn new(
        namespace: impl Into<String>,
        cluster: Arc<dyn ClusterApi>,
        config: FrameworkConfig,
    ) -> Result<Self> {
        let namespace = namespace.into();
        validate_namespace(&namespace)?;
        config.validate()?;

        Ok(Self {
            namespace,
            cluster,
            config,
            tracker: ResourceTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Session namespace
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Active configuration
    pub fn config(&self) -> &FrameworkConfig {
        &self.config
    }

    /// Ledger of tracked resources
    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    /// Token cancelled by [`Session::cancel`]; child work should watch it
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop in-flight waits, retries and teardown phases
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Labels setup code must put on every resource it creates
    pub fn managed_labels(&self) -> BTreeMap<String, String> {
        kinds::managed_labels(&self.namespace)
    }

    /// Selector matching every resource labelled by this session
    pub fn label_selector(&self) -> String {
        kinds::label_selector(&self.namespace)
    }

    /// Record a custom resource created in the session namespace
    pub fn track_custom_resource(&self, kind: ResourceKind, name: impl Into<String>) {
        self.tracker
            .track_custom(ManagedResource::namespaced(kind, &self.namespace, name));
    }

    /// Record a cluster-scoped resource created for this session
    pub fn track_cluster_resource(&self, kind: ResourceKind, name: impl Into<String>) {
        self.tracker
            .track_cluster_scoped(ManagedResource::cluster_scoped(kind, name));
    }

    /// Wait until a resource in the session namespace exists
    pub async fn wait_for_resource(&self, kind: ResourceKind, name: &str) -> Result<()> {
        let resource = ManagedResource::namespaced(kind, &self.namespace, name);
        wait_for_present(
            self.cluster.as_ref(),
            &self.cancel,
            &resource,
            self.config.ready_timeout,
            self.config.ready_poll_interval,
        )
        .await
    }

    /// Wait until a resource is gone; an empty `namespace` means cluster-scoped
    pub async fn wait_for_absent(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> Result<()> {
        let resource = ManagedResource::namespaced(kind, namespace, name);
        wait_for_absent(
            self.cluster.as_ref(),
            &self.cancel,
            &resource,
            timeout,
            self.config.cr_deletion_poll_interval,
        )
        .await
    }

    /// Run every teardown phase and return the detailed report
    pub async fn teardown(&self) -> TeardownReport {
        let teardown = Teardown::new(
            self.cluster.clone(),
            &self.namespace,
            self.config.clone(),
            self.cancel.clone(),
        );
        teardown
            .run(
                self.tracker.snapshot_custom(),
                self.tracker.snapshot_cluster_scoped(),
            )
            .await
    }

    /// Remove everything the session created.
    ///
    /// Every phase runs even if an earlier one failed; the error combines
    /// whatever could not be confirmed removed. Safe to call repeatedly.
    pub async fn cleanup(&self) -> Result<()> {
        self.teardown().await.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterApi;
    use tracebench_common::kinds::{CLUSTER_ROLE, TEMPO_STACK};
    use tracebench_common::LABEL_INSTANCE;

    fn session(namespace: &str) -> Result<Session> {
        Session::new(
            namespace,
            Arc::new(MockClusterApi::new()),
            FrameworkConfig::default(),
        )
    }

    #[test]
    fn namespace_must_be_a_dns_label() {
        assert!(session("perf-test-1").is_ok());
        assert!(matches!(session(""), Err(Error::Config { .. })));
        assert!(session("Perf").is_err());
        assert!(session("-perf").is_err());
        assert!(session("perf-").is_err());
        assert!(session("perf_test").is_err());
        assert!(session(&"a".repeat(64)).is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = FrameworkConfig::default().with_max_concurrent_queries(0);
        let result = Session::new("perf", Arc::new(MockClusterApi::new()), config);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn tracking_records_scope_and_namespace() {
        let session = session("perf").unwrap();
        session.track_custom_resource(TEMPO_STACK, "simplest");
        session.track_cluster_resource(CLUSTER_ROLE, "perf-reader");

        let custom = session.tracker().snapshot_custom();
        assert_eq!(custom[0].namespace, "perf");
        let cluster = session.tracker().snapshot_cluster_scoped();
        assert!(cluster[0].is_cluster_scoped());
    }

    #[test]
    fn labels_identify_the_session() {
        let session = session("perf").unwrap();
        assert_eq!(
            session.managed_labels().get(LABEL_INSTANCE).map(String::as_str),
            Some("perf")
        );
        assert!(session.label_selector().ends_with("instance=perf"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_readiness_wait() {
        let mut mock = MockClusterApi::new();
        mock.expect_exists().returning(|_, _, _| Ok(false));
        let session = Session::new("perf", Arc::new(mock), FrameworkConfig::default()).unwrap();

        let token = session.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            token.cancel();
        });

        let err = session
            .wait_for_resource(TEMPO_STACK, "simplest")
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
