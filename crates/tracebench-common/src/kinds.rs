//! Resource kinds managed by tracebench sessions
//!
//! A [`ResourceKind`] is the (group, version, resource-type) triple needed to
//! address a resource through the dynamic API, plus the `kind` name used in
//! manifests. The catalogues below are fixed: label-based cleanup only
//! searches the kinds listed here.

use std::collections::BTreeMap;
use std::fmt;

use crate::{LABEL_INSTANCE, LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE};

/// API coordinates of a resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKind {
    /// API group, empty for the core group
    pub group: &'static str,
    /// API version within the group
    pub version: &'static str,
    /// Kind as written in manifests (e.g. "TempoStack")
    pub kind: &'static str,
    /// Plural resource name used in API paths (e.g. "tempostacks")
    pub plural: &'static str,
}

impl ResourceKind {
    /// `apiVersion` string: `group/version`, or just `version` for core
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(self.plural)
        } else {
            write!(f, "{}.{}", self.plural, self.group)
        }
    }
}

/// Single-binary Tempo deployment
pub const TEMPO_MONOLITHIC: ResourceKind = ResourceKind {
    group: "tempo.grafana.com",
    version: "v1alpha1",
    kind: "TempoMonolithic",
    plural: "tempomonolithics",
};

/// Microservices Tempo deployment
pub const TEMPO_STACK: ResourceKind = ResourceKind {
    group: "tempo.grafana.com",
    version: "v1alpha1",
    kind: "TempoStack",
    plural: "tempostacks",
};

/// OpenTelemetry collector managed by the OpenTelemetry operator
pub const OTEL_COLLECTOR: ResourceKind = ResourceKind {
    group: "opentelemetry.io",
    version: "v1beta1",
    kind: "OpenTelemetryCollector",
    plural: "opentelemetrycollectors",
};

/// Cluster-wide RBAC role
pub const CLUSTER_ROLE: ResourceKind = ResourceKind {
    group: "rbac.authorization.k8s.io",
    version: "v1",
    kind: "ClusterRole",
    plural: "clusterroles",
};

/// Binding of a cluster role to subjects
pub const CLUSTER_ROLE_BINDING: ResourceKind = ResourceKind {
    group: "rbac.authorization.k8s.io",
    version: "v1",
    kind: "ClusterRoleBinding",
    plural: "clusterrolebindings",
};

/// Core namespace
pub const NAMESPACE: ResourceKind = ResourceKind {
    group: "",
    version: "v1",
    kind: "Namespace",
    plural: "namespaces",
};

/// Core persistent volume
pub const PERSISTENT_VOLUME: ResourceKind = ResourceKind {
    group: "",
    version: "v1",
    kind: "PersistentVolume",
    plural: "persistentvolumes",
};

/// Custom resource kinds a session may create in its namespace
pub fn managed_custom_kinds() -> &'static [ResourceKind] {
    &[TEMPO_MONOLITHIC, TEMPO_STACK, OTEL_COLLECTOR]
}

/// Cluster-scoped kinds a session may create outside its namespace
pub fn cluster_scoped_kinds() -> &'static [ResourceKind] {
    &[CLUSTER_ROLE, CLUSTER_ROLE_BINDING]
}

/// Labels stamped on every resource a session creates
pub fn managed_labels(namespace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_VALUE.to_string()),
        (LABEL_INSTANCE.to_string(), namespace.to_string()),
    ])
}

/// Selector matching everything a session labelled
pub fn label_selector(namespace: &str) -> String {
    format!(
        "{}={},{}={}",
        LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE, LABEL_INSTANCE, namespace
    )
}

/// Selector matching only the session instance label
pub fn instance_selector(namespace: &str) -> String {
    format!("{}={}", LABEL_INSTANCE, namespace)
}
