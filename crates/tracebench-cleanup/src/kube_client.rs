//! kube-rs implementation of [`ClusterApi`]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::debug;

use tracebench_common::{Error, ResourceKind, Result};

use crate::client::{ClusterApi, VolumeInfo, VolumePhase};

/// [`ClusterApi`] backed by a live API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using the ambient kubeconfig or in-cluster credentials
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    fn api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        let ar = api_resource(kind);
        if namespace.is_empty() {
            Api::all_with(self.client.clone(), &ar)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        }
    }
}

/// Dynamic API coordinates for a resource kind
pub fn api_resource(kind: ResourceKind) -> ApiResource {
    ApiResource {
        group: kind.group.to_string(),
        version: kind.version.to_string(),
        api_version: kind.api_version(),
        kind: kind.kind.to_string(),
        plural: kind.plural.to_string(),
    }
}

fn list_params(label_selector: &str) -> ListParams {
    if label_selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(label_selector)
    }
}

fn volume_info(pv: PersistentVolume) -> Option<VolumeInfo> {
    let name = pv.metadata.name?;
    let phase = VolumePhase::parse(pv.status.as_ref().and_then(|s| s.phase.as_deref()));
    let claim_namespace = pv
        .spec
        .and_then(|spec| spec.claim_ref)
        .and_then(|claim| claim.namespace);
    Some(VolumeInfo {
        name,
        phase,
        claim_namespace,
    })
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        match self
            .api(kind, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                debug!(kind = %kind, namespace, name, "delete accepted");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(kind = %kind, namespace, name, "already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_names(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>> {
        let list = self
            .api(kind, namespace)
            .list(&list_params(label_selector))
            .await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|obj| obj.metadata.name)
            .collect())
    }

    async fn exists(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<bool> {
        let found = self.api(kind, namespace).get_opt(name).await?;
        Ok(found.is_some())
    }

    async fn clear_finalizers(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<bool> {
        let api = self.api(kind, namespace);
        let Some(obj) = api.get_opt(name).await? else {
            return Ok(false);
        };

        if obj
            .metadata
            .finalizers
            .as_ref()
            .is_none_or(|f| f.is_empty())
        {
            return Ok(false);
        }

        let patch = serde_json::json!({ "metadata": { "finalizers": null } });
        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn list_volumes(&self, label_selector: &str) -> Result<Vec<VolumeInfo>> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        let list = api.list(&list_params(label_selector)).await?;
        Ok(list.items.into_iter().filter_map(volume_info).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ObjectReference, PersistentVolumeSpec, PersistentVolumeStatus,
    };
    use kube::api::ObjectMeta;
    use tracebench_common::kinds::{CLUSTER_ROLE, NAMESPACE, TEMPO_STACK};

    #[test]
    fn api_resource_carries_group_version_and_plural() {
        let ar = api_resource(TEMPO_STACK);
        assert_eq!(ar.api_version, "tempo.grafana.com/v1alpha1");
        assert_eq!(ar.plural, "tempostacks");
        assert_eq!(ar.kind, "TempoStack");

        let ar = api_resource(NAMESPACE);
        assert_eq!(ar.group, "");
        assert_eq!(ar.api_version, "v1");

        assert_eq!(api_resource(CLUSTER_ROLE).group, "rbac.authorization.k8s.io");
    }

    #[test]
    fn empty_selector_lists_everything() {
        assert!(list_params("").label_selector.is_none());
        assert_eq!(
            list_params("a=b").label_selector.as_deref(),
            Some("a=b")
        );
    }

    #[test]
    fn volume_info_reads_phase_and_claim_namespace() {
        let pv = PersistentVolume {
            metadata: ObjectMeta {
                name: Some("pv-1".to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeSpec {
                claim_ref: Some(ObjectReference {
                    namespace: Some("perf-1".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            status: Some(PersistentVolumeStatus {
                phase: Some("Released".to_string()),
                ..Default::default()
            }),
        };

        let info = volume_info(pv).unwrap();
        assert_eq!(info.name, "pv-1");
        assert_eq!(info.phase, VolumePhase::Released);
        assert_eq!(info.claim_namespace.as_deref(), Some("perf-1"));
    }

    #[test]
    fn unnamed_volume_is_skipped() {
        assert!(volume_info(PersistentVolume::default()).is_none());
    }
}
