//! In-memory cluster for teardown scenarios

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use tracebench_cleanup::{ClusterApi, VolumeInfo, VolumePhase};
use tracebench_common::kinds::{managed_labels, NAMESPACE, PERSISTENT_VOLUME};
use tracebench_common::{Error, FrameworkConfig, ResourceKind, Result};

type Key = (&'static str, String, String);

#[derive(Debug, Clone, Default)]
struct FakeObject {
    labels: BTreeMap<String, String>,
    finalizers: Vec<String>,
    deleting: bool,
}

#[derive(Debug, Clone)]
struct FakeVolume {
    info: VolumeInfo,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, FakeObject>,
    volumes: BTreeMap<String, FakeVolume>,
    transient_failures: HashMap<String, u32>,
    delete_calls: Vec<String>,
    finalizer_patches: Vec<String>,
}

/// Cluster state held in memory.
///
/// Objects with finalizers stay after deletion until their finalizers are
/// cleared. Deleting a namespace removes everything in it.
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn key(kind: ResourceKind, namespace: &str, name: &str) -> Key {
    (kind.plural, namespace.to_string(), name.to_string())
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => labels.contains_key(term),
        })
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_namespace(&self, namespace: &str) {
        self.state()
            .objects
            .insert(key(NAMESPACE, "", namespace), FakeObject::default());
    }

    /// Add an object carrying the session labels of `session_namespace`
    pub fn add_labelled(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        session_namespace: &str,
    ) {
        self.state().objects.insert(
            key(kind, namespace, name),
            FakeObject {
                labels: managed_labels(session_namespace),
                ..Default::default()
            },
        );
    }

    pub fn add(&self, kind: ResourceKind, namespace: &str, name: &str) {
        self.state()
            .objects
            .insert(key(kind, namespace, name), FakeObject::default());
    }

    pub fn add_with_finalizer(&self, kind: ResourceKind, namespace: &str, name: &str) {
        self.state().objects.insert(
            key(kind, namespace, name),
            FakeObject {
                finalizers: vec!["tempo.grafana.com/finalizer".to_string()],
                ..Default::default()
            },
        );
    }

    pub fn add_volume(
        &self,
        name: &str,
        phase: VolumePhase,
        claim_namespace: Option<&str>,
        labels: BTreeMap<String, String>,
    ) {
        self.state().volumes.insert(
            name.to_string(),
            FakeVolume {
                info: VolumeInfo {
                    name: name.to_string(),
                    phase,
                    claim_namespace: claim_namespace.map(str::to_string),
                },
                labels,
            },
        );
    }

    /// Make the next `times` deletes of `name` fail with a transient error
    pub fn fail_deletes(&self, name: &str, times: u32) {
        self.state()
            .transient_failures
            .insert(name.to_string(), times);
    }

    pub fn contains(&self, kind: ResourceKind, namespace: &str, name: &str) -> bool {
        self.state().objects.contains_key(&key(kind, namespace, name))
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state().volumes.contains_key(name)
    }

    /// Every delete call as `plural/name`, including failed ones
    pub fn delete_calls(&self) -> Vec<String> {
        self.state().delete_calls.clone()
    }

    pub fn finalizer_patches(&self) -> Vec<String> {
        self.state().finalizer_patches.clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.delete_calls.push(format!("{}/{}", kind.plural, name));

        if let Some(remaining) = state.transient_failures.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::internal_with_context("delete", "etcd leader changed"));
            }
        }

        if kind == PERSISTENT_VOLUME {
            state.volumes.remove(name);
            return Ok(());
        }

        if kind == NAMESPACE {
            state.objects.remove(&key(NAMESPACE, "", name));
            state.objects.retain(|(_, ns, _), _| ns != name);
            return Ok(());
        }

        let k = key(kind, namespace, name);
        let blocked = match state.objects.get_mut(&k) {
            Some(obj) if !obj.finalizers.is_empty() => {
                obj.deleting = true;
                true
            }
            _ => false,
        };
        if !blocked {
            state.objects.remove(&k);
        }
        Ok(())
    }

    async fn list_names(
        &self,
        kind: ResourceKind,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<String>> {
        Ok(self
            .state()
            .objects
            .iter()
            .filter(|((plural, ns, _), obj)| {
                *plural == kind.plural
                    && ns == namespace
                    && matches_selector(&obj.labels, label_selector)
            })
            .map(|((_, _, name), _)| name.clone())
            .collect())
    }

    async fn exists(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<bool> {
        Ok(self.contains(kind, namespace, name))
    }

    async fn clear_finalizers(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<bool> {
        let mut state = self.state();
        let k = key(kind, namespace, name);
        let Some(obj) = state.objects.get_mut(&k) else {
            return Ok(false);
        };
        if obj.finalizers.is_empty() {
            return Ok(false);
        }

        obj.finalizers.clear();
        let deleting = obj.deleting;
        if deleting {
            state.objects.remove(&k);
        }
        state.finalizer_patches.push(name.to_string());
        Ok(true)
    }

    async fn list_volumes(&self, label_selector: &str) -> Result<Vec<VolumeInfo>> {
        Ok(self
            .state()
            .volumes
            .values()
            .filter(|v| matches_selector(&v.labels, label_selector))
            .map(|v| v.info.clone())
            .collect())
    }
}

/// Short timeouts so paused-clock scenarios finish quickly
pub fn fast_config() -> FrameworkConfig {
    FrameworkConfig::default()
        .with_cr_deletion_timeout(Duration::from_secs(10))
        .with_cr_deletion_poll_interval(Duration::from_secs(1))
        .with_namespace_timeout(Duration::from_secs(10))
        .with_namespace_poll_interval(Duration::from_secs(1))
        .with_delete_retry(3, Duration::from_secs(1))
}
