//! The `ClusterApi` seam and its `kube` implementation.

use std::fmt::Debug;

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ObjectReference, Pod, Service};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::crd::{
    BlockDeviceClaim, CStorPool, CStorPoolCluster, CStorPoolInstance, CStorVolumeReplica,
    StoragePoolClaim, UpgradeTask,
};
use crate::error::SmuError;

/// Field manager name for patches and event reporter name.
pub const MANAGER: &str = "smu";

/// A Kubernetes object the job reads or writes.
pub trait ClusterObject:
    Resource<DynamicType = ()> + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Whether the object lives in a namespace.
    const NAMESPACED: bool;

    /// Typed API handle. Cluster-scoped kinds ignore `namespace`.
    fn api(client: &kube::Client, namespace: &str) -> Api<Self>;

    fn kind_name() -> String {
        Self::kind(&()).to_string()
    }
}

macro_rules! namespaced_objects {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ClusterObject for $ty {
                const NAMESPACED: bool = true;

                fn api(client: &kube::Client, namespace: &str) -> Api<Self> {
                    Api::namespaced(client.clone(), namespace)
                }
            }
        )*
    };
}

macro_rules! cluster_objects {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ClusterObject for $ty {
                const NAMESPACED: bool = false;

                fn api(client: &kube::Client, _namespace: &str) -> Api<Self> {
                    Api::all(client.clone())
                }
            }
        )*
    };
}

namespaced_objects!(
    CStorPoolCluster,
    CStorPoolInstance,
    BlockDeviceClaim,
    CStorVolumeReplica,
    UpgradeTask,
    Deployment,
    StatefulSet,
    Service,
    Pod,
    Job,
);

cluster_objects!(StoragePoolClaim, CStorPool);

/// Event severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// Everything the migration and upgrade need from the API server.
///
/// Errors are [`SmuError`] values inside `anyhow::Error`, so callers can tell
/// a lost update race ([`SmuError::Conflict`]) from other failures.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch an object, `None` if it does not exist.
    async fn get<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// List objects matching an equality label selector. Empty selects all.
    async fn list<K: ClusterObject>(&self, namespace: &str, selector: &str) -> Result<Vec<K>>;

    async fn create<K: ClusterObject>(&self, namespace: &str, obj: &K) -> Result<K>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<()>;

    /// Apply a JSON merge patch. A `metadata.resourceVersion` in the patch is
    /// a precondition and fails with a conflict when stale.
    async fn patch<K: ClusterObject>(&self, namespace: &str, name: &str, patch: &Value)
    -> Result<K>;

    /// Publish an event about `regarding`. Failures are logged, never returned.
    async fn publish_event(
        &self,
        regarding: &ObjectReference,
        kind: EventKind,
        reason: &str,
        note: &str,
    );

    /// Fetch an object that must exist.
    async fn get_required<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<K> {
        self.get::<K>(namespace, name)
            .await?
            .ok_or_else(|| SmuError::NotFound(format!("{} {name}", K::kind_name())).into())
    }

    /// List with a selector that must match exactly one object.
    async fn list_one<K: ClusterObject>(&self, namespace: &str, selector: &str) -> Result<K> {
        let mut items = self.list::<K>(namespace, selector).await?;
        if items.len() != 1 {
            return Err(SmuError::AmbiguousMatch {
                kind: K::kind_name(),
                selector: selector.to_string(),
                count: items.len(),
            }
            .into());
        }
        Ok(items.remove(0))
    }
}

/// [`ClusterApi`] backed by a live `kube::Client`.
pub struct KubeCluster {
    client: kube::Client,
    recorder: Recorder,
}

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        let reporter = Reporter {
            controller: MANAGER.into(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client.clone(), reporter),
            client,
        }
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        debug!("Getting {} {}/{}", K::kind_name(), namespace, name);
        let obj = K::api(&self.client, namespace)
            .get_opt(name)
            .await
            .map_err(|e| SmuError::kube(&K::kind_name(), "get", name, e))?;
        Ok(obj)
    }

    async fn list<K: ClusterObject>(&self, namespace: &str, selector: &str) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(selector);
        }
        let list = K::api(&self.client, namespace)
            .list(&params)
            .await
            .map_err(|e| SmuError::kube(&K::kind_name(), "list", selector, e))?;
        debug!(
            "Listed {} {} in {} with '{}'",
            list.items.len(),
            K::kind_name(),
            namespace,
            selector
        );
        Ok(list.items)
    }

    async fn create<K: ClusterObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let name = obj.name_any();
        let created = K::api(&self.client, namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| SmuError::kube(&K::kind_name(), "create", &name, e))?;
        Ok(created)
    }

    async fn delete<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<()> {
        match K::api(&self.client, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!("{} {} already gone", K::kind_name(), name);
                Ok(())
            }
            Err(e) => Err(SmuError::kube(&K::kind_name(), "delete", name, e).into()),
        }
    }

    async fn patch<K: ClusterObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        let patched = K::api(&self.client, namespace)
            .patch(name, &PatchParams::apply(MANAGER), &Patch::Merge(patch))
            .await
            .map_err(|e| SmuError::kube(&K::kind_name(), "patch", name, e))?;
        Ok(patched)
    }

    async fn publish_event(
        &self,
        regarding: &ObjectReference,
        kind: EventKind,
        reason: &str,
        note: &str,
    ) {
        let type_ = match kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(note.into()),
                    action: reason.into(),
                    secondary: None,
                },
                regarding,
            )
            .await
            .unwrap_or_else(|e| warn!("Failed to publish {} event: {}", reason, e));
    }
}
