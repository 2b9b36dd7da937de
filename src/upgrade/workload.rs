//! Versioned workloads patched during an upgrade.

use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use serde_json::Value;
use tracing::info;

use crate::error::SmuError;
use crate::k8s::{ClusterApi, ClusterObject};
use crate::labels::VERSION_LABEL;
use crate::retry::{RetryPolicy, retry};

/// A workload carrying the OpenEBS version label.
pub trait Workload: ClusterObject {
    /// `Ok` once the latest spec is fully rolled out, otherwise what is pending.
    fn rollout_status(&self) -> Result<(), String> {
        Ok(())
    }
}

impl Workload for Service {}

impl Workload for Deployment {
    fn rollout_status(&self) -> Result<(), String> {
        let generation = self.metadata.generation.unwrap_or(0);
        let status = self.status.clone().unwrap_or_default();
        if status.observed_generation.unwrap_or(0) < generation {
            return Err("waiting for deployment spec update to be observed".into());
        }
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let updated = status.updated_replicas.unwrap_or(0);
        if updated < desired {
            return Err(format!("{updated} of {desired} replicas have been updated"));
        }
        let total = status.replicas.unwrap_or(0);
        if total > updated {
            return Err(format!("{} old replicas are pending termination", total - updated));
        }
        let available = status.available_replicas.unwrap_or(0);
        if available < updated {
            return Err(format!("{available} of {updated} updated replicas are available"));
        }
        Ok(())
    }
}

impl Workload for StatefulSet {
    fn rollout_status(&self) -> Result<(), String> {
        let generation = self.metadata.generation.unwrap_or(0);
        let status = self.status.clone().unwrap_or_default();
        if status.observed_generation.unwrap_or(0) < generation {
            return Err("waiting for statefulset spec update to be observed".into());
        }
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let updated = status.updated_replicas.unwrap_or(0);
        if updated < desired {
            return Err(format!("{updated} of {desired} pods have been updated"));
        }
        let ready = status.ready_replicas.unwrap_or(0);
        if ready < desired {
            return Err(format!("{ready} of {desired} pods are ready"));
        }
        Ok(())
    }
}

/// Version label of `obj`, empty when unset.
pub fn version<K: ResourceExt>(obj: &K) -> &str {
    obj.labels().get(VERSION_LABEL).map_or("", String::as_str)
}

/// A resolved workload and the merge patch that upgrades it.
#[derive(Clone, Debug)]
pub struct Patched<K> {
    pub object: K,
    pub patch: Option<Value>,
}

impl<K: Workload> Patched<K> {
    /// Resolve the one workload matching `selector`.
    pub async fn get<C: ClusterApi>(cluster: &C, namespace: &str, selector: &str) -> Result<Self> {
        let object = cluster.list_one::<K>(namespace, selector).await?;
        Ok(Self {
            object,
            patch: None,
        })
    }

    /// The workload must be at `from`, or already at `to` from an earlier run.
    pub fn pre_checks(&self, from: &str, to: &str) -> Result<(), SmuError> {
        let current = version(&self.object);
        if current == from || current == to {
            return Ok(());
        }
        Err(SmuError::PreCheckFailed(format!(
            "{} {} is at version '{current}', expected {from} or {to}",
            K::kind_name(),
            self.object.name_any()
        )))
    }

    /// Patch the workload unless it is already at `to`, then wait for rollout.
    pub async fn apply<C: ClusterApi>(
        &self,
        cluster: &C,
        namespace: &str,
        to: &str,
        poll: &RetryPolicy,
    ) -> Result<()> {
        let name = self.object.name_any();
        if version(&self.object) == to {
            info!("{} {} is already at {}", K::kind_name(), name, to);
            return Ok(());
        }
        let Some(patch) = &self.patch else {
            info!("{} {} has nothing to patch", K::kind_name(), name);
            return Ok(());
        };

        info!("Patching {} {} to {}", K::kind_name(), name, to);
        cluster.patch::<K>(namespace, &name, patch).await?;

        let name = name.as_str();
        retry(poll, &format!("{} {name} rollout", K::kind_name()), move |_| async move {
            let current = cluster.get_required::<K>(namespace, name).await?;
            current
                .rollout_status()
                .map_err(|pending| anyhow::anyhow!("{} {name}: {pending}", K::kind_name()))
        })
        .await
        .with_context(|| format!("failed to verify rollout of {} {name}", K::kind_name()))
    }
}
