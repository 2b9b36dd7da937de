//! Backoff budget of the Job running this process.

use anyhow::{Context, Result};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use super::ClusterApi;
use crate::error::SmuError;

/// Kubernetes default for `spec.backoffLimit`.
pub const DEFAULT_BACKOFF_LIMIT: i32 = 6;

/// Resolve the `backoffLimit` of the Job owning pod `pod_name`.
///
/// The Job is the pod's first owner reference. A Job without an explicit
/// limit gets the Kubernetes default.
pub async fn backoff_limit<C>(cluster: &C, namespace: &str, pod_name: &str) -> Result<i32>
where
    C: ClusterApi + ?Sized,
{
    let pod = cluster
        .get_required::<Pod>(namespace, pod_name)
        .await
        .context("failed to get upgrade job pod")?;

    let job_name = pod
        .metadata
        .owner_references
        .as_deref()
        .and_then(|refs| refs.first())
        .map(|owner| owner.name.clone())
        .ok_or_else(|| {
            SmuError::InvalidConfiguration(format!("pod {pod_name} has no owning job"))
        })?;

    let job = cluster
        .get_required::<Job>(namespace, &job_name)
        .await
        .context("failed to get upgrade job")?;

    let limit = job
        .spec
        .and_then(|s| s.backoff_limit)
        .unwrap_or(DEFAULT_BACKOFF_LIMIT);
    debug!("Job {} backoff limit: {}", job_name, limit);
    Ok(limit)
}
