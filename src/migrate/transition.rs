//! Per-node handoff from a legacy `CStorPool` to its `CStorPoolInstance`.
//!
//! The legacy pool deployment must report zero ready replicas before the
//! CSPI is enabled, so the zpool is never imported by two pods at once.

use anyhow::{Context, Result};
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tracing::info;

use crate::crd::{CStorPool, CStorPoolInstance, CStorVolumeReplica};
use crate::error::SmuError;
use crate::k8s::{ClusterApi, update_with_retry};
use crate::labels::{
    CSP_DEPLOYMENT_LABEL, CSP_HOSTNAME_ANNOTATION, CSP_NAME_LABEL, CSP_UID_LABEL,
    CSPI_HOSTNAME_ANNOTATION, CSPI_NAME_LABEL, CSPI_UID_LABEL, DISABLE_RECONCILE_ANNOTATION,
    HOSTNAME_LABEL, OLD_POOL_NAME_ANNOTATION, SPC_LABEL, all_of, selector,
};
use crate::patch;
use crate::retry::{RetryPolicy, retry};

/// Migrate the legacy pool on `cspi`'s node into `cspi`.
///
/// Returns the CSPI as last observed ONLINE.
pub async fn csp_to_cspi<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    cspi: CStorPoolInstance,
    cspc_name: &str,
    poll: &RetryPolicy,
) -> Result<CStorPoolInstance> {
    let cspi_name = cspi.name_any();
    let hostname = hostname_of(&cspi)?;

    let csp = get_csp(cluster, &hostname, cspc_name).await?;
    let csp_name = csp.name_any();
    let csp_uid = csp
        .uid()
        .ok_or_else(|| SmuError::InvalidConfiguration(format!("csp {csp_name} has no uid")))?;
    info!("Migrating csp {} to cspi {}", csp_name, cspi_name);

    scale_down_deployment(cluster, namespace, &csp_name, poll).await?;

    let old_pool_name = format!("cstor-{csp_uid}");
    update_with_retry(cluster, namespace, cspi, |cspi| {
        enable_import(cspi, &old_pool_name)
    })
    .await
    .with_context(|| format!("failed to enable cspi {cspi_name}"))?;

    let cspi = wait_online(cluster, namespace, &cspi_name, poll).await?;
    relabel_replicas(cluster, namespace, &csp_name, &cspi).await?;

    Ok(cspi)
}

/// Finish the handoff of a CSPI that is already ONLINE.
///
/// An earlier run may have stopped after the import but before the replicas
/// were relabeled, so only that last step is repeated.
pub async fn resume_online<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    cspi: &CStorPoolInstance,
    cspc_name: &str,
) -> Result<usize> {
    let hostname = hostname_of(cspi)?;
    let csp = get_csp(cluster, &hostname, cspc_name).await?;
    relabel_replicas(cluster, namespace, &csp.name_any(), cspi).await
}

fn hostname_of(cspi: &CStorPoolInstance) -> Result<String, SmuError> {
    cspi.labels().get(HOSTNAME_LABEL).cloned().ok_or_else(|| {
        SmuError::InvalidConfiguration(format!(
            "cspi {} has no {HOSTNAME_LABEL} label",
            cspi.name_any()
        ))
    })
}

/// Resolve the one legacy pool of claim `spc_name` on node `hostname`.
pub async fn get_csp<C: ClusterApi>(cluster: &C, hostname: &str, spc_name: &str) -> Result<CStorPool> {
    let csp_selector = all_of(&[
        &selector(HOSTNAME_LABEL, hostname),
        &selector(SPC_LABEL, spc_name),
    ]);
    cluster
        .list_one::<CStorPool>("", &csp_selector)
        .await
        .with_context(|| format!("invalid number of pools on node {hostname}"))
}

/// Scale the legacy pool deployment of `csp_name` to zero and wait for it.
pub async fn scale_down_deployment<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    csp_name: &str,
    poll: &RetryPolicy,
) -> Result<()> {
    let deploy = cluster
        .list_one::<Deployment>(namespace, &selector(CSP_DEPLOYMENT_LABEL, csp_name))
        .await
        .with_context(|| format!("invalid number of csp deployments for {csp_name}"))?;
    let deploy_name = deploy.name_any();
    info!("Scaling down deployment {}", deploy_name);

    cluster
        .patch::<Deployment>(namespace, &deploy_name, &patch::scale_to_zero())
        .await
        .with_context(|| format!("failed to scale down deployment {deploy_name}"))?;

    let deploy_name = deploy_name.as_str();
    retry(poll, &format!("deployment {deploy_name} scale down"), move |_| async move {
        let deploy = cluster
            .get_required::<Deployment>(namespace, deploy_name)
            .await
            .context("failed to get csp deploy")?;
        let ready = deploy
            .status
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        if ready != 0 {
            anyhow::bail!("deployment {deploy_name} still has {ready} ready replicas");
        }
        Ok(())
    })
    .await
}

/// Hand the legacy zpool name to the CSPI and let it reconcile.
fn enable_import(cspi: &mut CStorPoolInstance, old_pool_name: &str) -> bool {
    let annotations = cspi.annotations_mut();
    let renamed = annotations.get(OLD_POOL_NAME_ANNOTATION).map(String::as_str) != Some(old_pool_name);
    if renamed {
        annotations.insert(OLD_POOL_NAME_ANNOTATION.to_string(), old_pool_name.to_string());
    }
    let enabled = annotations.remove(DISABLE_RECONCILE_ANNOTATION).is_some();
    renamed || enabled
}

async fn wait_online<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    cspi_name: &str,
    poll: &RetryPolicy,
) -> Result<CStorPoolInstance> {
    retry(poll, &format!("cspi {cspi_name} online"), move |_| async move {
        let cspi = cluster
            .get_required::<CStorPoolInstance>(namespace, cspi_name)
            .await?;
        if !cspi.is_online() {
            anyhow::bail!(
                "failed to verify cspi {cspi_name} phase expected: ONLINE got: {}",
                cspi.phase()
            );
        }
        Ok(cspi)
    })
    .await
}

/// Point replicas that lived on `csp_name` at `cspi`.
pub async fn relabel_replicas<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    csp_name: &str,
    cspi: &CStorPoolInstance,
) -> Result<usize> {
    let cspi_name = cspi.name_any();
    let cspi_uid = cspi.uid().unwrap_or_default();
    let cvrs = cluster
        .list::<CStorVolumeReplica>(namespace, &selector(CSP_NAME_LABEL, csp_name))
        .await?;

    let mut updated = 0;
    for cvr in cvrs {
        if cvr.labels().contains_key(CSPI_NAME_LABEL) {
            continue;
        }
        let cvr_name = cvr.name_any();
        info!("Updating cvr {} with cspi {} info", cvr_name, cspi_name);
        let (_, written) = update_with_retry(cluster, namespace, cvr, |cvr| {
            if cvr.labels().contains_key(CSPI_NAME_LABEL) {
                return false;
            }
            let labels = cvr.labels_mut();
            labels.remove(CSP_NAME_LABEL);
            labels.remove(CSP_UID_LABEL);
            labels.insert(CSPI_NAME_LABEL.to_string(), cspi_name.clone());
            labels.insert(CSPI_UID_LABEL.to_string(), cspi_uid.clone());
            let annotations = cvr.annotations_mut();
            annotations.remove(CSP_HOSTNAME_ANNOTATION);
            annotations.insert(
                CSPI_HOSTNAME_ANNOTATION.to_string(),
                cspi.spec.host_name.clone(),
            );
            true
        })
        .await
        .with_context(|| format!("failed to update cvr {cvr_name} with cspc info"))?;
        updated += usize::from(written);
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{CStorPoolInstanceSpec, CStorPoolSpec, CStorVolumeReplicaSpec};
    use crate::k8s::fake::FakeCluster;
    use crate::migrate::tests::{deployment, scale_down_reactor};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const NS: &str = "openebs";

    fn csp(name: &str, host: &str) -> CStorPool {
        let mut csp = CStorPool::new(name, CStorPoolSpec::default());
        csp.metadata.labels = Some(BTreeMap::from([
            (HOSTNAME_LABEL.to_string(), host.to_string()),
            (SPC_LABEL.to_string(), "pool-a".to_string()),
        ]));
        csp
    }

    fn cspi(name: &str, host: &str) -> CStorPoolInstance {
        let mut cspi = CStorPoolInstance::new(
            name,
            CStorPoolInstanceSpec {
                host_name: host.to_string(),
                ..Default::default()
            },
        );
        cspi.labels_mut()
            .insert(HOSTNAME_LABEL.to_string(), host.to_string());
        cspi.annotations_mut()
            .insert(DISABLE_RECONCILE_ANNOTATION.to_string(), "true".to_string());
        cspi
    }

    #[tokio::test]
    async fn test_get_csp_requires_exactly_one() {
        let fake = FakeCluster::new();
        let err = get_csp(&fake, "node-1", "pool-a").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SmuError>(),
            Some(SmuError::AmbiguousMatch { count: 0, .. })
        ));

        fake.insert("", csp("pool-a-x1", "node-1"));
        assert_eq!(
            get_csp(&fake, "node-1", "pool-a").await.unwrap().name_any(),
            "pool-a-x1"
        );

        fake.insert("", csp("pool-a-x2", "node-1"));
        let err = get_csp(&fake, "node-1", "pool-a").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SmuError>(),
            Some(SmuError::AmbiguousMatch { count: 2, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_down_waits_for_zero_ready() {
        let fake = FakeCluster::new();
        fake.insert(NS, deployment("pool-a-x1", 1));
        fake.react("Deployment", scale_down_reactor());

        scale_down_deployment(&fake, NS, "pool-a-x1", &RetryPolicy::DEFAULT)
            .await
            .unwrap();

        assert_eq!(fake.mutations(), ["patch Deployment/pool-a-x1-deploy"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_down_times_out_and_cspi_stays_disabled() {
        let fake = FakeCluster::new();
        fake.insert("", csp("pool-a-x1", "node-1"));
        fake.insert(NS, deployment("pool-a-x1", 1));
        fake.insert(NS, cspi("pool-a-abcd", "node-1"));
        let cspi: CStorPoolInstance = fake.object(NS, "pool-a-abcd").unwrap();

        let start = tokio::time::Instant::now();
        let err = csp_to_cspi(&fake, NS, cspi, "pool-a", &RetryPolicy::DEFAULT)
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        match err.downcast_ref::<SmuError>() {
            Some(SmuError::Timeout { attempts, last_error, .. }) => {
                assert_eq!(*attempts, 60);
                assert!(last_error.contains("1 ready replicas"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(elapsed >= Duration::from_secs(295));
        assert!(elapsed <= Duration::from_secs(300));

        let cspi: CStorPoolInstance = fake.object(NS, "pool-a-abcd").unwrap();
        assert!(cspi.annotations().contains_key(DISABLE_RECONCILE_ANNOTATION));
        assert_eq!(fake.mutations(), ["patch Deployment/pool-a-x1-deploy"]);
    }

    #[tokio::test]
    async fn test_missing_hostname_label() {
        let fake = FakeCluster::new();
        let cspi = CStorPoolInstance::new("pool-a-abcd", CStorPoolInstanceSpec::default());
        let err = csp_to_cspi(&fake, NS, cspi, "pool-a", &RetryPolicy::DEFAULT)
            .await
            .unwrap_err();
        assert!(err.to_string().contains(HOSTNAME_LABEL));
    }

    #[test]
    fn test_enable_import() {
        let mut cspi = cspi("pool-a-abcd", "node-1");
        assert!(enable_import(&mut cspi, "cstor-uid-1"));
        assert!(!cspi.annotations().contains_key(DISABLE_RECONCILE_ANNOTATION));
        assert_eq!(
            cspi.annotations()[OLD_POOL_NAME_ANNOTATION],
            "cstor-uid-1"
        );
        assert!(!enable_import(&mut cspi, "cstor-uid-1"));
    }

    #[tokio::test]
    async fn test_relabel_replicas_skips_migrated() {
        let fake = FakeCluster::new();
        let mut fresh = CStorVolumeReplica::new("pvc-1-pool-a-x1", CStorVolumeReplicaSpec::default());
        fresh.metadata.labels = Some(BTreeMap::from([
            (CSP_NAME_LABEL.to_string(), "pool-a-x1".to_string()),
            (CSP_UID_LABEL.to_string(), "csp-uid".to_string()),
        ]));
        fresh.metadata.annotations = Some(BTreeMap::from([(
            CSP_HOSTNAME_ANNOTATION.to_string(),
            "node-1".to_string(),
        )]));
        let mut done = fresh.clone();
        done.metadata.name = Some("pvc-2-pool-a-x1".to_string());
        done.labels_mut()
            .insert(CSPI_NAME_LABEL.to_string(), "pool-a-abcd".to_string());
        fake.insert(NS, fresh);
        fake.insert(NS, done);
        fake.insert(NS, cspi("pool-a-abcd", "node-1"));
        let cspi: CStorPoolInstance = fake.object(NS, "pool-a-abcd").unwrap();

        let updated = relabel_replicas(&fake, NS, "pool-a-x1", &cspi).await.unwrap();
        assert_eq!(updated, 1);

        let cvr: CStorVolumeReplica = fake.object(NS, "pvc-1-pool-a-x1").unwrap();
        assert!(!cvr.labels().contains_key(CSP_NAME_LABEL));
        assert!(!cvr.labels().contains_key(CSP_UID_LABEL));
        assert_eq!(cvr.labels()[CSPI_NAME_LABEL], "pool-a-abcd");
        assert_eq!(Some(cvr.labels()[CSPI_UID_LABEL].clone()), cspi.uid());
        assert!(!cvr.annotations().contains_key(CSP_HOSTNAME_ANNOTATION));
        assert_eq!(cvr.annotations()[CSPI_HOSTNAME_ANNOTATION], "node-1");
    }

    #[tokio::test]
    async fn test_enable_import_keeps_unmodeled_fields() {
        let fake = FakeCluster::new();
        fake.insert_value::<CStorPoolInstance>(
            NS,
            json!({
                "apiVersion": "cstor.openebs.io/v1",
                "kind": "CStorPoolInstance",
                "metadata": {
                    "name": "pool-a-abcd",
                    "annotations": {DISABLE_RECONCILE_ANNOTATION: "true"}
                },
                "spec": {
                    "hostName": "node-1",
                    "poolConfig": {
                        "dataRaidGroupType": "stripe",
                        "writeCacheGroupType": "mirror",
                        "priorityClassName": "pool-critical",
                        "roThresholdLimit": 85
                    }
                },
                "status": {"phase": "OFFLINE"},
                "versionDetails": {"desired": "2.12.0"}
            }),
        );
        let cspi: CStorPoolInstance = fake.object(NS, "pool-a-abcd").unwrap();

        update_with_retry(&fake, NS, cspi, |cspi| enable_import(cspi, "cstor-uid-1"))
            .await
            .unwrap();

        let stored = fake.value::<CStorPoolInstance>(NS, "pool-a-abcd").unwrap();
        assert_eq!(
            stored["metadata"]["annotations"],
            json!({OLD_POOL_NAME_ANNOTATION: "cstor-uid-1"})
        );
        let pool_config = &stored["spec"]["poolConfig"];
        assert_eq!(pool_config["writeCacheGroupType"], "mirror");
        assert_eq!(pool_config["priorityClassName"], "pool-critical");
        assert_eq!(pool_config["roThresholdLimit"], 85);
        assert!(pool_config.get("thickProvision").is_none());
        assert_eq!(stored["status"]["phase"], "OFFLINE");
        assert_eq!(stored["versionDetails"]["desired"], "2.12.0");
    }

    #[tokio::test]
    async fn test_relabel_replicas_keeps_unmodeled_fields() {
        let fake = FakeCluster::new();
        fake.insert_value::<CStorVolumeReplica>(
            NS,
            json!({
                "apiVersion": "openebs.io/v1alpha1",
                "kind": "CStorVolumeReplica",
                "metadata": {
                    "name": "pvc-1-pool-a-x1",
                    "labels": {CSP_NAME_LABEL: "pool-a-x1", CSP_UID_LABEL: "csp-uid"}
                },
                "spec": {
                    "capacity": "5G",
                    "targetIP": "10.0.0.7",
                    "replicaid": "A1B2",
                    "blockSize": 4096
                },
                "status": {"phase": "Healthy"}
            }),
        );
        fake.insert(NS, cspi("pool-a-abcd", "node-1"));
        let cspi: CStorPoolInstance = fake.object(NS, "pool-a-abcd").unwrap();

        let updated = relabel_replicas(&fake, NS, "pool-a-x1", &cspi).await.unwrap();
        assert_eq!(updated, 1);

        let stored = fake.value::<CStorVolumeReplica>(NS, "pvc-1-pool-a-x1").unwrap();
        assert_eq!(stored["metadata"]["labels"][CSPI_NAME_LABEL], "pool-a-abcd");
        assert_eq!(stored["spec"]["targetIP"], "10.0.0.7");
        assert_eq!(stored["spec"]["replicaid"], "A1B2");
        assert_eq!(stored["spec"]["blockSize"], 4096);
        assert_eq!(stored["status"]["phase"], "Healthy");

        let cvr: CStorVolumeReplica = fake.object(NS, "pvc-1-pool-a-x1").unwrap();
        assert_eq!(cvr.spec.target_ip, "10.0.0.7");
    }
}
