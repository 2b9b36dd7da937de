//! Build the `CStorPoolCluster` equivalent of a `StoragePoolClaim`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use kube::ResourceExt;
use tracing::info;

use crate::crd::{
    CStorPool, CStorPoolCluster, CStorPoolClusterSpec, CStorPoolInstance, PoolBlockDevice,
    PoolConfig, PoolSpec, RaidGroup, StoragePoolClaim,
};
use crate::error::SmuError;
use crate::k8s::{ClusterApi, update_with_retry};
use crate::labels::{CSPC_LABEL, DISABLE_DEPENDANTS_RECONCILE_ANNOTATION, HOSTNAME_LABEL, selector};
use crate::retry::{RetryPolicy, retry};

/// Map a legacy pool type to a raid group type.
pub fn raid_group_type(pool_type: &str) -> &str {
    match pool_type {
        "mirrored" => "mirror",
        "striped" | "" => "stripe",
        other => other,
    }
}

/// Build the cluster for `spc`: one pool per CSP on the CSP's node.
///
/// The result is annotated so the pool operator creates its CSPIs disabled.
pub fn build_cspc(
    spc: &StoragePoolClaim,
    csps: &[CStorPool],
    namespace: &str,
) -> Result<CStorPoolCluster, SmuError> {
    let attrs = &spc.spec.pool_spec;
    let pool_config = PoolConfig {
        data_raid_group_type: raid_group_type(&attrs.pool_type).to_string(),
        thick_provision: !attrs.over_provisioning,
        compression: attrs.compression.clone(),
    };

    let pools = csps
        .iter()
        .map(|csp| {
            let hostname = csp.labels().get(HOSTNAME_LABEL).ok_or_else(|| {
                SmuError::InvalidConfiguration(format!(
                    "csp {} has no {HOSTNAME_LABEL} label",
                    csp.name_any()
                ))
            })?;
            Ok(PoolSpec {
                node_selector: BTreeMap::from([(HOSTNAME_LABEL.to_string(), hostname.clone())]),
                data_raid_groups: vec![RaidGroup {
                    block_devices: csp
                        .block_device_names()
                        .map(|bd| PoolBlockDevice {
                            block_device_name: bd.to_string(),
                        })
                        .collect(),
                }],
                pool_config: pool_config.clone(),
            })
        })
        .collect::<Result<Vec<_>, SmuError>>()?;

    let mut cspc = CStorPoolCluster::new(&spc.name_any(), CStorPoolClusterSpec { pools });
    cspc.metadata.namespace = Some(namespace.to_string());
    cspc.annotations_mut().insert(
        DISABLE_DEPENDANTS_RECONCILE_ANNOTATION.to_string(),
        "true".to_string(),
    );
    Ok(cspc)
}

/// Create the cluster for `spc`, or reuse one left by an earlier run.
///
/// Waits until the pool operator has created one CSPI per pool, then lets it
/// reconcile them again by clearing the disable-dependants annotation.
pub async fn ensure_cspc<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    spc: &StoragePoolClaim,
    csps: &[CStorPool],
    poll: &RetryPolicy,
) -> Result<CStorPoolCluster> {
    let name = spc.name_any();

    let cspc = if let Some(existing) = cluster.get::<CStorPoolCluster>(namespace, &name).await? {
        info!("Reusing existing cspc {}", name);
        existing
    } else {
        info!("Creating equivalent cspc for spc {}", name);
        let desired = build_cspc(spc, csps, namespace)?;
        cluster
            .create(namespace, &desired)
            .await
            .with_context(|| format!("failed to create cspc {name}"))?
    };

    let expected = cspc.spec.pools.len();
    let cspi_selector = selector(CSPC_LABEL, &name);
    let cspi_selector = cspi_selector.as_str();
    retry(poll, &format!("cspi creation for cspc {name}"), move |_| async move {
        let found = cluster
            .list::<CStorPoolInstance>(namespace, cspi_selector)
            .await?
            .len();
        if found == expected {
            Ok(())
        } else {
            anyhow::bail!("expected {expected} cspi, found {found}")
        }
    })
    .await?;

    if !cspc
        .annotations()
        .contains_key(DISABLE_DEPENDANTS_RECONCILE_ANNOTATION)
    {
        return Ok(cspc);
    }
    let (cspc, _) = update_with_retry(cluster, namespace, cspc, |cspc| {
        cspc.annotations_mut()
            .remove(DISABLE_DEPENDANTS_RECONCILE_ANNOTATION)
            .is_some()
    })
    .await
    .with_context(|| format!("failed to enable dependants of cspc {name}"))?;
    Ok(cspc)
}
