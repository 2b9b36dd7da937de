//! Hand `BlockDeviceClaim`s over from the claim to the pool cluster.

use anyhow::{Context, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use tracing::info;

use crate::crd::{BlockDeviceClaim, CStorPoolCluster};
use crate::error::SmuError;
use crate::k8s::{ClusterApi, update_with_retry};
use crate::labels::{CSPC_FINALIZER, CSPC_LABEL, SPC_FINALIZER, SPC_LABEL, selector};

/// Move claim `name`'s BDCs to the cluster label and finalizer.
///
/// Returns how many BDCs were rewritten.
pub async fn relabel_claims<C: ClusterApi>(cluster: &C, namespace: &str, name: &str) -> Result<usize> {
    let bdcs = cluster
        .list::<BlockDeviceClaim>(namespace, &selector(SPC_LABEL, name))
        .await?;

    let mut updated = 0;
    for bdc in bdcs {
        let bdc_name = bdc.name_any();
        info!("Updating bdc {} with cspc labels & finalizer", bdc_name);
        let (_, written) = update_with_retry(cluster, namespace, bdc, |bdc| relabel(bdc, name))
            .await
            .with_context(|| format!("failed to update bdc {bdc_name} with cspc label & finalizer"))?;
        updated += usize::from(written);
    }
    Ok(updated)
}

fn relabel(bdc: &mut BlockDeviceClaim, cspc_name: &str) -> bool {
    if bdc.labels_mut().remove(SPC_LABEL).is_none() {
        return false;
    }
    bdc.labels_mut()
        .insert(CSPC_LABEL.to_string(), cspc_name.to_string());
    for finalizer in bdc.finalizers_mut() {
        if finalizer == SPC_FINALIZER {
            *finalizer = CSPC_FINALIZER.to_string();
        }
    }
    true
}

/// Point the first owner reference of every cluster BDC at `cspc`.
pub async fn rewrite_owner_refs<C: ClusterApi>(
    cluster: &C,
    namespace: &str,
    cspc: &CStorPoolCluster,
) -> Result<usize> {
    let owner = owner_reference(cspc)?;
    let bdcs = cluster
        .list::<BlockDeviceClaim>(namespace, &selector(CSPC_LABEL, &cspc.name_any()))
        .await?;

    let mut updated = 0;
    for bdc in bdcs {
        if is_owned_by(&bdc, &owner) {
            continue;
        }
        let bdc_name = bdc.name_any();
        info!("Updating bdc {} with cspc ownerRef", bdc_name);
        let (_, written) = update_with_retry(cluster, namespace, bdc, |bdc| set_owner(bdc, &owner))
            .await
            .with_context(|| format!("failed to update bdc {bdc_name} with cspc ownerRef"))?;
        updated += usize::from(written);
    }
    Ok(updated)
}

fn owner_reference(cspc: &CStorPoolCluster) -> Result<OwnerReference, SmuError> {
    let uid = cspc
        .uid()
        .ok_or_else(|| SmuError::InvalidConfiguration(format!("cspc {} has no uid", cspc.name_any())))?;
    Ok(OwnerReference {
        api_version: CStorPoolCluster::api_version(&()).to_string(),
        kind: CStorPoolCluster::kind(&()).to_string(),
        name: cspc.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

fn is_owned_by(bdc: &BlockDeviceClaim, owner: &OwnerReference) -> bool {
    bdc.owner_references()
        .first()
        .is_some_and(|r| r.kind == owner.kind && r.api_version == owner.api_version && r.uid == owner.uid)
}

fn set_owner(bdc: &mut BlockDeviceClaim, owner: &OwnerReference) -> bool {
    if is_owned_by(bdc, owner) {
        return false;
    }
    let refs = bdc.owner_references_mut();
    match refs.first_mut() {
        Some(first) => {
            first.kind.clone_from(&owner.kind);
            first.api_version.clone_from(&owner.api_version);
            first.uid.clone_from(&owner.uid);
            first.name.clone_from(&owner.name);
        }
        None => refs.push(owner.clone()),
    }
    true
}
