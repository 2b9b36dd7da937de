//! `BlockDeviceClaim` and `CStorVolumeReplica`: dependents rewritten in place.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `BlockDeviceClaim` spec: binds one block device to a pool owner.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "BlockDeviceClaim",
    plural = "blockdeviceclaims",
    shortname = "bdc",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceClaimSpec {
    #[serde(default)]
    pub block_device_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host_name: String,
}

/// `CStorVolumeReplica` spec: one replica of a volume on one pool.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "CStorVolumeReplica",
    plural = "cstorvolumereplicas",
    shortname = "cvr",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct CStorVolumeReplicaSpec {
    #[serde(rename = "targetIP", default, skip_serializing_if = "String::is_empty")]
    pub target_ip: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub capacity: String,
}
