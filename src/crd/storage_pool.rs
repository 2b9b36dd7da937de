//! Legacy claim-scoped pool types: `StoragePoolClaim` and `CStorPool`.
//!
//! Both are cluster-scoped and only read by the migration, except for the
//! final delete of the claim.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `StoragePoolClaim` spec: a request for a set of per-node cStor pools.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "StoragePoolClaim",
    plural = "storagepoolclaims",
    shortname = "spc"
)]
#[serde(rename_all = "camelCase")]
pub struct StoragePoolClaimSpec {
    /// Device type backing the pools (`disk` or `sparse`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub r#type: String,

    /// Number of pools to provision when no explicit device list is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pools: Option<i32>,

    #[serde(default)]
    pub pool_spec: LegacyPoolAttributes,

    #[serde(default)]
    pub block_devices: BlockDeviceAttributes,
}

/// Pool attributes shared by `StoragePoolClaim` and `CStorPool`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LegacyPoolAttributes {
    /// `striped`, `mirrored`, `raidz` or `raidz2`.
    #[serde(default)]
    pub pool_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cache_file: String,

    #[serde(default)]
    pub over_provisioning: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compression: String,
}

/// Explicit block device selection of a claim.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceAttributes {
    /// `None` means the claim is sized by `maxPools` instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_device_list: Option<Vec<String>>,
}

/// `CStorPool` spec: one physical pool on one node, owned by a claim.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "CStorPool",
    plural = "cstorpools",
    shortname = "csp",
    status = "CStorPoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolSpec {
    #[serde(default)]
    pub group: Vec<BlockDeviceGroup>,

    #[serde(default)]
    pub pool_spec: LegacyPoolAttributes,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceGroup {
    #[serde(default)]
    pub item: Vec<CspBlockDevice>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CspBlockDevice {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_id: String,

    #[serde(default)]
    pub in_use_by_pool: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,
}

impl CStorPool {
    /// Names of all block devices across the pool's device groups.
    pub fn block_device_names(&self) -> impl Iterator<Item = &str> {
        self.spec
            .group
            .iter()
            .flat_map(|g| g.item.iter())
            .map(|bd| bd.name.as_str())
    }
}
