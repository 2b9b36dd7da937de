//! Cluster-scoped pool model: `CStorPoolCluster` and `CStorPoolInstance`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Phase a CSPI reports once its zpool is imported and healthy.
pub const CSPI_PHASE_ONLINE: &str = "ONLINE";

/// `CStorPoolCluster` spec: explicit per-node pool layout.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "cstor.openebs.io",
    version = "v1",
    kind = "CStorPoolCluster",
    plural = "cstorpoolclusters",
    shortname = "cspc",
    namespaced,
    status = "CStorPoolClusterStatus",
    printcolumn = r#"{"name":"HEALTHY","type":"integer","jsonPath":".status.healthyInstances"}"#,
    printcolumn = r#"{"name":"PROVISIONED","type":"integer","jsonPath":".status.provisionedInstances"}"#,
    printcolumn = r#"{"name":"DESIRED","type":"integer","jsonPath":".status.desiredInstances"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolClusterSpec {
    #[serde(default)]
    pub pools: Vec<PoolSpec>,
}

/// Layout of one pool instance.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolSpec {
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default)]
    pub data_raid_groups: Vec<RaidGroup>,

    #[serde(default)]
    pub pool_config: PoolConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RaidGroup {
    #[serde(default)]
    pub block_devices: Vec<PoolBlockDevice>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolBlockDevice {
    pub block_device_name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// `stripe`, `mirror`, `raidz` or `raidz2`.
    #[serde(default)]
    pub data_raid_group_type: String,

    #[serde(default)]
    pub thick_provision: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compression: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolClusterStatus {
    #[serde(default)]
    pub provisioned_instances: i32,
    #[serde(default)]
    pub desired_instances: i32,
    #[serde(default)]
    pub healthy_instances: i32,
}

/// `CStorPoolInstance` spec: one pool on one node, owned by a CSPC.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "cstor.openebs.io",
    version = "v1",
    kind = "CStorPoolInstance",
    plural = "cstorpoolinstances",
    shortname = "cspi",
    namespaced,
    status = "CStorPoolInstanceStatus",
    printcolumn = r#"{"name":"HOSTNAME","type":"string","jsonPath":".spec.hostName"}"#,
    printcolumn = r#"{"name":"STATUS","type":"string","jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolInstanceSpec {
    #[serde(default)]
    pub host_name: String,

    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default)]
    pub pool_config: PoolConfig,

    #[serde(default)]
    pub data_raid_groups: Vec<RaidGroup>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CStorPoolInstanceStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,
}

impl CStorPoolInstance {
    /// Current phase, empty when the instance has not reported one yet.
    pub fn phase(&self) -> &str {
        self.status.as_ref().map_or("", |s| s.phase.as_str())
    }

    pub fn is_online(&self) -> bool {
        self.phase() == CSPI_PHASE_ONLINE
    }
}
