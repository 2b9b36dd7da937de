//! OpenEBS custom resource types touched by the migration and upgrade.

pub mod block_device;
pub mod pool_cluster;
pub mod storage_pool;
pub mod upgrade_task;

// Spec and status types are mostly built by test fixtures.
#[allow(unused_imports)]
pub use block_device::{
    BlockDeviceClaim, BlockDeviceClaimSpec, CStorVolumeReplica, CStorVolumeReplicaSpec,
};
#[allow(unused_imports)]
pub use pool_cluster::{
    CSPI_PHASE_ONLINE, CStorPoolCluster, CStorPoolClusterSpec, CStorPoolInstance,
    CStorPoolInstanceSpec, CStorPoolInstanceStatus, PoolBlockDevice, PoolConfig, PoolSpec,
    RaidGroup,
};
#[allow(unused_imports)]
pub use storage_pool::{
    BlockDeviceAttributes, BlockDeviceGroup, CStorPool, CStorPoolSpec, CspBlockDevice,
    LegacyPoolAttributes, StoragePoolClaim, StoragePoolClaimSpec,
};
#[allow(unused_imports)]
pub use upgrade_task::{
    JivaVolumeRef, ResourceSpec, StepPhase, UpgradeDetailedStatus, UpgradePhase, UpgradeStep,
    UpgradeTask, UpgradeTaskSpec, UpgradeTaskStatus,
};
