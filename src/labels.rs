//! Label, annotation, and finalizer keys shared with the OpenEBS control plane.
//!
//! These must match the keys the pool and volume operators filter on exactly.

/// Label on CSPs and BDCs naming the owning `StoragePoolClaim`.
pub const SPC_LABEL: &str = "openebs.io/storage-pool-claim";

/// Label on CSPIs and BDCs naming the owning `CStorPoolCluster`.
pub const CSPC_LABEL: &str = "openebs.io/cstor-pool-cluster";

/// Node hostname label carried by CSPs and CSPIs.
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Label on the legacy pool deployment naming its CSP.
pub const CSP_DEPLOYMENT_LABEL: &str = "openebs.io/cstor-pool";

pub const CSP_NAME_LABEL: &str = "cstorpool.openebs.io/name";
pub const CSP_UID_LABEL: &str = "cstorpool.openebs.io/uid";
pub const CSP_HOSTNAME_ANNOTATION: &str = "cstorpool.openebs.io/hostname";
pub const CSPI_NAME_LABEL: &str = "cstorpoolinstance.openebs.io/name";
pub const CSPI_UID_LABEL: &str = "cstorpoolinstance.openebs.io/uid";
pub const CSPI_HOSTNAME_ANNOTATION: &str = "cstorpoolinstance.openebs.io/hostname";

pub const SPC_FINALIZER: &str = "storagepoolclaim.openebs.io/finalizer";
pub const CSPC_FINALIZER: &str = "cstorpoolcluster.openebs.io/finalizer";

/// Suppresses the CSPI's own reconcile loop until cleared.
pub const DISABLE_RECONCILE_ANNOTATION: &str = "reconcile.openebs.io/disable";

/// Keeps the CSPC from enabling the CSPIs it creates.
pub const DISABLE_DEPENDANTS_RECONCILE_ANNOTATION: &str = "reconcile.openebs.io/disable-dependants";

/// Tells the CSPI which legacy zpool to rename and import.
pub const OLD_POOL_NAME_ANNOTATION: &str = "reconcile.openebs.io/old-pool-name";

/// Version label shared by OpenEBS workloads.
pub const VERSION_LABEL: &str = "openebs.io/version";

pub const PV_LABEL: &str = "openebs.io/persistent-volume";
pub const JIVA_CONTROLLER_LABEL: &str = "openebs.io/controller=jiva-controller";
pub const JIVA_REPLICA_LABEL: &str = "openebs.io/replica=jiva-replica";
pub const JIVA_SERVICE_LABEL: &str = "openebs.io/controller-service=jiva-controller-svc";

/// Label selecting the pods of an OpenEBS component, e.g. the jiva operator.
pub const COMPONENT_NAME_LABEL: &str = "openebs.io/component-name";

/// Compose a `key=value` equality selector.
pub fn selector(key: &str, value: &str) -> String {
    format!("{key}={value}")
}

/// Join several equality selectors with commas.
pub fn all_of(selectors: &[&str]) -> String {
    selectors.join(",")
}
