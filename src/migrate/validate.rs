//! Pre-migration checks on a `StoragePoolClaim`.

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::crd::{CStorPool, StoragePoolClaim};
use crate::error::SmuError;

/// Decide whether `spc` may be migrated given the pools it owns.
///
/// A claim with an explicit device list must name every device exactly once,
/// and every device must also appear exactly once across its pools. A claim
/// sized by `maxPools` must own exactly that many pools.
pub fn validate_spc(spc: &StoragePoolClaim, csps: &[CStorPool]) -> Result<(), SmuError> {
    let name = spc.name_any();

    let Some(device_list) = spc.spec.block_devices.block_device_list.as_ref() else {
        let Some(max_pools) = spc.spec.max_pools else {
            return Err(SmuError::InvalidConfiguration(format!(
                "spc {name} has neither a block device list nor maxPools"
            )));
        };
        if usize::try_from(max_pools).ok() != Some(csps.len()) {
            return Err(SmuError::InvalidConfiguration(format!(
                "maxPools count does not match csp count for spc {name}, expected: {max_pools} got: {}",
                csps.len()
            )));
        }
        return Ok(());
    };

    let mut references: BTreeMap<&str, usize> = BTreeMap::new();
    for bd in device_list {
        *references.entry(bd.as_str()).or_default() += 1;
    }
    for bd in csps.iter().flat_map(CStorPool::block_device_names) {
        *references.entry(bd).or_default() += 1;
    }

    if let Some((bd, count)) = references.iter().find(|(_, count)| **count != 2) {
        return Err(SmuError::InvalidConfiguration(format!(
            "block device {bd} of spc {name} is not configured properly: {count} references, expected 2"
        )));
    }
    Ok(())
}
