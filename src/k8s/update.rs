//! Read-modify-write of object metadata with conflict retry.

use anyhow::Result;
use kube::ResourceExt;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{ClusterApi, ClusterObject};
use crate::error::is_conflict;
use crate::patch::create_merge_patch;

/// Attempts before a conflicting update gives up.
pub const MAX_CONFLICT_ATTEMPTS: u32 = 5;

/// Apply `mutate` to the metadata of `current` and write the difference.
///
/// Only `metadata` is sent, as a merge patch pinned to the object's
/// `resourceVersion`, so fields this crate does not model are never touched
/// and a concurrent writer still surfaces as a 409 Conflict. On conflict the
/// object is re-fetched and the mutation re-applied to the fresh copy.
///
/// `mutate` returns `false` when the object already has the desired shape.
/// The returned flag tells whether anything was written.
pub async fn update_with_retry<C, K, F>(
    cluster: &C,
    namespace: &str,
    mut current: K,
    mut mutate: F,
) -> Result<(K, bool)>
where
    C: ClusterApi + ?Sized,
    K: ClusterObject,
    F: FnMut(&mut K) -> bool + Send,
{
    let name = current.name_any();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let before = serde_json::to_value(current.meta())?;
        if !mutate(&mut current) {
            debug!("{} {} already up to date", K::kind_name(), name);
            return Ok((current, false));
        }
        let after = serde_json::to_value(current.meta())?;
        let Some(patch) = metadata_patch(&before, &after, current.resource_version()) else {
            debug!("{} {} metadata unchanged", K::kind_name(), name);
            return Ok((current, false));
        };

        match cluster.patch::<K>(namespace, &name, &patch).await {
            Ok(updated) => return Ok((updated, true)),
            Err(e) if is_conflict(&e) && attempt < MAX_CONFLICT_ATTEMPTS => {
                warn!(
                    "Conflict updating {} {} (attempt {}/{}), refetching",
                    K::kind_name(),
                    name,
                    attempt,
                    MAX_CONFLICT_ATTEMPTS
                );
                current = cluster.get_required::<K>(namespace, &name).await?;
            }
            Err(e) => return Err(e),
        }
    }
}

/// `{"metadata": <diff>}` carrying `resourceVersion` as a precondition.
fn metadata_patch(before: &Value, after: &Value, resource_version: Option<String>) -> Option<Value> {
    let mut diff = create_merge_patch(before, after)?;
    if let Some(version) = resource_version {
        diff["resourceVersion"] = json!(version);
    }
    Some(json!({ "metadata": diff }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BlockDeviceClaim, BlockDeviceClaimSpec};
    use crate::k8s::fake::FakeCluster;
    use std::collections::BTreeMap;

    fn bdc(name: &str) -> BlockDeviceClaim {
        let mut bdc = BlockDeviceClaim::new(name, BlockDeviceClaimSpec::default());
        bdc.metadata.labels = Some(BTreeMap::from([("a".to_string(), "1".to_string())]));
        bdc
    }

    #[tokio::test]
    async fn test_noop_mutation_writes_nothing() {
        let fake = FakeCluster::new();
        fake.insert("openebs", bdc("bdc-1"));
        let current = fake.object::<BlockDeviceClaim>("openebs", "bdc-1").unwrap();

        let (_, written) = update_with_retry(&fake, "openebs", current, |_| false)
            .await
            .unwrap();

        assert!(!written);
        assert!(fake.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_is_retried_on_fresh_copy() {
        let fake = FakeCluster::new();
        fake.insert("openebs", bdc("bdc-1"));
        fake.fail_next_update("BlockDeviceClaim", 2);
        let current = fake.object::<BlockDeviceClaim>("openebs", "bdc-1").unwrap();

        let mut calls = 0;
        let (updated, written) = update_with_retry(&fake, "openebs", current, |bdc| {
            calls += 1;
            bdc.labels_mut().insert("b".into(), "2".into());
            true
        })
        .await
        .unwrap();

        assert_eq!(calls, 3);
        assert!(written);
        assert_eq!(updated.labels().get("b").map(String::as_str), Some("2"));
        assert_eq!(fake.mutations(), ["patch BlockDeviceClaim/bdc-1"]);
    }

    #[tokio::test]
    async fn test_stale_copy_conflicts_then_converges() {
        let fake = FakeCluster::new();
        fake.insert("openebs", bdc("bdc-1"));
        let stale = fake.object::<BlockDeviceClaim>("openebs", "bdc-1").unwrap();
        update_with_retry(&fake, "openebs", stale.clone(), |bdc| {
            bdc.labels_mut().insert("c".into(), "3".into()).is_none()
        })
        .await
        .unwrap();

        let (updated, _) = update_with_retry(&fake, "openebs", stale, |bdc| {
            bdc.labels_mut().insert("b".into(), "2".into()).is_none()
        })
        .await
        .unwrap();

        assert_eq!(updated.labels().get("b").map(String::as_str), Some("2"));
        assert_eq!(updated.labels().get("c").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn test_only_metadata_is_written() {
        let fake = FakeCluster::new();
        fake.insert_value::<BlockDeviceClaim>(
            "openebs",
            json!({
                "apiVersion": "openebs.io/v1alpha1",
                "kind": "BlockDeviceClaim",
                "metadata": {"name": "bdc-1", "labels": {"a": "1"}},
                "spec": {"blockDeviceName": "bd-1", "deviceType": "sparse"},
                "status": {"phase": "Bound"}
            }),
        );
        let current = fake.object::<BlockDeviceClaim>("openebs", "bdc-1").unwrap();

        update_with_retry(&fake, "openebs", current, |bdc| {
            bdc.labels_mut().remove("a").is_some()
        })
        .await
        .unwrap();

        let stored = fake.value::<BlockDeviceClaim>("openebs", "bdc-1").unwrap();
        assert_eq!(stored["spec"]["deviceType"], "sparse");
        assert_eq!(stored["status"]["phase"], "Bound");
        assert!(stored["metadata"]["labels"].get("a").is_none());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let fake = FakeCluster::new();
        fake.insert("openebs", bdc("bdc-1"));
        fake.fail_next_update("BlockDeviceClaim", 10);
        let current = fake.object::<BlockDeviceClaim>("openebs", "bdc-1").unwrap();

        let err = update_with_retry(&fake, "openebs", current, |bdc| {
            bdc.labels_mut().insert("b".into(), "2".into());
            true
        })
        .await
        .unwrap_err();

        assert!(is_conflict(&err));
        assert!(fake.mutations().is_empty());
    }
}
