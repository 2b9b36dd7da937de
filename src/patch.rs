//! JSON Merge Patch (RFC 7396) generation and application.
//!
//! Upgrades compute the desired object from the current one and send only the
//! difference. Arrays are replaced wholesale, which is what merge patch does
//! for container lists anyway.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// Compute the merge patch that turns `current` into `desired`.
///
/// Returns `None` when the two serialize identically.
pub fn diff<T: Serialize>(current: &T, desired: &T) -> Result<Option<Value>> {
    let current = serde_json::to_value(current).context("failed to serialize current object")?;
    let desired = serde_json::to_value(desired).context("failed to serialize desired object")?;
    Ok(create_merge_patch(&current, &desired))
}

/// Compute a merge patch between two JSON documents.
pub fn create_merge_patch(current: &Value, desired: &Value) -> Option<Value> {
    match (current, desired) {
        (Value::Object(cur), Value::Object(des)) => {
            let mut patch = Map::new();
            for (key, des_value) in des {
                match cur.get(key) {
                    Some(cur_value) => {
                        if let Some(p) = create_merge_patch(cur_value, des_value) {
                            patch.insert(key.clone(), p);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), des_value.clone());
                    }
                }
            }
            for key in cur.keys() {
                if !des.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        (cur, des) if cur == des => None,
        (_, des) => Some(des.clone()),
    }
}

/// Apply a merge patch in place. `null` removes a key.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_obj) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_obj) = target {
        for (key, value) in patch_obj {
            if value.is_null() {
                target_obj.remove(key);
            } else {
                let entry = target_obj.entry(key.clone()).or_insert(Value::Null);
                apply_merge_patch(entry, value);
            }
        }
    }
}

/// Merge patch that scales a workload to zero replicas.
pub fn scale_to_zero() -> Value {
    serde_json::json!({ "spec": { "replicas": 0 } })
}
