//! In-memory [`ClusterApi`] for tests.
//!
//! Objects are stored as JSON. Reactors stand in for the controllers that
//! would otherwise move status along (pool pods scaling down, CSPIs going
//! ONLINE) and run on every read of their kind.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use serde_json::{Value, json};

use super::{ClusterApi, ClusterObject, EventKind};
use crate::error::SmuError;
use crate::patch::apply_merge_patch;

type Key = (String, String, String);
type Reactor = Box<dyn Fn(&mut Value) + Send + Sync>;

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    next_uid: u64,
    mutations: Vec<String>,
    update_conflicts: HashMap<String, u32>,
    reactors: HashMap<String, Vec<Reactor>>,
    events: Vec<(EventKind, String, String)>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

fn key<K: ClusterObject>(namespace: &str, name: &str) -> Key {
    let ns = if K::NAMESPACED { namespace } else { "" };
    (K::kind_name(), ns.to_string(), name.to_string())
}

fn matches_selector(obj: &Value, selector: &str) -> bool {
    let labels = &obj["metadata"]["labels"];
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).and_then(Value::as_str) == Some(v),
            None => labels.get(term).is_some(),
        })
}

fn decode<K: ClusterObject>(value: &Value) -> Result<K> {
    Ok(serde_json::from_value(value.clone())?)
}

fn bump_version(obj: &mut Value) {
    let next = obj["metadata"]["resourceVersion"]
        .as_str()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    obj["metadata"]["resourceVersion"] = json!(next.to_string());
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object without recording a mutation.
    pub fn insert<K: ClusterObject>(&self, namespace: &str, obj: K) {
        self.insert_value::<K>(namespace, serde_json::to_value(&obj).unwrap());
    }

    /// Seed raw JSON as an object of kind `K`, keeping fields `K` does not model.
    pub fn insert_value<K: ClusterObject>(&self, namespace: &str, mut value: Value) {
        let mut state = self.state.lock().unwrap();
        let name = value["metadata"]["name"].as_str().unwrap().to_string();
        Self::stamp(&mut state, &mut value, namespace, K::NAMESPACED);
        state.objects.insert(key::<K>(namespace, &name), value);
    }

    /// Stored JSON, including fields `K` does not model.
    pub fn value<K: ClusterObject>(&self, namespace: &str, name: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state.objects.get(&key::<K>(namespace, name)).cloned()
    }

    /// Current stored copy, reactors not applied.
    pub fn object<K: ClusterObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&key::<K>(namespace, name))
            .map(|v| decode(v).unwrap())
    }

    /// Writes performed through the API, as `"<verb> <Kind>/<name>"`.
    pub fn mutations(&self) -> Vec<String> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn events(&self) -> Vec<(EventKind, String, String)> {
        self.state.lock().unwrap().events.clone()
    }

    /// Make the next `times` patches of `kind` fail with a conflict.
    pub fn fail_next_update(&self, kind: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .update_conflicts
            .insert(kind.to_string(), times);
    }

    /// Run `reactor` on every stored object of `kind` before each read.
    pub fn react(&self, kind: &str, reactor: impl Fn(&mut Value) + Send + Sync + 'static) {
        self.state
            .lock()
            .unwrap()
            .reactors
            .entry(kind.to_string())
            .or_default()
            .push(Box::new(reactor));
    }

    fn stamp(state: &mut State, value: &mut Value, namespace: &str, namespaced: bool) {
        if namespaced {
            value["metadata"]["namespace"] = json!(namespace);
        }
        if value["metadata"]["uid"].is_null() {
            state.next_uid += 1;
            value["metadata"]["uid"] = json!(format!("uid-{}", state.next_uid));
        }
        if value["metadata"]["resourceVersion"].is_null() {
            value["metadata"]["resourceVersion"] = json!("1");
        }
    }

    fn react_all(state: &mut State, kind: &str) {
        let State {
            objects, reactors, ..
        } = state;
        let Some(reactors) = reactors.get(kind) else {
            return;
        };
        for ((k, _, _), value) in objects.iter_mut() {
            if k == kind {
                for reactor in reactors {
                    reactor(value);
                }
            }
        }
    }

    fn record(state: &mut State, verb: &str, kind: &str, name: &str) {
        state.mutations.push(format!("{verb} {kind}/{name}"));
    }

}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let mut state = self.state.lock().unwrap();
        Self::react_all(&mut state, &K::kind_name());
        state
            .objects
            .get(&key::<K>(namespace, name))
            .map(decode::<K>)
            .transpose()
    }

    async fn list<K: ClusterObject>(&self, namespace: &str, selector: &str) -> Result<Vec<K>> {
        let kind = K::kind_name();
        let ns = if K::NAMESPACED { namespace } else { "" };
        let mut state = self.state.lock().unwrap();
        Self::react_all(&mut state, &kind);
        state
            .objects
            .iter()
            .filter(|((k, n, _), v)| *k == kind && n == ns && matches_selector(v, selector))
            .map(|(_, v)| decode(v))
            .collect()
    }

    async fn create<K: ClusterObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let mut state = self.state.lock().unwrap();
        let mut value = serde_json::to_value(obj)?;
        let name = value["metadata"]["name"].as_str().unwrap_or_default().to_string();
        let k = key::<K>(namespace, &name);
        if state.objects.contains_key(&k) {
            return Err(SmuError::Conflict(
                format!("{}::create", K::kind_name()),
                format!("{name} already exists"),
            )
            .into());
        }
        value["metadata"]["uid"] = Value::Null;
        value["metadata"]["resourceVersion"] = Value::Null;
        Self::stamp(&mut state, &mut value, namespace, K::NAMESPACED);
        let out = decode(&value)?;
        state.objects.insert(k, value);
        Self::record(&mut state, "create", &K::kind_name(), &name);
        Ok(out)
    }

    async fn delete<K: ClusterObject>(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.objects.remove(&key::<K>(namespace, name)).is_some() {
            Self::record(&mut state, "delete", &K::kind_name(), name);
        }
        Ok(())
    }

    async fn patch<K: ClusterObject>(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<K> {
        let kind = K::kind_name();
        let mut state = self.state.lock().unwrap();

        if let Some(left) = state.update_conflicts.get_mut(&kind)
            && *left > 0
        {
            *left -= 1;
            return Err(SmuError::Conflict(format!("{kind}::patch"), name.to_string()).into());
        }

        let Some(stored) = state.objects.get_mut(&key::<K>(namespace, name)) else {
            return Err(SmuError::NotFound(format!("{kind} {name}")).into());
        };
        let precondition = &patch["metadata"]["resourceVersion"];
        if !precondition.is_null() && *precondition != stored["metadata"]["resourceVersion"] {
            return Err(SmuError::Conflict(format!("{kind}::patch"), name.to_string()).into());
        }
        apply_merge_patch(stored, patch);
        bump_version(stored);
        let out = decode(stored)?;
        Self::record(&mut state, "patch", &kind, name);
        Ok(out)
    }

    async fn publish_event(
        &self,
        _regarding: &ObjectReference,
        kind: EventKind,
        reason: &str,
        note: &str,
    ) {
        self.state
            .lock()
            .unwrap()
            .events
            .push((kind, reason.to_string(), note.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{StoragePoolClaim, StoragePoolClaimSpec};

    #[test]
    fn test_selector_matching() {
        let obj = json!({"metadata": {"labels": {"a": "1", "b": "2"}}});
        assert!(matches_selector(&obj, "a=1"));
        assert!(matches_selector(&obj, "a=1,b=2"));
        assert!(!matches_selector(&obj, "a=1,b=3"));
        assert!(matches_selector(&obj, ""));
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let fake = FakeCluster::new();
        fake.insert("", StoragePoolClaim::new("pool-a", StoragePoolClaimSpec::default()));

        let pinned = json!({"metadata": {"resourceVersion": "1", "labels": {"a": "1"}}});
        fake.patch::<StoragePoolClaim>("", "pool-a", &pinned).await.unwrap();

        let err = fake
            .patch::<StoragePoolClaim>("", "pool-a", &pinned)
            .await
            .unwrap_err();
        assert!(crate::error::is_conflict(&err));
        assert_eq!(fake.mutations(), ["patch StoragePoolClaim/pool-a"]);
    }
}
