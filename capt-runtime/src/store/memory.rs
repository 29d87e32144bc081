use std::{collections::BTreeMap, sync::Arc};

use capt_core::labels::Selector;
use chrono::{SecondsFormat, Utc};
use kube::ResourceExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{object_key, Error, Object, Result, Store};

/// `(apiVersion, kind, namespace, name)`
type Key = (String, String, String, String);

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    revision: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

/// An in-process [`Store`]
///
/// Behaves like an API server as far as the reconcilers can tell: resource versions are
/// enforced on writes, deletion waits for finalizers, status lives apart from spec and
/// listing honours label selectors. Objects are kept in their serialized form, so any field
/// the typed view does not model survives a round trip.
///
/// Cloning produces a new handle to the same objects.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects of kind `K` across all namespaces
    pub fn count<K: Object>(&self) -> usize {
        let (api_version, kind) = (K::api_version(&()), K::kind(&()));
        self.state
            .lock()
            .objects
            .keys()
            .filter(|(v, k, _, _)| *v == api_version && *k == kind)
            .count()
    }
}

fn key<K: Object>(namespace: &str, name: &str) -> Key {
    (
        K::api_version(&()).into_owned(),
        K::kind(&()).into_owned(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn encode<K: Object>(obj: &K) -> Result<Value> {
    serde_json::to_value(obj).map_err(Error::Serialization)
}

fn decode<K: Object>(value: Value) -> Result<K> {
    serde_json::from_value(value).map_err(Error::Serialization)
}

fn metadata_mut(value: &mut Value) -> Result<&mut Map<String, Value>> {
    value
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
        .ok_or(Error::MissingField(".metadata"))
}

fn metadata_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get("metadata")?.get(field)?.as_str()
}

fn has_finalizers(value: &Value) -> bool {
    value
        .get("metadata")
        .and_then(|meta| meta.get("finalizers"))
        .and_then(Value::as_array)
        .is_some_and(|finalizers| !finalizers.is_empty())
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Refuse writes based on a stale read
fn check_version<K: Object>(stored: &Value, incoming: &Value, namespace: &str, name: &str) -> Result<()> {
    match metadata_str(incoming, "resourceVersion") {
        Some(version) if Some(version) != metadata_str(stored, "resourceVersion") => {
            Err(Error::conflict::<K>(namespace, name))
        }
        _ => Ok(()),
    }
}

/// Copy a server owned field from `from` onto `to`, removing it when `from` lacks it
fn carry_over(from: &Value, to: &mut Map<String, Value>, field: &str) {
    match from.get(field) {
        Some(value) => to.insert(field.to_string(), value.clone()),
        None => to.remove(field),
    };
}

impl Store for MemoryStore {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<K> {
        let value = self
            .state
            .lock()
            .objects
            .get(&key::<K>(namespace, name))
            .cloned()
            .ok_or_else(|| Error::not_found::<K>(namespace, name))?;
        decode(value)
    }

    async fn list<K: Object>(&self, namespace: Option<&str>, selector: &Selector) -> Result<Vec<K>> {
        let (api_version, kind) = (K::api_version(&()), K::kind(&()));
        let values: Vec<Value> = self
            .state
            .lock()
            .objects
            .iter()
            .filter(|((v, k, ns, _), _)| {
                *v == api_version && *k == kind && namespace.map_or(true, |namespace| ns == namespace)
            })
            .map(|(_, value)| value.clone())
            .collect();

        let mut matching = Vec::with_capacity(values.len());
        for value in values {
            let obj: K = decode(value)?;
            if selector.matches(obj.labels()) {
                matching.push(obj);
            }
        }
        Ok(matching)
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        let mut value = encode(obj)?;

        let mut state = self.state.lock();
        let key = key::<K>(namespace, name);
        if state.objects.contains_key(&key) {
            return Err(Error::already_exists::<K>(namespace, name));
        }
        let version = state.next_version();
        let meta = metadata_mut(&mut value)?;
        meta.insert("uid".into(), Value::String(Uuid::new_v4().to_string()));
        meta.insert("resourceVersion".into(), Value::String(version));
        meta.insert("creationTimestamp".into(), now());
        meta.remove("deletionTimestamp");
        state.objects.insert(key, value.clone());
        drop(state);

        decode(value)
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        let mut value = encode(obj)?;

        let mut state = self.state.lock();
        let key = key::<K>(namespace, name);
        let stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found::<K>(namespace, name))?;
        check_version::<K>(&stored, &value, namespace, name)?;

        let version = state.next_version();
        let stored_meta = stored.get("metadata").cloned().unwrap_or_default();
        let meta = metadata_mut(&mut value)?;
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            carry_over(&stored_meta, meta, field);
        }
        meta.insert("resourceVersion".into(), Value::String(version));
        if let Some(fields) = value.as_object_mut() {
            carry_over(&stored, fields, "status");
        }

        let deleting = metadata_str(&value, "deletionTimestamp").is_some();
        if deleting && !has_finalizers(&value) {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, value.clone());
        }
        drop(state);

        decode(value)
    }

    async fn replace_status<K: Object>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        let incoming = encode(obj)?;

        let mut state = self.state.lock();
        let key = key::<K>(namespace, name);
        let mut value = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found::<K>(namespace, name))?;
        check_version::<K>(&value, &incoming, namespace, name)?;

        let version = state.next_version();
        metadata_mut(&mut value)?.insert("resourceVersion".into(), Value::String(version));
        if let Some(fields) = value.as_object_mut() {
            carry_over(&incoming, fields, "status");
        }
        state.objects.insert(key, value.clone());
        drop(state);

        decode(value)
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let key = key::<K>(namespace, name);
        let mut value = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::not_found::<K>(namespace, name))?;
        if !has_finalizers(&value) {
            state.objects.remove(&key);
            return Ok(());
        }

        let version = state.next_version();
        let meta = metadata_mut(&mut value)?;
        if !meta.contains_key("deletionTimestamp") {
            meta.insert("deletionTimestamp".into(), now());
        }
        meta.insert("resourceVersion".into(), Value::String(version));
        state.objects.insert(key, value);
        Ok(())
    }
}
