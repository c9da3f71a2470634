//! In-memory cluster and notifier that record every call; used by tests and dry demos.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use janitor_core::{ApiResourceEntry, ClientError, ClusterClient, Resource, ResourceKey, ResourceType};
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::notify::Notifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub key: ResourceKey,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct State {
    entries: Vec<ApiResourceEntry>,
    types: BTreeMap<String, Arc<ResourceType>>,
    objects: BTreeMap<String, Vec<Value>>,
    failing_lists: FxHashSet<(String, Option<String>)>,
    failing_events: FxHashSet<String>,
    list_calls: usize,
    deleted: Vec<ResourceKey>,
    events: Vec<RecordedEvent>,
    annotations: Vec<(ResourceKey, String, String)>,
}

#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<State>,
}

fn object_namespace(obj: &Value) -> Option<&str> {
    obj.pointer("/metadata/namespace").and_then(Value::as_str)
}

fn object_name(obj: &Value) -> Option<&str> {
    obj.pointer("/metadata/name").and_then(Value::as_str)
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Advertise a type in discovery with the given verbs.
    pub fn serve(&self, resource_type: &ResourceType, verbs: &[&str]) {
        let mut st = self.lock();
        st.entries.push(ApiResourceEntry {
            group: resource_type.group.clone(),
            version: resource_type.version.clone(),
            kind: resource_type.kind.clone(),
            name: resource_type.plural.clone(),
            namespaced: resource_type.namespaced,
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
        });
        st.types.insert(resource_type.gvr_key(), Arc::new(resource_type.clone()));
    }

    /// Store an object; the type is served with `list`/`delete` if it is not yet.
    pub fn insert(&self, resource_type: &ResourceType, object: Value) {
        let known = self.lock().types.contains_key(&resource_type.gvr_key());
        if !known {
            self.serve(resource_type, &["list", "delete"]);
        }
        self.lock().objects.entry(resource_type.gvr_key()).or_default().push(object);
    }

    /// Make every list of this type (in `namespace`, or cluster-wide for `None`) fail.
    pub fn fail_list(&self, resource_type: &ResourceType, namespace: Option<&str>) {
        self.lock()
            .failing_lists
            .insert((resource_type.gvr_key(), namespace.map(str::to_string)));
    }

    /// Make every event with this reason fail to be created.
    pub fn fail_events(&self, reason: &str) {
        self.lock().failing_events.insert(reason.to_string());
    }

    pub fn contains(&self, resource_type: &ResourceType, namespace: Option<&str>, name: &str) -> bool {
        self.lock().objects.get(&resource_type.gvr_key()).is_some_and(|objs| {
            objs.iter().any(|o| object_name(o) == Some(name) && object_namespace(o) == namespace)
        })
    }

    pub fn deleted(&self) -> Vec<ResourceKey> {
        self.lock().deleted.clone()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().events.clone()
    }

    pub fn annotations(&self) -> Vec<(ResourceKey, String, String)> {
        self.lock().annotations.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    /// Deletes, events and annotation patches issued so far.
    pub fn mutations(&self) -> usize {
        let st = self.lock();
        st.deleted.len() + st.events.len() + st.annotations.len()
    }
}

#[async_trait::async_trait]
impl ClusterClient for MemoryCluster {
    async fn server_resources(&self) -> Result<Vec<ApiResourceEntry>, ClientError> {
        Ok(self.lock().entries.clone())
    }

    async fn list(
        &self,
        resource_type: &Arc<ResourceType>,
        namespace: Option<&str>,
    ) -> Result<Vec<Resource>, ClientError> {
        let mut st = self.lock();
        st.list_calls += 1;
        let gvr = resource_type.gvr_key();
        if st.failing_lists.contains(&(gvr.clone(), namespace.map(str::to_string))) {
            return Err(ClientError::Transport(anyhow!("listing {gvr} failed")));
        }
        let objects = st.objects.get(&gvr).cloned().unwrap_or_default();
        drop(st);
        objects
            .into_iter()
            .filter(|o| match namespace {
                Some(ns) if resource_type.namespaced => object_namespace(o) == Some(ns),
                _ => true,
            })
            .map(|o| Resource::from_object(o, Arc::clone(resource_type)).map_err(|e| ClientError::Transport(e.into())))
            .collect()
    }

    async fn delete(&self, resource: &Resource) -> Result<(), ClientError> {
        let mut st = self.lock();
        let gvr = resource.resource_type.gvr_key();
        let ns = resource.namespace.as_deref();
        let objs = st.objects.entry(gvr).or_default();
        let before = objs.len();
        objs.retain(|o| !(object_name(o) == Some(resource.name.as_str()) && object_namespace(o) == ns));
        if objs.len() == before {
            return Err(ClientError::NotFound(resource.key().to_string()));
        }
        st.deleted.push(resource.key());
        Ok(())
    }

    async fn create_event(&self, resource: &Resource, reason: &str, message: &str) -> Result<(), ClientError> {
        let mut st = self.lock();
        if st.failing_events.contains(reason) {
            return Err(ClientError::Transport(anyhow!("event quota exceeded")));
        }
        st.events.push(RecordedEvent {
            key: resource.key(),
            reason: reason.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn annotate(&self, resource: &Resource, key: &str, value: &str) -> Result<(), ClientError> {
        let mut st = self.lock();
        let ns = resource.namespace.as_deref();
        let obj = st
            .objects
            .get_mut(&resource.resource_type.gvr_key())
            .and_then(|objs| {
                objs.iter_mut()
                    .find(|o| object_name(o) == Some(resource.name.as_str()) && object_namespace(o) == ns)
            })
            .ok_or_else(|| ClientError::NotFound(resource.key().to_string()))?;
        if let Some(meta) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
            let annos = meta.entry("annotations").or_insert_with(|| Value::Object(Default::default()));
            if let Some(map) = annos.as_object_mut() {
                map.insert(key.to_string(), Value::String(value.to_string()));
            }
        }
        st.annotations.push((resource.key(), key.to_string(), value.to_string()));
        Ok(())
    }
}

/// Collects notification messages; optionally fails every call after recording it.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self { fail: true, ..Default::default() }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> anyhow::Result<()> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).push(message.to_string());
        if self.fail {
            anyhow::bail!("webhook unreachable");
        }
        Ok(())
    }
}
