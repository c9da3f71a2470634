//! kube-janitor core types: resources, type descriptors, lifecycle markers and decisions.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod cache;
pub mod client;
pub mod error;
pub mod ttl;

pub use cache::RunCache;
pub use client::{ApiResourceEntry, ClusterClient};
pub use error::{ClientError, FormatError, JanitorError};
pub use ttl::{format_duration, parse_expiry, parse_ttl, Ttl, TTL_FOREVER};

/// Relative time-to-live marker, e.g. `janitor/ttl: 7d`.
pub const TTL_ANNOTATION: &str = "janitor/ttl";
/// Absolute expiry marker, e.g. `janitor/expires: 2025-01-01`.
pub const EXPIRY_ANNOTATION: &str = "janitor/expires";
/// Written once a delete notification went out for the current expiry cycle.
pub const NOTIFIED_ANNOTATION: &str = "janitor/notified";
pub const NOTIFIED_VALUE: &str = "yes";

/// Reserved key under which context facts are exposed to predicates.
pub const CONTEXT_KEY: &str = "_context";

/// Derived facts about one object (`_context.<fact>` in predicates).
pub type Facts = serde_json::Map<String, Value>;

/// A deletable API type as advertised by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceType {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl ResourceType {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str, namespaced: bool) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced,
        }
    }

    /// The core `v1/Namespace` type; namespaces are always eligible for cleanup.
    pub fn namespaces() -> Self {
        Self::new("", "v1", "Namespace", "namespaces", false)
    }

    pub fn is_namespace(&self) -> bool {
        self.group.is_empty() && self.plural == "namespaces"
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// `v1/pods` or `apps/v1/deployments`.
    pub fn gvr_key(&self) -> String {
        format!("{}/{}", self.api_version(), self.plural)
    }
}

/// Run-wide identity of an object: `(kind, namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Handle to one listed cluster object.
///
/// `raw` is the full JSON document (with `kind`/`apiVersion` filled in from the
/// type descriptor) and is what predicates are evaluated against.
#[derive(Debug, Clone)]
pub struct Resource {
    pub resource_type: Arc<ResourceType>,
    pub namespace: Option<String>,
    pub name: String,
    pub uid: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub raw: Value,
}

impl Resource {
    /// Build a resource from a listed JSON object of the given type.
    pub fn from_object(mut raw: Value, resource_type: Arc<ResourceType>) -> Result<Self, FormatError> {
        let obj = raw.as_object_mut().ok_or(FormatError::Object("a JSON object body"))?;
        obj.insert("kind".into(), Value::String(resource_type.kind.clone()));
        obj.insert("apiVersion".into(), Value::String(resource_type.api_version()));

        let meta = raw.get("metadata").ok_or(FormatError::Object("metadata"))?;
        let name = meta
            .get("name")
            .and_then(Value::as_str)
            .ok_or(FormatError::Object("metadata.name"))?
            .to_string();
        let namespace = meta
            .get("namespace")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let uid = meta.get("uid").and_then(Value::as_str).map(str::to_string);
        let created = meta
            .get("creationTimestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        let annotations = string_map(meta.get("annotations"));
        let labels = string_map(meta.get("labels"));

        Ok(Self { resource_type, namespace, name, uid, created, annotations, labels, raw })
    }

    pub fn kind(&self) -> &str {
        &self.resource_type.kind
    }

    /// Lower-cased kind plus `s`; used by rule gates and counter names.
    pub fn type_name(&self) -> String {
        format!("{}s", self.resource_type.kind.to_lowercase())
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey {
            kind: self.resource_type.kind.clone(),
            namespace: self.namespace.clone().unwrap_or_default(),
            name: self.name.clone(),
        }
    }

    /// `ns/name`, or just `name` for cluster-scoped objects.
    pub fn display_name(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    pub fn is_notified(&self) -> bool {
        self.annotations.contains_key(NOTIFIED_ANNOTATION)
    }

    /// Set an annotation locally, keeping `raw.metadata.annotations` in step.
    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.annotations.insert(key.to_string(), value.to_string());
        if let Some(meta) = self.raw.get_mut("metadata").and_then(Value::as_object_mut) {
            let annos = meta
                .entry("annotations")
                .or_insert_with(|| Value::Object(Default::default()));
            if !annos.is_object() {
                *annos = Value::Object(Default::default());
            }
            if let Some(map) = annos.as_object_mut() {
                map.insert(key.to_string(), Value::String(value.to_string()));
            }
        }
    }
}

fn string_map(v: Option<&Value>) -> BTreeMap<String, String> {
    v.and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Outcome of evaluating one object in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Alive,
    NotifyPending {
        reason: String,
        notify_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    Expired {
        reason: String,
        expires_at: DateTime<Utc>,
    },
}

impl Decision {
    fn severity(&self) -> u8 {
        match self {
            Decision::Alive => 0,
            Decision::NotifyPending { .. } => 1,
            Decision::Expired { .. } => 2,
        }
    }

    /// Keep the more severe of two branch outcomes; ties keep `self`.
    pub fn merge(self, other: Decision) -> Decision {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Decision::Expired { .. })
    }
}

pub mod prelude {
    pub use super::{
        ClientError, ClusterClient, Decision, Facts, FormatError, JanitorError, Resource, ResourceKey,
        ResourceType, RunCache, Ttl,
    };
}
