//! Include/exclude filtering of resource types, namespaces and objects.

use janitor_core::{Resource, ResourceType};
use tracing::debug;

use crate::config::{JanitorConfig, ALL};

#[derive(Debug, Clone)]
pub struct ResourceFilter {
    include_resources: Vec<String>,
    exclude_resources: Vec<String>,
    include_namespaces: Vec<String>,
    exclude_namespaces: Vec<String>,
    include_cluster_resources: bool,
}

fn listed(list: &[String], value: &str) -> bool {
    list.iter().any(|v| v == value)
}

impl ResourceFilter {
    pub fn from_config(cfg: &JanitorConfig) -> Self {
        Self {
            include_resources: cfg.include_resources.clone(),
            exclude_resources: cfg.exclude_resources.clone(),
            include_namespaces: cfg.include_namespaces.clone(),
            exclude_namespaces: cfg.exclude_namespaces.clone(),
            include_cluster_resources: cfg.include_cluster_resources,
        }
    }

    /// Exclusion wins; otherwise the plural must be listed or `all` must be.
    pub fn includes_type(&self, plural: &str) -> bool {
        if listed(&self.exclude_resources, plural) {
            return false;
        }
        listed(&self.include_resources, ALL) || listed(&self.include_resources, plural)
    }

    pub fn includes_namespace(&self, namespace: &str) -> bool {
        if listed(&self.exclude_namespaces, namespace) {
            return false;
        }
        listed(&self.include_namespaces, ALL) || listed(&self.include_namespaces, namespace)
    }

    /// Whether objects of this type are listed at all in a run.
    pub fn lists_type(&self, resource_type: &ResourceType) -> bool {
        self.includes_type(&resource_type.plural) && (resource_type.namespaced || self.include_cluster_resources)
    }

    /// Per-object check: namespace objects are judged by their own name, other
    /// cluster-scoped objects need `include_cluster_resources`.
    pub fn admits(&self, resource: &Resource) -> bool {
        let rt = &resource.resource_type;
        if !self.includes_type(&rt.plural) {
            debug!(kind = %rt.kind, name = %resource.name, "type filtered out");
            return false;
        }
        let ok = match &resource.namespace {
            Some(ns) => self.includes_namespace(ns),
            None if rt.is_namespace() => self.includes_namespace(&resource.name),
            None => self.include_cluster_resources,
        };
        if !ok {
            debug!(kind = %rt.kind, name = %resource.display_name(), "namespace filtered out");
        }
        ok
    }
}
