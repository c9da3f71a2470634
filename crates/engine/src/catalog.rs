//! Deletable resource types from discovery, minus deprecated aliases.

use std::collections::BTreeMap;
use std::sync::Arc;

use janitor_core::{ApiResourceEntry, ClientError, ClusterClient, ResourceType};
use tracing::debug;

/// A deprecated `(group, plural)` dropped whenever its successor is also served.
#[derive(Debug, Clone, Copy)]
pub struct Deprecation {
    pub group: &'static str,
    pub plural: &'static str,
    pub successor_group: &'static str,
    pub successor_plural: &'static str,
}

pub const DEPRECATIONS: &[Deprecation] = &[Deprecation {
    group: "",
    plural: "endpoints",
    successor_group: "discovery.k8s.io",
    successor_plural: "endpointslices",
}];

const DELETE_VERB: &str = "delete";

/// Discover deletable types, sorted by `group/version/plural`.
pub async fn discover(client: &dyn ClusterClient) -> Result<Vec<Arc<ResourceType>>, ClientError> {
    let entries = client.server_resources().await?;
    let types = dedupe_deprecated(from_entries(entries), DEPRECATIONS);
    debug!(count = types.len(), "resource types discovered");
    Ok(types.into_iter().map(Arc::new).collect())
}

/// Keep entries supporting `delete`, skip subresources, one entry per `group/version/plural`.
pub fn from_entries(entries: Vec<ApiResourceEntry>) -> Vec<ResourceType> {
    let mut by_key: BTreeMap<String, ResourceType> = BTreeMap::new();
    for e in entries {
        if e.name.contains('/') || !e.verbs.iter().any(|v| v == DELETE_VERB) {
            continue;
        }
        let rt = ResourceType::new(&e.group, &e.version, &e.kind, &e.name, e.namespaced);
        by_key.entry(rt.gvr_key()).or_insert(rt);
    }
    by_key.into_values().collect()
}

pub fn dedupe_deprecated(types: Vec<ResourceType>, table: &[Deprecation]) -> Vec<ResourceType> {
    let served = |group: &str, plural: &str| types.iter().any(|t| t.group == group && t.plural == plural);
    let dropped: Vec<&Deprecation> = table
        .iter()
        .filter(|d| served(d.group, d.plural) && served(d.successor_group, d.successor_plural))
        .collect();
    if dropped.is_empty() {
        return types;
    }
    types
        .into_iter()
        .filter(|t| {
            let drop = dropped.iter().any(|d| t.group == d.group && t.plural == d.plural);
            if drop {
                debug!(gvr = %t.gvr_key(), "dropping deprecated type in favour of its successor");
            }
            !drop
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(group: &str, version: &str, kind: &str, name: &str, verbs: &[&str]) -> ApiResourceEntry {
        ApiResourceEntry {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            name: name.into(),
            namespaced: true,
            verbs: verbs.iter().map(|v| v.to_string()).collect(),
        }
    }

    #[test]
    fn keeps_deletable_top_level_resources() {
        let types = from_entries(vec![
            entry("", "v1", "Pod", "pods", &["list", "delete"]),
            entry("", "v1", "Pod", "pods/log", &["get", "delete"]),
            entry("", "v1", "ComponentStatus", "componentstatuses", &["list"]),
            entry("apps", "v1", "Deployment", "deployments", &["delete"]),
            entry("apps", "v1", "Deployment", "deployments", &["delete"]),
        ]);
        let keys: Vec<_> = types.iter().map(ResourceType::gvr_key).collect();
        assert_eq!(keys, ["apps/v1/deployments", "v1/pods"]);
    }

    #[test]
    fn deprecated_endpoints_dropped_when_slices_served() {
        let types = from_entries(vec![
            entry("", "v1", "Endpoints", "endpoints", &["delete"]),
            entry("discovery.k8s.io", "v1", "EndpointSlice", "endpointslices", &["delete"]),
        ]);
        let types = dedupe_deprecated(types, DEPRECATIONS);
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].plural, "endpointslices");
    }

    #[test]
    fn deprecated_kept_without_successor() {
        let types = from_entries(vec![entry("", "v1", "Endpoints", "endpoints", &["delete"])]);
        assert_eq!(dedupe_deprecated(types, DEPRECATIONS).len(), 1);
    }
}
