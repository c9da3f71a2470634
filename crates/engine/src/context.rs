//! Context facts for predicates: built-in PVC usage analysis plus the configured hook.

use std::sync::Arc;

use anyhow::Context as _;
use janitor_core::{ClientError, ClusterClient, Facts, Resource, ResourceType, RunCache};
use k8s_openapi::api::core::v1::Volume;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::hooks::ContextHook;

pub const PVC_NOT_MOUNTED: &str = "pvc_is_not_mounted";
pub const PVC_NOT_REFERENCED: &str = "pvc_is_not_referenced";

const PVC_KIND: &str = "PersistentVolumeClaim";

/// Workloads whose pod template may reference a claim, with the JSON pointer to
/// the template's pod spec.
const TEMPLATE_WORKLOADS: &[(&str, &str, &str, &str, &str)] = &[
    ("apps", "v1", "Deployment", "deployments", "/spec/template/spec"),
    ("batch", "v1", "Job", "jobs", "/spec/template/spec"),
    ("batch", "v1", "CronJob", "cronjobs", "/spec/jobTemplate/spec/template/spec"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PvcFacts {
    pub not_mounted: bool,
    pub not_referenced: bool,
}

pub struct ContextProvider {
    client: Arc<dyn ClusterClient>,
    hook: Option<Arc<dyn ContextHook>>,
}

impl ContextProvider {
    pub fn new(client: Arc<dyn ClusterClient>, hook: Option<Arc<dyn ContextHook>>) -> Self {
        Self { client, hook }
    }

    pub fn hook_name(&self) -> Option<&'static str> {
        self.hook.as_ref().map(|h| h.name())
    }

    /// Built-in facts first, then hook facts (which may overwrite them).
    pub async fn get_context(&self, resource: &Resource, cache: &RunCache) -> Result<Facts, ClientError> {
        let mut facts = Facts::new();
        if resource.kind() == PVC_KIND {
            let pvc = self.pvc_facts(resource).await?;
            facts.insert(PVC_NOT_MOUNTED.into(), Value::Bool(pvc.not_mounted));
            facts.insert(PVC_NOT_REFERENCED.into(), Value::Bool(pvc.not_referenced));
        }
        if let Some(hook) = &self.hook {
            facts.extend(hook.facts(resource, cache));
        }
        Ok(facts)
    }

    /// Like [`get_context`](Self::get_context) but degrades to no facts on failure.
    pub async fn context_or_empty(&self, resource: &Resource, cache: &RunCache) -> Facts {
        match self.get_context(resource, cache).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!(kind = %resource.kind(), name = %resource.display_name(), error = %e, "context unavailable, evaluating rules without it");
                Facts::new()
            }
        }
    }

    /// Scan the claim's namespace for pods mounting it and workloads that own or reference it.
    pub async fn pvc_facts(&self, pvc: &Resource) -> Result<PvcFacts, ClientError> {
        let ns = pvc.namespace.as_deref();
        let claim = pvc.name.as_str();

        let pods_type = Arc::new(ResourceType::new("", "v1", "Pod", "pods", true));
        let pods = self.client.list(&pods_type, ns).await?;
        let mut mounted_by = None;
        for pod in &pods {
            if references_claim(pod, "/spec", claim)? {
                debug!(pvc = %pvc.display_name(), pod = %pod.name, "claim is mounted");
                mounted_by = Some(pod);
                break;
            }
        }

        let sts_type = Arc::new(ResourceType::new("apps", "v1", "StatefulSet", "statefulsets", true));
        let statefulsets = self.client.list(&sts_type, ns).await?;
        let mut referenced = match statefulsets.iter().find(|s| statefulset_generates(s, claim)) {
            Some(sts) => {
                debug!(pvc = %pvc.display_name(), statefulset = %sts.name, "claim is generated by statefulset");
                true
            }
            None => false,
        };

        for (group, version, kind, plural, pointer) in TEMPLATE_WORKLOADS {
            if referenced {
                break;
            }
            let rt = Arc::new(ResourceType::new(group, version, kind, plural, true));
            let workloads = self.client.list(&rt, ns).await?;
            for w in &workloads {
                if references_claim(w, pointer, claim)? {
                    debug!(pvc = %pvc.display_name(), kind = %kind, owner = %w.name, "claim is referenced");
                    referenced = true;
                    break;
                }
            }
        }

        Ok(PvcFacts { not_mounted: mounted_by.is_none(), not_referenced: !referenced })
    }
}

/// Whether the pod spec at `pointer` inside `owner` has a volume backed by `claim`.
/// Undecodable volumes fail the analysis rather than reading as "no claims".
fn references_claim(owner: &Resource, pointer: &str, claim: &str) -> Result<bool, ClientError> {
    let claims = pod_spec_claims(owner.raw.pointer(pointer))
        .with_context(|| format!("decoding volumes of {} {}", owner.kind(), owner.display_name()))?;
    Ok(claims.iter().any(|c| c == claim))
}

/// Claim names referenced by `volumes` of a pod spec.
fn pod_spec_claims(spec: Option<&Value>) -> Result<Vec<String>, serde_json::Error> {
    let Some(volumes) = spec.and_then(|s| s.get("volumes")).filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    Ok(Vec::<Volume>::deserialize(volumes)?
        .into_iter()
        .filter_map(|vol| vol.persistent_volume_claim.map(|c| c.claim_name))
        .collect())
}

/// True if one of the statefulset's claim templates yields `<template>-<sts>-<ordinal>` == `claim`.
fn statefulset_generates(sts: &Resource, claim: &str) -> bool {
    let Some(templates) = sts.raw.pointer("/spec/volumeClaimTemplates").and_then(Value::as_array) else {
        return false;
    };
    templates
        .iter()
        .filter_map(|t| t.pointer("/metadata/name").and_then(Value::as_str))
        .any(|tpl| {
            claim
                .strip_prefix(&format!("{tpl}-{}-", sts.name))
                .is_some_and(|ordinal| !ordinal.is_empty() && ordinal.bytes().all(|b| b.is_ascii_digit()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sts(name: &str, templates: &[&str]) -> Resource {
        let tpls: Vec<_> = templates.iter().map(|t| json!({"metadata": {"name": t}})).collect();
        let raw = json!({"metadata": {"name": name, "namespace": "ns"}, "spec": {"volumeClaimTemplates": tpls}});
        Resource::from_object(raw, Arc::new(ResourceType::new("apps", "v1", "StatefulSet", "statefulsets", true))).unwrap()
    }

    #[test]
    fn statefulset_claim_pattern() {
        let s = sts("db", &["data"]);
        assert!(statefulset_generates(&s, "data-db-0"));
        assert!(statefulset_generates(&s, "data-db-12"));
        assert!(!statefulset_generates(&s, "data-db-"));
        assert!(!statefulset_generates(&s, "data-db-x"));
        assert!(!statefulset_generates(&s, "logs-db-0"));
        assert!(!statefulset_generates(&s, "data-dbx-0"));
    }

    #[test]
    fn pod_spec_claims_reads_pvc_volumes_only() {
        let spec = json!({"volumes": [
            {"name": "a", "persistentVolumeClaim": {"claimName": "claim-a"}},
            {"name": "b", "emptyDir": {}},
        ]});
        assert_eq!(pod_spec_claims(Some(&spec)).unwrap(), ["claim-a"]);
        assert!(pod_spec_claims(None).unwrap().is_empty());
        assert!(pod_spec_claims(Some(&json!({"volumes": null}))).unwrap().is_empty());
        assert!(pod_spec_claims(Some(&json!({"volumes": "bogus"}))).is_err());
    }
}
