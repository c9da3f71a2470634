//! kube-rs backed cluster transport: discovery, dynamic listing, background delete,
//! lifecycle events and annotation patches.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use chrono::Utc;
use janitor_core::{ApiResourceEntry, ClientError, ClusterClient, Resource, ResourceType};
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::histogram;
use tracing::{debug, info, warn};

/// Event source component and generated-name prefix.
pub const EVENT_COMPONENT: &str = "kube-janitor";
/// Events for cluster-scoped objects are recorded here.
pub const CLUSTER_EVENT_NAMESPACE: &str = "default";

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// In-cluster config first, then `KUBECONFIG` / `~/.kube/config`.
    pub async fn try_default() -> anyhow::Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        info!("kube client ready");
        Ok(Self::new(client))
    }

    fn dynamic_api(&self, resource_type: &ResourceType, namespace: Option<&str>) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk(&resource_type.group, &resource_type.version, &resource_type.kind);
        let ar = ApiResource::from_gvk_with_plural(&gvk, &resource_type.plural);
        match namespace {
            Some(ns) if resource_type.namespaced => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn resource_api(&self, resource: &Resource) -> Api<DynamicObject> {
        self.dynamic_api(&resource.resource_type, resource.namespace.as_deref())
    }
}

/// Map a kube error to `NotFound` on 404, otherwise a transport error with context.
fn classify(err: kube::Error, what: String) -> ClientError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => ClientError::NotFound(what),
        other => ClientError::Transport(anyhow::Error::new(other).context(what)),
    }
}

#[async_trait::async_trait]
impl ClusterClient for KubeCluster {
    async fn server_resources(&self) -> Result<Vec<ApiResourceEntry>, ClientError> {
        let t0 = Instant::now();
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| classify(e, "running API discovery".into()))?;
        let mut out = Vec::new();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                out.push(ApiResourceEntry {
                    group: ar.group.clone(),
                    version: ar.version.clone(),
                    kind: ar.kind.clone(),
                    name: ar.plural.clone(),
                    namespaced: matches!(caps.scope, Scope::Namespaced),
                    verbs: caps.operations.clone(),
                });
            }
        }
        histogram!("janitor_discovery_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(count = out.len(), "discovered api resources");
        Ok(out)
    }

    async fn list(
        &self,
        resource_type: &Arc<ResourceType>,
        namespace: Option<&str>,
    ) -> Result<Vec<Resource>, ClientError> {
        let t0 = Instant::now();
        let api = self.dynamic_api(resource_type, namespace);
        let what = format!("listing {} in {}", resource_type.gvr_key(), namespace.unwrap_or("all namespaces"));
        let list = api.list(&ListParams::default()).await.map_err(|e| classify(e, what))?;
        let mut out = Vec::with_capacity(list.items.len());
        for obj in list.items {
            let raw = serde_json::to_value(&obj)
                .context("serializing DynamicObject")
                .map_err(ClientError::Transport)?;
            match Resource::from_object(raw, Arc::clone(resource_type)) {
                Ok(r) => out.push(r),
                Err(e) => warn!(gvr = %resource_type.gvr_key(), error = %e, "skipping malformed object"),
            }
        }
        histogram!("janitor_list_ms", t0.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    async fn delete(&self, resource: &Resource) -> Result<(), ClientError> {
        let api = self.resource_api(resource);
        let what = format!("deleting {} {}", resource.kind(), resource.display_name());
        api.delete(&resource.name, &DeleteParams::background())
            .await
            .map_err(|e| classify(e, what))?;
        Ok(())
    }

    async fn create_event(&self, resource: &Resource, reason: &str, message: &str) -> Result<(), ClientError> {
        let namespace = resource.namespace.as_deref().unwrap_or(CLUSTER_EVENT_NAMESPACE);
        let now = Time(Utc::now());
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{EVENT_COMPONENT}-")),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                api_version: Some(resource.resource_type.api_version()),
                kind: Some(resource.kind().to_string()),
                name: Some(resource.name.clone()),
                namespace: resource.namespace.clone(),
                uid: resource.uid.clone(),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            count: Some(1),
            type_: Some("Normal".to_string()),
            source: Some(EventSource { component: Some(EVENT_COMPONENT.to_string()), host: None }),
            ..Default::default()
        };
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let what = format!("creating {reason} event for {}", resource.display_name());
        api.create(&PostParams::default(), &event)
            .await
            .map_err(|e| classify(e, what))?;
        Ok(())
    }

    async fn annotate(&self, resource: &Resource, key: &str, value: &str) -> Result<(), ClientError> {
        if resource.name.is_empty() {
            return Err(ClientError::Transport(anyhow!("cannot annotate an unnamed object")));
        }
        let api = self.resource_api(resource);
        let patch = serde_json::json!({"metadata": {"annotations": {key: value}}});
        let what = format!("annotating {} {}", resource.kind(), resource.display_name());
        api.patch(&resource.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(e, what))?;
        Ok(())
    }
}
