//! kube-janitor engine: discovers resource types, lists objects and drives each
//! one through the lifecycle decision on a bounded worker pool.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use janitor_core::{ClusterClient, JanitorError, Resource, ResourceType};
use janitor_rules::RuleSet;
use metrics::histogram;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub mod catalog;
pub mod config;
pub mod context;
pub mod decision;
pub mod dispatch;
pub mod filter;
pub mod hooks;
pub mod memory;
pub mod notify;

pub use config::{split_list, JanitorConfig};
pub use context::ContextProvider;
pub use decision::LifecycleEngine;
pub use dispatch::{Counters, DedupSet, ResourceHandler, RunState, WorkerPool};
pub use filter::ResourceFilter;
pub use hooks::ContextHook;
pub use notify::{Notifier, WebhookNotifier};

/// Counters of one finished run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub counters: BTreeMap<String, u64>,
    /// The run stopped early because shutdown was requested.
    pub cancelled: bool,
}

impl RunSummary {
    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.counters.iter().map(|(k, v)| format!("{k}={v}")).collect();
        f.write_str(&parts.join(", "))
    }
}

pub struct Janitor {
    config: JanitorConfig,
    client: Arc<dyn ClusterClient>,
    engine: Arc<LifecycleEngine>,
}

impl Janitor {
    pub fn new(
        config: JanitorConfig,
        client: Arc<dyn ClusterClient>,
        rules: RuleSet,
        hook: Option<Arc<dyn ContextHook>>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, JanitorError> {
        config.validate()?;
        let engine = LifecycleEngine::new(&config, Arc::clone(&client), Arc::new(rules), hook, notifier);
        Ok(Self { config, client, engine: Arc::new(engine) })
    }

    pub fn config(&self) -> &JanitorConfig {
        &self.config
    }

    pub fn engine(&self) -> &LifecycleEngine {
        &self.engine
    }

    /// One full cleanup run. Discovery or namespace listing failures abort the
    /// run; a failing list for one type or namespace is logged and skipped.
    pub async fn clean_up(&self, cancel: &CancellationToken) -> Result<RunSummary, JanitorError> {
        let run = Arc::new(RunState::new());
        let span = info_span!("cleanup", run_id = %run.run_id);
        self.run(run, cancel).instrument(span).await
    }

    async fn run(&self, run: Arc<RunState>, cancel: &CancellationToken) -> Result<RunSummary, JanitorError> {
        let t0 = Instant::now();
        let filter = self.engine.filter();
        let types = catalog::discover(self.client.as_ref()).await?;
        let ns_type = types
            .iter()
            .find(|t| t.is_namespace())
            .cloned()
            .unwrap_or_else(|| Arc::new(ResourceType::namespaces()));
        let namespaces = self.client.list(&ns_type, None).await?;
        debug!(types = types.len(), namespaces = namespaces.len(), "starting cleanup");

        let pool = WorkerPool::spawn(
            self.config.workers(),
            self.config.queue_capacity,
            Arc::clone(&self.engine),
            Arc::clone(&run),
            cancel.clone(),
        );
        let namespace_names: Vec<String> = namespaces
            .iter()
            .map(|n| n.name.clone())
            .filter(|n| filter.includes_namespace(n))
            .collect();

        'submit: {
            if filter.includes_type(&ns_type.plural) {
                for ns in namespaces {
                    if !pool.submit(ns).await {
                        break 'submit;
                    }
                }
            }
            for rt in types.iter().filter(|t| !t.is_namespace() && filter.lists_type(t)) {
                let scopes: Vec<Option<&str>> = if rt.namespaced {
                    namespace_names.iter().map(|n| Some(n.as_str())).collect()
                } else {
                    vec![None]
                };
                for ns in scopes {
                    for resource in self.list_or_skip(rt, ns).await {
                        if !pool.submit(resource).await {
                            break 'submit;
                        }
                    }
                }
            }
        }

        pool.drain().await;
        histogram!("janitor_run_ms", t0.elapsed().as_secs_f64() * 1000.0);

        let summary = RunSummary { run_id: run.run_id, counters: run.counters.snapshot(), cancelled: cancel.is_cancelled() };
        if summary.cancelled {
            warn!("cleanup interrupted by shutdown");
        }
        if !self.config.quiet {
            info!("Clean up run completed: {summary}");
        }
        Ok(summary)
    }

    async fn list_or_skip(&self, resource_type: &Arc<ResourceType>, namespace: Option<&str>) -> Vec<Resource> {
        match self.client.list(resource_type, namespace).await {
            Ok(objects) => objects,
            Err(e) => {
                warn!(gvr = %resource_type.gvr_key(), namespace = namespace.unwrap_or("*"), error = %e, "list failed, skipping");
                Vec::new()
            }
        }
    }
}
