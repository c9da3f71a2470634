//! Bounded worker pool that feeds resources through a handler exactly once per run.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use janitor_core::{JanitorError, Resource, ResourceKey, RunCache};
use metrics::counter;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument, Span};
use uuid::Uuid;

pub const RESOURCES_PROCESSED: &str = "resources-processed";

/// Run-wide action counters, e.g. `pods-deleted`. Increments are mirrored to metrics.
#[derive(Debug, Default)]
pub struct Counters {
    inner: Mutex<FxHashMap<String, u64>>,
}

impl Counters {
    pub fn incr(&self, name: &str) {
        {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            *map.entry(name.to_string()).or_insert(0) += 1;
        }
        counter!("janitor_actions_total", 1u64, "counter" => name.to_string());
    }

    pub fn get(&self, name: &str) -> u64 {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.get(name).copied().unwrap_or(0)
    }

    /// Sorted copy for summaries.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

/// Identities already handed to a worker this run.
#[derive(Debug, Default)]
pub struct DedupSet {
    seen: Mutex<FxHashSet<ResourceKey>>,
}

impl DedupSet {
    /// Test-and-set; `true` only for the first insertion of `key`.
    pub fn insert(&self, key: ResourceKey) -> bool {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).insert(key)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything scoped to one cleanup run. Rules and type descriptors are
/// immutable and live outside it.
#[derive(Debug)]
pub struct RunState {
    pub run_id: Uuid,
    pub counters: Counters,
    pub dedup: DedupSet,
    pub cache: RunCache,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            counters: Counters::default(),
            dedup: DedupSet::default(),
            cache: RunCache::new(),
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-resource work run by the pool.
#[async_trait::async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn handle(&self, resource: Resource, run: &RunState) -> Result<(), JanitorError>;
}

/// `P` workers sharing one bounded queue. Workers stop taking new items once the
/// token is cancelled; an item already being handled runs to completion.
pub struct WorkerPool {
    tx: mpsc::Sender<Resource>,
    workers: JoinSet<()>,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn spawn<H>(
        workers: usize,
        capacity: usize,
        handler: Arc<H>,
        run: Arc<RunState>,
        cancel: CancellationToken,
    ) -> Self
    where
        H: ResourceHandler + ?Sized + 'static,
    {
        let (tx, rx) = mpsc::channel::<Resource>(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut set = JoinSet::new();
        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let handler = Arc::clone(&handler);
            let run = Arc::clone(&run);
            let cancel = cancel.clone();
            set.spawn(
                async move {
                    debug!(worker, "worker started");
                    loop {
                        let next = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                biased;
                                _ = cancel.cancelled() => None,
                                item = rx.recv() => item,
                            }
                        };
                        let Some(resource) = next else { break };
                        let key = resource.key();
                        if !run.dedup.insert(key.clone()) {
                            debug!(worker, %key, "already processed this run, skipping");
                            continue;
                        }
                        if let Err(e) = handler.handle(resource, &run).await {
                            warn!(worker, %key, error = %e, "failed to process resource");
                        }
                    }
                    debug!(worker, "worker finished");
                }
                .instrument(Span::current()),
            );
        }
        Self { tx, workers: set, cancel }
    }

    /// Enqueue one resource, waiting for queue space. `false` once cancelled.
    pub async fn submit(&self, resource: Resource) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(resource) => sent.is_ok(),
        }
    }

    /// Close the queue and wait for every worker to finish.
    pub async fn drain(mut self) {
        drop(self.tx);
        while let Some(res) = self.workers.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "worker task failed");
            }
        }
    }
}
