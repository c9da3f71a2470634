//! Run-scoped memoization shared by all workers of one cleanup run.

use std::sync::Mutex;

use rustc_hash::FxHashMap;
use serde_json::Value;

/// Write-once-read-many map; created at run start and dropped at run end.
#[derive(Debug, Default)]
pub struct RunCache {
    entries: Mutex<FxHashMap<String, Value>>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).cloned()
    }

    /// Return the cached value for `key`, computing it with `init` if absent.
    ///
    /// `init` runs under the cache lock, so concurrent callers never compute twice:
    /// the first writer wins and everyone else observes its value.
    pub fn get_or_insert_with<F>(&self, key: &str, init: F) -> Value
    where
        F: FnOnce() -> Value,
    {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.entry(key.to_string()).or_insert_with(init).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
