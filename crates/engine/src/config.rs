//! Run configuration shared by the engine and the dispatcher.

use std::time::Duration;

use janitor_core::JanitorError;

/// Matches every resource type or namespace in an include list.
pub const ALL: &str = "all";

pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
pub const DEFAULT_EXCLUDE_RESOURCES: &[&str] = &["events", "controllerrevisions", "endpoints"];
pub const DEFAULT_EXCLUDE_NAMESPACES: &[&str] = &["kube-system"];

#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// Log mutating actions instead of performing them.
    pub dry_run: bool,
    /// Suppress per-resource info lines and the run summary.
    pub quiet: bool,
    pub interval_secs: u64,
    pub wait_after_delete: Duration,
    /// Notify-ahead window; zero disables notifications.
    pub delete_notification: Duration,
    pub include_resources: Vec<String>,
    pub exclude_resources: Vec<String>,
    pub include_namespaces: Vec<String>,
    pub exclude_namespaces: Vec<String>,
    pub include_cluster_resources: bool,
    pub deployment_time_annotation: Option<String>,
    /// Worker count; 0 means available parallelism.
    pub parallelism: usize,
    pub queue_capacity: usize,
    /// Prefix for notification messages, e.g. the cluster name.
    pub context_name: Option<String>,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            quiet: false,
            interval_secs: DEFAULT_INTERVAL_SECS,
            wait_after_delete: Duration::ZERO,
            delete_notification: Duration::ZERO,
            include_resources: vec![ALL.to_string()],
            exclude_resources: DEFAULT_EXCLUDE_RESOURCES.iter().map(|s| s.to_string()).collect(),
            include_namespaces: vec![ALL.to_string()],
            exclude_namespaces: DEFAULT_EXCLUDE_NAMESPACES.iter().map(|s| s.to_string()).collect(),
            include_cluster_resources: false,
            deployment_time_annotation: None,
            parallelism: 0,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            context_name: None,
        }
    }
}

impl JanitorConfig {
    pub fn validate(&self) -> Result<(), JanitorError> {
        if self.interval_secs < 1 {
            return Err(JanitorError::Config("interval must be at least 1 second".into()));
        }
        if self.queue_capacity == 0 {
            return Err(JanitorError::Config("queue capacity must be greater than 0".into()));
        }
        Ok(())
    }

    pub fn workers(&self) -> usize {
        if self.parallelism > 0 {
            return self.parallelism;
        }
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }

    /// Notify-ahead window, `None` when disabled.
    pub fn notify_window(&self) -> Option<chrono::Duration> {
        if self.delete_notification.is_zero() {
            return None;
        }
        chrono::Duration::from_std(self.delete_notification).ok()
    }
}

/// Split a comma-separated list, dropping blanks.
pub fn split_list(s: &str) -> Vec<String> {
    s.split(',').map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect()
}
