//! Capability set the janitor needs from the cluster API.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{ClientError, Resource, ResourceType};

/// One API resource entry from discovery (preferred version of its group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResourceEntry {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name; subresources look like `pods/log`.
    pub name: String,
    pub namespaced: bool,
    pub verbs: Vec<String>,
}

/// Cluster API transport. Every call is individually failable and reports
/// `ClientError::NotFound` distinctly from other failures.
#[async_trait::async_trait]
pub trait ClusterClient: Send + Sync {
    /// All resources served by the cluster, across API groups.
    async fn server_resources(&self) -> Result<Vec<ApiResourceEntry>, ClientError>;

    /// List objects of `resource_type`, in `namespace` or cluster-wide when `None`.
    async fn list(
        &self,
        resource_type: &Arc<ResourceType>,
        namespace: Option<&str>,
    ) -> Result<Vec<Resource>, ClientError>;

    /// Delete with background propagation.
    async fn delete(&self, resource: &Resource) -> Result<(), ClientError>;

    /// Record a lifecycle event against the object.
    async fn create_event(&self, resource: &Resource, reason: &str, message: &str) -> Result<(), ClientError>;

    /// Merge a single annotation into the live object.
    async fn annotate(&self, resource: &Resource, key: &str, value: &str) -> Result<(), ClientError>;
}
