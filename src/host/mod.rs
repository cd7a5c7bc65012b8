//! Host pull-request API contract.
//!
//! The orchestrator only depends on this trait; the concrete REST client
//! is replaceable glue. Implementations must be safe to retry at the
//! caller's discretion — the output processor itself never retries.

pub mod github;
pub mod testing;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::HostError;
use crate::outputs::DependencyFile;

/// Everything needed to open a pull request on the host.
#[derive(Debug, Clone)]
pub struct PullRequestSpec {
    pub title: String,
    pub description: String,
    pub source_branch: String,
    pub target_branch: String,
    pub commit_message: String,
    pub changed_files: Vec<DependencyFile>,
    /// PR-scoped key/value properties; the dependency-metadata blob the
    /// orchestrator relies on to recognize its PRs on later runs.
    pub properties: Vec<(String, String)>,
    pub base_commit_sha: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PullRequestUpdate {
    pub pr_id: i64,
    pub source_branch: String,
    pub commit_message: String,
    pub changed_files: Vec<DependencyFile>,
    pub base_commit_sha: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PullRequestClose {
    pub pr_id: i64,
    pub source_branch: Option<String>,
    pub comment: Option<String>,
    /// Closing always deletes the source branch as a side effect.
    pub delete_source_branch: bool,
}

/// An open PR plus its stored properties, as read back from the host.
#[derive(Debug, Clone)]
pub struct PullRequestRecord {
    pub pr_id: i64,
    pub source_branch: String,
    pub properties: HashMap<String, String>,
}

#[async_trait]
pub trait HostClient: Send + Sync {
    /// Returns the new PR id, or `None` when the host refused the create
    /// without a transport error (e.g. validation).
    async fn create_pull_request(
        &self,
        spec: PullRequestSpec,
    ) -> Result<Option<i64>, HostError>;

    async fn update_pull_request(&self, update: PullRequestUpdate) -> Result<bool, HostError>;

    async fn abandon_pull_request(&self, close: PullRequestClose) -> Result<bool, HostError>;

    async fn get_default_branch(&self) -> Result<String, HostError>;

    async fn get_branch_names(&self) -> Result<Vec<String>, HostError>;

    /// Open PRs created by the given identity, with their properties.
    async fn get_active_pull_request_properties(
        &self,
        creator: &str,
    ) -> Result<Vec<PullRequestRecord>, HostError>;

    /// Approve with the secondary approver identity.
    async fn approve_pull_request(&self, pr_id: i64) -> Result<bool, HostError>;
}
