//! In-memory job registry.
//!
//! Owned by the scheduler and shared with the control-plane API as an
//! `Arc<JobRegistry>`; there are no ambient globals. One entry per live
//! job holds the descriptor, the two bearer tokens, the credential set,
//! the affected-PR ledger and the worker-reported state. `clear` drops
//! all of it together.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::RegistryError;
use crate::job::spec::{Credential, JobSpec, credential_secrets};
use crate::outputs::ReportedDependency;
use crate::redact::Redactor;

/// Orchestrator-side context for a registered job; never serialized into
/// the job descriptor the updater sees.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Open-PR limit of the originating update block (0 = security-only).
    pub open_pr_limit: u32,
    /// Directory from the update block, if one was set. Branch derivation
    /// falls back to the first changed file's directory otherwise.
    pub update_block_directory: Option<String>,
    pub branch_separator: String,
    pub target_branch: Option<String>,
    /// Approve each created PR with the secondary approver identity.
    pub auto_approve: bool,
}

impl Default for JobContext {
    fn default() -> Self {
        Self {
            open_pr_limit: crate::config::DEFAULT_OPEN_PR_LIMIT,
            update_block_directory: None,
            branch_separator: crate::outputs::branch::DEFAULT_SEPARATOR.to_string(),
            target_branch: None,
            auto_approve: false,
        }
    }
}

/// The two independent bearer tokens minted for a job: one authorizes
/// job-detail and output-reporting calls, the other credential retrieval.
#[derive(Debug, Clone)]
pub struct JobTokens {
    pub job_token: String,
    pub credentials_token: String,
}

/// Ordered record of the PRs a job touched, in processing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffectedPrs {
    pub created: Vec<i64>,
    pub updated: Vec<i64>,
    pub closed: Vec<i64>,
}

impl AffectedPrs {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.closed.is_empty()
    }
}

/// An error the updater reported through the control-plane API.
#[derive(Debug, Clone)]
pub struct JobErrorRecord {
    pub error_type: String,
    pub error_details: serde_json::Value,
}

/// Everything the registry hands back when a job is cleared.
#[derive(Debug, Clone, Default)]
pub struct ClearedJob {
    pub affected: AffectedPrs,
    pub error: Option<JobErrorRecord>,
    pub dependency_list: Option<Vec<ReportedDependency>>,
}

struct JobEntry {
    spec: JobSpec,
    context: JobContext,
    tokens: JobTokens,
    credentials: Vec<Credential>,
    affected: AffectedPrs,
    dependency_list: Option<Vec<ReportedDependency>>,
    error: Option<JobErrorRecord>,
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobEntry>>,
    redactor: Arc<dyn Redactor>,
}

impl JobRegistry {
    pub fn new(redactor: Arc<dyn Redactor>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            redactor,
        }
    }

    /// Register a job, minting fresh tokens. Rejects an id that is already
    /// live so the caller can retry with a new one.
    pub async fn register(
        &self,
        spec: JobSpec,
        context: JobContext,
        credentials: Vec<Credential>,
    ) -> Result<JobTokens, RegistryError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&spec.id) {
            return Err(RegistryError::JobIdCollision {
                id: spec.id.clone(),
            });
        }
        let tokens = JobTokens {
            job_token: Uuid::new_v4().simple().to_string(),
            credentials_token: Uuid::new_v4().simple().to_string(),
        };
        let id = spec.id.clone();
        jobs.insert(
            id,
            JobEntry {
                spec,
                context,
                tokens: tokens.clone(),
                credentials,
                affected: AffectedPrs::default(),
                dependency_list: None,
                error: None,
            },
        );
        Ok(tokens)
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.jobs.read().await.contains_key(id)
    }

    /// The job descriptor, or `None` when the job is not registered.
    pub async fn details(&self, id: &str) -> Option<JobSpec> {
        self.jobs.read().await.get(id).map(|entry| entry.spec.clone())
    }

    pub async fn context(&self, id: &str) -> Option<JobContext> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|entry| entry.context.clone())
    }

    /// Fetch a job's credentials. Every secret is registered with the
    /// redactor before the credentials leave the registry.
    pub async fn credentials(&self, id: &str) -> Option<Vec<Credential>> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(id)?;
        for secret in credential_secrets(&entry.credentials) {
            self.redactor.register(&secret);
        }
        Some(entry.credentials.clone())
    }

    pub async fn check_job_token(&self, id: &str, token: &str) -> bool {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|entry| entry.tokens.job_token == token)
            .unwrap_or(false)
    }

    pub async fn check_credentials_token(&self, id: &str, token: &str) -> bool {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|entry| entry.tokens.credentials_token == token)
            .unwrap_or(false)
    }

    pub async fn record_created(&self, id: &str, pr_id: i64) {
        if let Some(entry) = self.jobs.write().await.get_mut(id) {
            entry.affected.created.push(pr_id);
        }
    }

    pub async fn record_updated(&self, id: &str, pr_id: i64) {
        if let Some(entry) = self.jobs.write().await.get_mut(id) {
            entry.affected.updated.push(pr_id);
        }
    }

    pub async fn record_closed(&self, id: &str, pr_id: i64) {
        if let Some(entry) = self.jobs.write().await.get_mut(id) {
            entry.affected.closed.push(pr_id);
        }
    }

    pub async fn affected(&self, id: &str) -> Option<AffectedPrs> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|entry| entry.affected.clone())
    }

    pub async fn set_dependency_list(&self, id: &str, dependencies: Vec<ReportedDependency>) {
        if let Some(entry) = self.jobs.write().await.get_mut(id) {
            entry.dependency_list = Some(dependencies);
        }
    }

    pub async fn record_error(&self, id: &str, error: JobErrorRecord) {
        if let Some(entry) = self.jobs.write().await.get_mut(id) {
            entry.error = Some(error);
        }
    }

    /// Drop the job, returning its ledger and reported state. Tokens and
    /// credentials are discarded with the entry.
    pub async fn clear(&self, id: &str) -> Option<ClearedJob> {
        self.jobs.write().await.remove(id).map(|entry| ClearedJob {
            affected: entry.affected,
            error: entry.error,
            dependency_list: entry.dependency_list,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redact::MaskingRedactor;

    fn spec(id: &str) -> JobSpec {
        use crate::config::{SourceDescriptor, UpdateBlock};
        use crate::job::builder::{JobBuilder, UpdateJobInputs};
        use std::collections::BTreeMap;

        let block: UpdateBlock = serde_yaml::from_str("package-ecosystem: npm").unwrap();
        let source = SourceDescriptor {
            provider: "github".to_string(),
            hostname: "github.com".to_string(),
            api_endpoint: "https://api.github.com".to_string(),
            repo: "acme/widgets".to_string(),
        };
        let experiments = BTreeMap::new();
        JobBuilder {
            block: &block,
            source: &source,
            experiments: &experiments,
        }
        .for_update(UpdateJobInputs {
            job_id: Some(id.to_string()),
            ..Default::default()
        })
    }

    fn registry() -> JobRegistry {
        JobRegistry::new(Arc::new(MaskingRedactor::new()))
    }

    #[tokio::test]
    async fn register_mints_two_independent_tokens() {
        let registry = registry();
        let tokens = registry
            .register(spec("1111111111"), JobContext::default(), Vec::new())
            .await
            .unwrap();
        assert_ne!(tokens.job_token, tokens.credentials_token);
        assert!(registry.check_job_token("1111111111", &tokens.job_token).await);
        assert!(
            registry
                .check_credentials_token("1111111111", &tokens.credentials_token)
                .await
        );
        // Tokens are not interchangeable.
        assert!(
            !registry
                .check_job_token("1111111111", &tokens.credentials_token)
                .await
        );
        assert!(
            !registry
                .check_credentials_token("1111111111", &tokens.job_token)
                .await
        );
    }

    #[tokio::test]
    async fn tokens_differ_across_jobs() {
        let registry = registry();
        let first = registry
            .register(spec("1111111111"), JobContext::default(), Vec::new())
            .await
            .unwrap();
        let second = registry
            .register(spec("2222222222"), JobContext::default(), Vec::new())
            .await
            .unwrap();
        assert_ne!(first.job_token, second.job_token);
        assert!(!registry.check_job_token("2222222222", &first.job_token).await);
    }

    #[tokio::test]
    async fn register_rejects_id_collision() {
        let registry = registry();
        registry
            .register(spec("1234567890"), JobContext::default(), Vec::new())
            .await
            .unwrap();
        let err = registry
            .register(spec("1234567890"), JobContext::default(), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::JobIdCollision { .. }));
    }

    #[tokio::test]
    async fn credential_fetch_registers_secrets_with_redactor() {
        let redactor = Arc::new(MaskingRedactor::new());
        let registry = JobRegistry::new(redactor.clone());
        let mut cred = Credential::new();
        cred.insert("type".into(), "npm_registry".into());
        cred.insert("token".into(), "registry-secret-token".into());
        registry
            .register(spec("1111111111"), JobContext::default(), vec![cred])
            .await
            .unwrap();

        // Before the fetch nothing is registered.
        assert_eq!(
            redactor.redact("registry-secret-token"),
            "registry-secret-token"
        );
        let creds = registry.credentials("1111111111").await.unwrap();
        assert_eq!(creds.len(), 1);
        assert_eq!(redactor.redact("registry-secret-token"), "*****");
    }

    #[tokio::test]
    async fn ledger_is_ordered_and_cleared_with_the_job() {
        let registry = registry();
        registry
            .register(spec("1111111111"), JobContext::default(), Vec::new())
            .await
            .unwrap();
        registry.record_created("1111111111", 10).await;
        registry.record_created("1111111111", 11).await;
        registry.record_closed("1111111111", 3).await;
        assert_eq!(
            registry.affected("1111111111").await.unwrap().created,
            vec![10, 11]
        );

        let cleared = registry.clear("1111111111").await.unwrap();
        assert_eq!(cleared.affected.created, vec![10, 11]);
        assert_eq!(cleared.affected.closed, vec![3]);
        assert!(cleared.affected.updated.is_empty());

        // Everything about the job is gone.
        assert!(!registry.contains("1111111111").await);
        assert!(registry.details("1111111111").await.is_none());
        assert!(registry.credentials("1111111111").await.is_none());
        assert!(!registry.check_job_token("1111111111", "anything").await);
    }

    #[tokio::test]
    async fn unknown_job_lookups_return_none() {
        let registry = registry();
        assert!(registry.details("0000000000").await.is_none());
        assert!(registry.credentials("0000000000").await.is_none());
        assert!(registry.affected("0000000000").await.is_none());
        assert!(registry.clear("0000000000").await.is_none());
    }
}
