//! Pull-request state machine driven by updater outputs.
//!
//! Every output the updater reports lands here via the control-plane API.
//! The processor is the only component that talks to the host about pull
//! requests; it owns an in-memory snapshot of the PRs known to be open so
//! that limit checks and update/close lookups never re-query the host
//! mid-run.

use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::host::{HostClient, PullRequestClose, PullRequestSpec, PullRequestUpdate};
use crate::job::JobRegistry;
use crate::job::registry::JobErrorRecord;
use crate::outputs::branch::{BranchDependency, branch_conflicts, source_branch_name};
use crate::outputs::metadata::{
    PROPERTY_DEPENDENCIES, PROPERTY_PACKAGE_MANAGER, PrDependency, PrDescriptor,
};
use crate::outputs::supersede::should_supersede;
use crate::outputs::{
    ClosePullRequestPayload, CreatePullRequestPayload, UpdateOutput, UpdatePullRequestPayload,
};

/// One open pull request as the orchestrator tracks it during a run.
#[derive(Debug, Clone)]
pub struct OpenPullRequest {
    pub pr_id: i64,
    pub package_manager: String,
    pub source_branch: String,
    pub descriptor: PrDescriptor,
}

/// Shared snapshot of the orchestrator's open PRs. Seeded from the host at
/// the start of a run, then kept current as PRs are created and closed.
#[derive(Default)]
pub struct OpenPrSet {
    prs: RwLock<Vec<OpenPullRequest>>,
}

impl OpenPrSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, prs: Vec<OpenPullRequest>) {
        *self.prs.write().await = prs;
    }

    pub async fn all(&self) -> Vec<OpenPullRequest> {
        self.prs.read().await.clone()
    }

    pub async fn contains(&self, pr_id: i64) -> bool {
        self.prs.read().await.iter().any(|pr| pr.pr_id == pr_id)
    }

    pub async fn count_for(&self, package_manager: &str) -> usize {
        self.prs
            .read()
            .await
            .iter()
            .filter(|pr| pr.package_manager == package_manager)
            .count()
    }

    pub async fn for_package_manager(&self, package_manager: &str) -> Vec<OpenPullRequest> {
        self.prs
            .read()
            .await
            .iter()
            .filter(|pr| pr.package_manager == package_manager)
            .cloned()
            .collect()
    }

    async fn push(&self, pr: OpenPullRequest) {
        self.prs.write().await.push(pr);
    }

    async fn remove(&self, pr_id: i64) {
        self.prs.write().await.retain(|pr| pr.pr_id != pr_id);
    }

    /// The open PR a new candidate descriptor replaces, if any.
    async fn find_superseded(
        &self,
        package_manager: &str,
        candidate: &PrDescriptor,
    ) -> Option<OpenPullRequest> {
        self.prs
            .read()
            .await
            .iter()
            .find(|pr| {
                pr.package_manager == package_manager
                    && should_supersede(&pr.descriptor, candidate)
            })
            .cloned()
    }

    /// Locate a tracked PR by exact, order-independent dependency-name set.
    async fn find_by_names(
        &self,
        package_manager: &str,
        names: &[String],
    ) -> Option<OpenPullRequest> {
        self.prs
            .read()
            .await
            .iter()
            .find(|pr| {
                pr.package_manager == package_manager
                    && pr.descriptor.same_dependency_names(names)
            })
            .cloned()
    }
}

pub struct OutputProcessor {
    registry: Arc<JobRegistry>,
    host: Arc<dyn HostClient>,
    open_prs: Arc<OpenPrSet>,
    dry_run: bool,
}

impl OutputProcessor {
    pub fn new(
        registry: Arc<JobRegistry>,
        host: Arc<dyn HostClient>,
        open_prs: Arc<OpenPrSet>,
        dry_run: bool,
    ) -> Self {
        Self {
            registry,
            host,
            open_prs,
            dry_run,
        }
    }

    /// Apply one reported output. `Err` signals a failed output (the API
    /// layer answers 400); side-effect-free skips are `Ok`.
    pub async fn handle(&self, job_id: &str, output: UpdateOutput) -> Result<()> {
        match output {
            UpdateOutput::CreatePullRequest(payload) => {
                self.create_pull_request(job_id, payload).await
            }
            UpdateOutput::UpdatePullRequest(payload) => {
                self.update_pull_request(job_id, payload).await
            }
            UpdateOutput::ClosePullRequest(payload) => {
                self.close_pull_request(job_id, payload).await
            }
            UpdateOutput::UpdateDependencyList(payload) => {
                debug!(
                    job_id,
                    dependencies = payload.dependencies.len(),
                    "Updater reported dependency list"
                );
                self.registry
                    .set_dependency_list(job_id, payload.dependencies)
                    .await;
                Ok(())
            }
            UpdateOutput::MarkAsProcessed(payload) => {
                debug!(
                    job_id,
                    base_commit_sha = payload.base_commit_sha.as_deref().unwrap_or(""),
                    "Job marked as processed"
                );
                Ok(())
            }
            UpdateOutput::RecordEcosystemVersions(_)
            | UpdateOutput::RecordEcosystemMeta(_)
            | UpdateOutput::RecordMetrics(_) => {
                debug!(job_id, kind = output.kind(), "Recorded");
                Ok(())
            }
            UpdateOutput::IncrementMetric(payload) => {
                debug!(job_id, metric = %payload.metric, "Metric incremented");
                Ok(())
            }
            UpdateOutput::RecordUpdateJobError(payload)
            | UpdateOutput::RecordUpdateJobUnknownError(payload) => {
                warn!(
                    job_id,
                    error_type = %payload.error_type,
                    details = %payload.error_details,
                    "Updater reported a job error"
                );
                self.registry
                    .record_error(
                        job_id,
                        JobErrorRecord {
                            error_type: payload.error_type.clone(),
                            error_details: payload.error_details,
                        },
                    )
                    .await;
                bail!("updater reported job error: {}", payload.error_type)
            }
            UpdateOutput::Unknown { kind } => {
                warn!(job_id, kind = %kind, "Ignoring unrecognized output kind");
                Ok(())
            }
        }
    }

    async fn create_pull_request(
        &self,
        job_id: &str,
        payload: CreatePullRequestPayload,
    ) -> Result<()> {
        let spec = self
            .registry
            .details(job_id)
            .await
            .ok_or_else(|| anyhow!("no registered job with id {job_id}"))?;
        let context = self
            .registry
            .context(job_id)
            .await
            .ok_or_else(|| anyhow!("no registered job with id {job_id}"))?;

        if self.dry_run {
            info!(
                job_id,
                title = %payload.pr_title,
                "Dry run: would create pull request"
            );
            return Ok(());
        }

        let descriptor = descriptor_from_payload(&payload);

        // A refreshed version of an update that is already open replaces
        // the old PR instead of stacking next to it.
        if let Some(stale) = self
            .open_prs
            .find_superseded(&spec.package_manager, &descriptor)
            .await
        {
            let closed = self
                .host
                .abandon_pull_request(PullRequestClose {
                    pr_id: stale.pr_id,
                    source_branch: Some(stale.source_branch.clone()),
                    comment: close_comment(Some("superseded")),
                    delete_source_branch: true,
                })
                .await?;
            if !closed {
                bail!(
                    "host could not close superseded pull request {}",
                    stale.pr_id
                );
            }
            info!(job_id, pr_id = stale.pr_id, "Closed superseded pull request");
            self.registry.record_closed(job_id, stale.pr_id).await;
            self.open_prs.remove(stale.pr_id).await;
        }

        // The snapshot is seeded with the PRs already open for this package
        // manager and every create pushes into it, so its count is exactly
        // "existing plus created this run". Security-only blocks (limit 0)
        // never create through this path with a cap.
        if context.open_pr_limit > 0 {
            let open = self.open_prs.count_for(&spec.package_manager).await;
            if open >= context.open_pr_limit as usize {
                info!(
                    job_id,
                    limit = context.open_pr_limit,
                    open,
                    "Open pull request limit reached, skipping create"
                );
                return Ok(());
            }
        }

        let directory = context
            .update_block_directory
            .clone()
            .or_else(|| {
                payload
                    .updated_dependency_files
                    .iter()
                    .find_map(|f| f.directory.clone())
            })
            .or_else(|| payload.dependencies.iter().find_map(|d| d.directory.clone()))
            .unwrap_or_else(|| "/".to_string());

        let branch_deps: Vec<BranchDependency> = payload
            .dependencies
            .iter()
            .map(|dep| BranchDependency {
                name: dep.name.clone(),
                version: dep.version.clone(),
            })
            .collect();
        let source_branch = source_branch_name(
            &spec.package_manager,
            context.target_branch.as_deref(),
            &directory,
            descriptor.group_name(),
            &branch_deps,
            &context.branch_separator,
        );

        let existing = self.host.get_branch_names().await?;
        if let Some(conflict) =
            branch_conflicts(&source_branch, existing.iter().map(String::as_str))
        {
            bail!(
                "branch {source_branch} conflicts with existing branch {conflict}"
            );
        }

        let target_branch = match context.target_branch.clone() {
            Some(branch) => branch,
            None => self.host.get_default_branch().await?,
        };
        let title = payload.pr_title.clone();
        let commit_message = payload
            .commit_message
            .clone()
            .unwrap_or_else(|| payload.pr_title.clone());
        let properties = vec![
            (
                PROPERTY_PACKAGE_MANAGER.to_string(),
                spec.package_manager.clone(),
            ),
            (
                PROPERTY_DEPENDENCIES.to_string(),
                descriptor.to_property_value()?,
            ),
        ];

        let pr_id = self
            .host
            .create_pull_request(PullRequestSpec {
                title: title.clone(),
                description: payload.pr_body.clone().unwrap_or_default(),
                source_branch: source_branch.clone(),
                target_branch,
                commit_message,
                changed_files: payload.updated_dependency_files.clone(),
                properties,
                base_commit_sha: payload.base_commit_sha.clone(),
            })
            .await?
            .ok_or_else(|| anyhow!("host refused to create pull request for {source_branch}"))?;

        info!(job_id, pr_id, branch = %source_branch, title = %title, "Created pull request");
        self.registry.record_created(job_id, pr_id).await;
        self.open_prs
            .push(OpenPullRequest {
                pr_id,
                package_manager: spec.package_manager.clone(),
                source_branch,
                descriptor,
            })
            .await;

        if context.auto_approve {
            match self.host.approve_pull_request(pr_id).await {
                Ok(true) => info!(pr_id, "Approved pull request"),
                Ok(false) => warn!(pr_id, "Auto-approval unavailable"),
                // Approval is best-effort; the PR itself was created.
                Err(err) => warn!(pr_id, error = %err, "Failed to approve pull request"),
            }
        }
        Ok(())
    }

    async fn update_pull_request(
        &self,
        job_id: &str,
        payload: UpdatePullRequestPayload,
    ) -> Result<()> {
        let spec = self
            .registry
            .details(job_id)
            .await
            .ok_or_else(|| anyhow!("no registered job with id {job_id}"))?;

        if self.dry_run {
            info!(
                job_id,
                dependencies = ?payload.dependency_names,
                "Dry run: would update pull request"
            );
            return Ok(());
        }

        let pr = self
            .open_prs
            .find_by_names(&spec.package_manager, &payload.dependency_names)
            .await
            .ok_or_else(|| {
                anyhow!(
                    "no open pull request matches dependencies {:?}",
                    payload.dependency_names
                )
            })?;

        let commit_message = format!("Update {}", payload.dependency_names.join(", "));
        let updated = self
            .host
            .update_pull_request(PullRequestUpdate {
                pr_id: pr.pr_id,
                source_branch: pr.source_branch.clone(),
                commit_message,
                changed_files: payload.updated_dependency_files,
                base_commit_sha: payload.base_commit_sha,
            })
            .await?;
        if !updated {
            bail!("host could not update pull request {}", pr.pr_id);
        }
        info!(job_id, pr_id = pr.pr_id, "Updated pull request");
        self.registry.record_updated(job_id, pr.pr_id).await;
        Ok(())
    }

    async fn close_pull_request(
        &self,
        job_id: &str,
        payload: ClosePullRequestPayload,
    ) -> Result<()> {
        let spec = self
            .registry
            .details(job_id)
            .await
            .ok_or_else(|| anyhow!("no registered job with id {job_id}"))?;

        if self.dry_run {
            info!(
                job_id,
                dependencies = ?payload.dependency_names,
                "Dry run: would close pull request"
            );
            return Ok(());
        }

        let pr = self
            .open_prs
            .find_by_names(&spec.package_manager, &payload.dependency_names)
            .await
            .ok_or_else(|| {
                anyhow!(
                    "no open pull request matches dependencies {:?}",
                    payload.dependency_names
                )
            })?;

        let closed = self
            .host
            .abandon_pull_request(PullRequestClose {
                pr_id: pr.pr_id,
                source_branch: Some(pr.source_branch.clone()),
                comment: close_comment(payload.reason.as_deref()),
                delete_source_branch: true,
            })
            .await?;
        if !closed {
            bail!("host could not close pull request {}", pr.pr_id);
        }
        info!(
            job_id,
            pr_id = pr.pr_id,
            reason = payload.reason.as_deref().unwrap_or("unspecified"),
            "Closed pull request"
        );
        self.registry.record_closed(job_id, pr.pr_id).await;
        self.open_prs.remove(pr.pr_id).await;
        Ok(())
    }
}

fn descriptor_from_payload(payload: &CreatePullRequestPayload) -> PrDescriptor {
    let dependencies: Vec<PrDependency> = payload
        .dependencies
        .iter()
        .map(|dep| PrDependency {
            dependency_name: dep.name.clone(),
            dependency_version: dep.version.clone(),
            directory: dep.directory.clone(),
        })
        .collect();
    match &payload.dependency_group {
        Some(group) => PrDescriptor::Group {
            dependency_group_name: group.name.clone(),
            dependencies,
        },
        None => PrDescriptor::Deps(dependencies),
    }
}

fn close_comment(reason: Option<&str>) -> Option<String> {
    let text = match reason? {
        "dependency_removed" => "Closing because the dependency is no longer present.",
        "dependencies_changed" => "Closing because the dependencies have changed.",
        "up_to_date" => "Closing because these dependencies are already up to date.",
        "superseded" => "Superseded by a newer update.",
        other => return Some(format!("Closing: {other}.")),
    };
    Some(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SourceDescriptor, UpdateBlock};
    use crate::host::testing::RecordingHost;
    use crate::job::builder::{JobBuilder, UpdateJobInputs};
    use crate::job::registry::JobContext;
    use crate::redact::MaskingRedactor;
    use std::collections::BTreeMap;

    const JOB: &str = "1234567890";

    async fn registered(context: JobContext) -> Arc<JobRegistry> {
        let registry = Arc::new(JobRegistry::new(Arc::new(MaskingRedactor::new())));
        let block: UpdateBlock = serde_yaml::from_str("package-ecosystem: npm").unwrap();
        let source = SourceDescriptor {
            provider: "github".to_string(),
            hostname: "github.com".to_string(),
            api_endpoint: "https://api.github.com".to_string(),
            repo: "acme/widgets".to_string(),
        };
        let experiments = BTreeMap::new();
        let spec = JobBuilder {
            block: &block,
            source: &source,
            experiments: &experiments,
        }
        .for_update(UpdateJobInputs {
            job_id: Some(JOB.to_string()),
            ..Default::default()
        });
        registry
            .register(spec, context, Vec::new())
            .await
            .unwrap();
        registry
    }

    fn create_payload_for(name: &str, version: &str) -> CreatePullRequestPayload {
        serde_json::from_value(serde_json::json!({
            "dependencies": [
                {"name": name, "version": version}
            ],
            "updated-dependency-files": [
                {"name": "package.json", "directory": "/", "content": "{}"}
            ],
            "pr-title": format!("Bump {name} to {version}"),
            "pr-body": format!("Bumps {name}.")
        }))
        .unwrap()
    }

    fn create_payload() -> CreatePullRequestPayload {
        create_payload_for("lodash", "4.17.21")
    }

    fn open_pr(pr_id: i64, names: &[&str]) -> OpenPullRequest {
        OpenPullRequest {
            pr_id,
            package_manager: "npm_and_yarn".to_string(),
            source_branch: format!("dependabot/npm_and_yarn/pr-{pr_id}"),
            descriptor: PrDescriptor::Deps(
                names
                    .iter()
                    .map(|n| PrDependency {
                        dependency_name: n.to_string(),
                        dependency_version: Some("1.0.0".to_string()),
                        directory: None,
                    })
                    .collect(),
            ),
        }
    }

    #[tokio::test]
    async fn create_derives_branch_and_records_ledger() {
        let registry = registered(JobContext::default()).await;
        let host = Arc::new(RecordingHost::new().with_branches(&["main"]));
        let open_prs = Arc::new(OpenPrSet::new());
        let processor =
            OutputProcessor::new(registry.clone(), host.clone(), open_prs.clone(), false);

        processor
            .handle(JOB, UpdateOutput::CreatePullRequest(create_payload()))
            .await
            .unwrap();

        let created = host.created();
        assert_eq!(created.len(), 1);
        assert_eq!(
            created[0].source_branch,
            "dependabot/npm_and_yarn/lodash-4.17.21"
        );
        assert_eq!(created[0].target_branch, "main");
        let properties: std::collections::HashMap<_, _> =
            created[0].properties.iter().cloned().collect();
        assert_eq!(
            properties.get(PROPERTY_PACKAGE_MANAGER).unwrap(),
            "npm_and_yarn"
        );
        let descriptor =
            PrDescriptor::from_property_value(properties.get(PROPERTY_DEPENDENCIES).unwrap())
                .unwrap();
        assert_eq!(descriptor.dependency_names(), vec!["lodash"]);

        let affected = registry.affected(JOB).await.unwrap();
        assert_eq!(affected.created, vec![100]);
        assert_eq!(open_prs.count_for("npm_and_yarn").await, 1);
    }

    #[tokio::test]
    async fn create_closes_the_pull_request_it_supersedes() {
        let registry = registered(JobContext::default()).await;
        let host = Arc::new(RecordingHost::new().with_branches(&[
            "main",
            "dependabot/npm_and_yarn/lodash-4.17.20",
        ]));
        let open_prs = Arc::new(OpenPrSet::new());
        open_prs
            .seed(vec![OpenPullRequest {
                pr_id: 42,
                package_manager: "npm_and_yarn".to_string(),
                source_branch: "dependabot/npm_and_yarn/lodash-4.17.20".to_string(),
                descriptor: PrDescriptor::Deps(vec![PrDependency {
                    dependency_name: "lodash".to_string(),
                    dependency_version: Some("4.17.20".to_string()),
                    directory: None,
                }]),
            }])
            .await;
        let processor =
            OutputProcessor::new(registry.clone(), host.clone(), open_prs.clone(), false);

        processor
            .handle(JOB, UpdateOutput::CreatePullRequest(create_payload()))
            .await
            .unwrap();

        let abandoned = host.abandoned();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].pr_id, 42);
        assert_eq!(
            abandoned[0].comment.as_deref(),
            Some("Superseded by a newer update.")
        );
        assert!(abandoned[0].delete_source_branch);
        assert_eq!(host.created().len(), 1);

        let affected = registry.affected(JOB).await.unwrap();
        assert_eq!(affected.closed, vec![42]);
        assert_eq!(affected.created, vec![100]);
        // The replacement took the old PR's place in the snapshot.
        assert_eq!(open_prs.count_for("npm_and_yarn").await, 1);
    }

    #[tokio::test]
    async fn create_skips_when_limit_reached_without_touching_host() {
        let context = JobContext {
            open_pr_limit: 1,
            ..JobContext::default()
        };
        let registry = registered(context).await;
        let host = Arc::new(RecordingHost::new());
        let open_prs = Arc::new(OpenPrSet::new());
        open_prs.seed(vec![open_pr(42, &["react"])]).await;
        let processor =
            OutputProcessor::new(registry.clone(), host.clone(), open_prs, false);

        processor
            .handle(JOB, UpdateOutput::CreatePullRequest(create_payload()))
            .await
            .unwrap();

        assert!(host.created().is_empty());
        assert!(registry.affected(JOB).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn limit_admits_that_many_creates_in_one_job() {
        let context = JobContext {
            open_pr_limit: 5,
            ..JobContext::default()
        };
        let registry = registered(context).await;
        let host = Arc::new(RecordingHost::new().with_branches(&["main"]));
        let open_prs = Arc::new(OpenPrSet::new());
        let processor =
            OutputProcessor::new(registry.clone(), host.clone(), open_prs.clone(), false);

        // With nothing open beforehand, a limit of 5 admits exactly 5
        // creates; a PR must not count against itself once created.
        for (name, version) in [
            ("lodash", "4.17.21"),
            ("react", "18.3.1"),
            ("express", "4.21.0"),
            ("axios", "1.7.4"),
            ("vue", "3.5.0"),
        ] {
            processor
                .handle(
                    JOB,
                    UpdateOutput::CreatePullRequest(create_payload_for(name, version)),
                )
                .await
                .unwrap();
        }
        assert_eq!(host.created().len(), 5);
        assert_eq!(open_prs.count_for("npm_and_yarn").await, 5);

        // The sixth hits the limit and is skipped without a host call.
        processor
            .handle(
                JOB,
                UpdateOutput::CreatePullRequest(create_payload_for("chalk", "5.3.0")),
            )
            .await
            .unwrap();
        assert_eq!(host.created().len(), 5);
        assert_eq!(registry.affected(JOB).await.unwrap().created.len(), 5);
    }

    #[tokio::test]
    async fn create_fails_on_branch_collision_without_creating() {
        let registry = registered(JobContext::default()).await;
        let host = Arc::new(
            RecordingHost::new().with_branches(&["dependabot/npm_and_yarn/lodash-4.17.21"]),
        );
        let processor = OutputProcessor::new(
            registry.clone(),
            host.clone(),
            Arc::new(OpenPrSet::new()),
            false,
        );

        let err = processor
            .handle(JOB, UpdateOutput::CreatePullRequest(create_payload()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("conflicts"));
        assert!(host.created().is_empty());
    }

    #[tokio::test]
    async fn create_fails_on_prefix_collision() {
        let registry = registered(JobContext::default()).await;
        let host =
            Arc::new(RecordingHost::new().with_branches(&["dependabot/npm_and_yarn/lodash"]));
        let processor = OutputProcessor::new(
            registry,
            host.clone(),
            Arc::new(OpenPrSet::new()),
            false,
        );

        assert!(
            processor
                .handle(JOB, UpdateOutput::CreatePullRequest(create_payload()))
                .await
                .is_err()
        );
        assert!(host.created().is_empty());
    }

    #[tokio::test]
    async fn dry_run_create_is_a_successful_no_op() {
        let registry = registered(JobContext::default()).await;
        let host = Arc::new(RecordingHost::new());
        let processor = OutputProcessor::new(
            registry.clone(),
            host.clone(),
            Arc::new(OpenPrSet::new()),
            true,
        );

        processor
            .handle(JOB, UpdateOutput::CreatePullRequest(create_payload()))
            .await
            .unwrap();
        assert!(host.created().is_empty());
        assert!(registry.affected(JOB).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn auto_approve_follows_create() {
        let context = JobContext {
            auto_approve: true,
            ..JobContext::default()
        };
        let registry = registered(context).await;
        let host = Arc::new(RecordingHost::new());
        let processor = OutputProcessor::new(
            registry,
            host.clone(),
            Arc::new(OpenPrSet::new()),
            false,
        );

        processor
            .handle(JOB, UpdateOutput::CreatePullRequest(create_payload()))
            .await
            .unwrap();
        assert_eq!(host.approved(), vec![100]);
    }

    #[tokio::test]
    async fn update_matches_by_exact_name_set() {
        let registry = registered(JobContext::default()).await;
        let host = Arc::new(RecordingHost::new());
        let open_prs = Arc::new(OpenPrSet::new());
        open_prs.seed(vec![open_pr(7, &["lodash", "react"])]).await;
        let processor =
            OutputProcessor::new(registry.clone(), host.clone(), open_prs, false);

        let payload: UpdatePullRequestPayload = serde_json::from_value(serde_json::json!({
            "dependency-names": ["react", "lodash"],
            "updated-dependency-files": []
        }))
        .unwrap();
        processor
            .handle(JOB, UpdateOutput::UpdatePullRequest(payload))
            .await
            .unwrap();

        let updated = host.updated();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].pr_id, 7);
        assert_eq!(registry.affected(JOB).await.unwrap().updated, vec![7]);
    }

    #[tokio::test]
    async fn update_without_matching_pr_is_a_hard_failure() {
        let registry = registered(JobContext::default()).await;
        let host = Arc::new(RecordingHost::new());
        let open_prs = Arc::new(OpenPrSet::new());
        open_prs.seed(vec![open_pr(7, &["lodash", "react"])]).await;
        let processor = OutputProcessor::new(registry, host.clone(), open_prs, false);

        // Subset of the PR's names is not a match.
        let payload: UpdatePullRequestPayload = serde_json::from_value(serde_json::json!({
            "dependency-names": ["lodash"]
        }))
        .unwrap();
        assert!(
            processor
                .handle(JOB, UpdateOutput::UpdatePullRequest(payload))
                .await
                .is_err()
        );
        assert!(host.updated().is_empty());
    }

    #[tokio::test]
    async fn close_removes_pr_from_snapshot() {
        let registry = registered(JobContext::default()).await;
        let host = Arc::new(RecordingHost::new());
        let open_prs = Arc::new(OpenPrSet::new());
        open_prs.seed(vec![open_pr(9, &["left-pad"])]).await;
        let processor =
            OutputProcessor::new(registry.clone(), host.clone(), open_prs.clone(), false);

        let payload: ClosePullRequestPayload = serde_json::from_value(serde_json::json!({
            "dependency-names": ["left-pad"],
            "reason": "dependency_removed"
        }))
        .unwrap();
        processor
            .handle(JOB, UpdateOutput::ClosePullRequest(payload))
            .await
            .unwrap();

        let abandoned = host.abandoned();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].pr_id, 9);
        assert!(abandoned[0].delete_source_branch);
        assert_eq!(registry.affected(JOB).await.unwrap().closed, vec![9]);
        assert_eq!(open_prs.count_for("npm_and_yarn").await, 0);
    }

    #[tokio::test]
    async fn bookkeeping_kinds_always_succeed() {
        let registry = registered(JobContext::default()).await;
        let host = Arc::new(RecordingHost::new());
        let processor = OutputProcessor::new(
            registry.clone(),
            host,
            Arc::new(OpenPrSet::new()),
            false,
        );

        for output in [
            UpdateOutput::MarkAsProcessed(
                serde_json::from_value(serde_json::json!({"base-commit-sha": "abc"})).unwrap(),
            ),
            UpdateOutput::RecordEcosystemVersions(serde_json::json!({"node": "22"})),
            UpdateOutput::RecordEcosystemMeta(serde_json::json!({})),
            UpdateOutput::RecordMetrics(serde_json::json!([])),
            UpdateOutput::IncrementMetric(
                serde_json::from_value(serde_json::json!({"metric": "updater.started"})).unwrap(),
            ),
            UpdateOutput::Unknown {
                kind: "record_shiny_new_thing".to_string(),
            },
        ] {
            processor.handle(JOB, output).await.unwrap();
        }
    }

    #[tokio::test]
    async fn dependency_list_is_stored_on_the_job() {
        let registry = registered(JobContext::default()).await;
        let processor = OutputProcessor::new(
            registry.clone(),
            Arc::new(RecordingHost::new()),
            Arc::new(OpenPrSet::new()),
            false,
        );

        let payload = serde_json::from_value(serde_json::json!({
            "dependencies": [{"name": "lodash", "version": "4.17.20"}],
            "dependency_files": ["/package.json"]
        }))
        .unwrap();
        processor
            .handle(JOB, UpdateOutput::UpdateDependencyList(payload))
            .await
            .unwrap();

        let cleared = registry.clear(JOB).await.unwrap();
        let list = cleared.dependency_list.unwrap();
        assert_eq!(list[0].name, "lodash");
    }

    #[tokio::test]
    async fn job_error_fails_and_is_recorded() {
        let registry = registered(JobContext::default()).await;
        let processor = OutputProcessor::new(
            registry.clone(),
            Arc::new(RecordingHost::new()),
            Arc::new(OpenPrSet::new()),
            false,
        );

        let payload = serde_json::from_value(serde_json::json!({
            "error-type": "job_repo_not_found",
            "error-details": {"message": "gone"}
        }))
        .unwrap();
        assert!(
            processor
                .handle(JOB, UpdateOutput::RecordUpdateJobError(payload))
                .await
                .is_err()
        );

        let cleared = registry.clear(JOB).await.unwrap();
        assert_eq!(cleared.error.unwrap().error_type, "job_repo_not_found");
    }
}
