//! Job scheduler: drives every configured update block, one at a time.
//!
//! For each block, in declared order:
//! 1. security-only blocks (limit 0) first run a discovery job, intersect
//!    the reported dependency list with known advisories, and short-circuit
//!    when nothing is vulnerable;
//! 2. normal blocks run one "update everything" job unless the open-PR
//!    limit is already met;
//! 3. then, outside dry-run, one refresh job per PR already open for the
//!    ecosystem.
//!
//! Every sub-job is registered (fresh tokens), executed, and cleared. A
//! failing sub-job marks its block's result as failed and the run moves on
//! to the next block; nothing short of a listener-bind failure aborts a
//! whole run.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::advisories::{AdvisorySource, Vulnerability};
use crate::config::{OrchestratorConfig, UpdateBlock};
use crate::errors::UpdaterError;
use crate::host::HostClient;
use crate::job::builder::{JobBuilder, UpdateJobInputs, generate_job_id};
use crate::job::registry::{AffectedPrs, ClearedJob, JobContext};
use crate::job::spec::{Credential, GroupPullRequest, JobSpec, SecurityAdvisory};
use crate::job::JobRegistry;
use crate::outputs::branch::{DEFAULT_SEPARATOR, ecosystem_branch_segment};
use crate::outputs::metadata::{
    PROPERTY_DEPENDENCIES, PROPERTY_PACKAGE_MANAGER, PrDependency, PrDescriptor,
};
use crate::outputs::processor::{OpenPrSet, OpenPullRequest};
use crate::runner::{JobAssignment, JobExecutor};

/// Registration retries before giving up on a colliding job id.
const MAX_ID_RETRIES: usize = 5;

/// Outcome of one update block.
#[derive(Debug, Clone)]
pub struct UpdateBlockResult {
    pub package_ecosystem: String,
    pub success: bool,
    pub message: String,
    pub affected_prs: AffectedPrs,
}

pub struct Scheduler {
    config: OrchestratorConfig,
    registry: Arc<JobRegistry>,
    host: Arc<dyn HostClient>,
    open_prs: Arc<OpenPrSet>,
    executor: Arc<dyn JobExecutor>,
    advisory_sources: Vec<Box<dyn AdvisorySource>>,
    api_url: String,
    /// Host identity whose open PRs belong to this orchestrator.
    pr_author: String,
    auto_approve: bool,
    dry_run: bool,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<JobRegistry>,
        host: Arc<dyn HostClient>,
        open_prs: Arc<OpenPrSet>,
        executor: Arc<dyn JobExecutor>,
        advisory_sources: Vec<Box<dyn AdvisorySource>>,
        api_url: String,
        pr_author: String,
        auto_approve: bool,
        dry_run: bool,
    ) -> Self {
        Self {
            config,
            registry,
            host,
            open_prs,
            executor,
            advisory_sources,
            api_url,
            pr_author,
            auto_approve,
            dry_run,
        }
    }

    /// Run every configured update block sequentially. Block failures are
    /// reported in the results, never propagated.
    pub async fn run(&self) -> anyhow::Result<Vec<UpdateBlockResult>> {
        self.seed_open_prs().await?;

        let mut results = Vec::with_capacity(self.config.updates.len());
        for block in &self.config.updates {
            info!(
                ecosystem = %block.package_ecosystem,
                directory = block.primary_directory(),
                "Processing update block"
            );
            let result = self.run_block(block).await;
            if !result.success {
                warn!(
                    ecosystem = %result.package_ecosystem,
                    message = %result.message,
                    "Update block failed"
                );
            }
            results.push(result);
        }
        Ok(results)
    }

    /// Recover the orchestrator's open PRs from the host's stored
    /// properties. Records without a parseable descriptor are skipped.
    async fn seed_open_prs(&self) -> anyhow::Result<()> {
        let records = self
            .host
            .get_active_pull_request_properties(&self.pr_author)
            .await?;
        let mut prs = Vec::with_capacity(records.len());
        for record in records {
            let Some(package_manager) = record.properties.get(PROPERTY_PACKAGE_MANAGER) else {
                continue;
            };
            let Some(raw) = record.properties.get(PROPERTY_DEPENDENCIES) else {
                continue;
            };
            match PrDescriptor::from_property_value(raw) {
                Ok(descriptor) => prs.push(OpenPullRequest {
                    pr_id: record.pr_id,
                    package_manager: package_manager.clone(),
                    source_branch: record.source_branch,
                    descriptor,
                }),
                Err(e) => warn!(
                    pr_id = record.pr_id,
                    error = %e,
                    "Skipping open PR with unparseable dependency metadata"
                ),
            }
        }
        info!(count = prs.len(), "Recovered open pull requests from host");
        self.open_prs.seed(prs).await;
        Ok(())
    }

    async fn run_block(&self, block: &UpdateBlock) -> UpdateBlockResult {
        if let Err(e) = validate_block(block) {
            return UpdateBlockResult {
                package_ecosystem: block.package_ecosystem.clone(),
                success: false,
                message: e.to_string(),
                affected_prs: AffectedPrs::default(),
            };
        }
        let package_manager = ecosystem_branch_segment(&block.package_ecosystem);
        let credentials = self.block_credentials();
        let mut affected = AffectedPrs::default();

        // Refresh targets are the PRs open before the main job runs; PRs
        // it creates are already up to date.
        let preexisting = self.open_prs.for_package_manager(&package_manager).await;

        let outcome = if block.security_only() {
            self.run_security_block(block, &credentials, &mut affected)
                .await
        } else {
            self.run_version_block(block, &credentials, &mut affected)
                .await
        };

        // Refresh every PR that was already open, regardless of how the
        // main job went; one stale PR should not stop rebases of the
        // others.
        let mut refresh_failures = Vec::new();
        if !self.dry_run {
            for pr in preexisting {
                // The main job may have closed or superseded this PR; a
                // refresh would then target a PR that no longer exists.
                if !self.open_prs.contains(pr.pr_id).await {
                    debug!(pr_id = pr.pr_id, "Skipping refresh of a pull request closed this run");
                    continue;
                }
                if let Err(e) = self
                    .refresh_pull_request(block, &credentials, &pr, &mut affected)
                    .await
                {
                    warn!(pr_id = pr.pr_id, error = %e, "Refresh job failed");
                    refresh_failures.push(pr.pr_id);
                }
            }
        }

        let (success, message) = match outcome {
            Ok(message) if refresh_failures.is_empty() => (true, message),
            Ok(_) => (
                false,
                format!("refresh failed for pull requests {refresh_failures:?}"),
            ),
            Err(e) => (false, e.to_string()),
        };
        UpdateBlockResult {
            package_ecosystem: block.package_ecosystem.clone(),
            success,
            message,
            affected_prs: affected,
        }
    }

    async fn run_version_block(
        &self,
        block: &UpdateBlock,
        credentials: &[Credential],
        affected: &mut AffectedPrs,
    ) -> Result<String, UpdaterError> {
        let package_manager = ecosystem_branch_segment(&block.package_ecosystem);
        let open = self.open_prs.count_for(&package_manager).await;
        if open >= block.open_pr_limit() as usize {
            info!(
                ecosystem = %block.package_ecosystem,
                open,
                limit = block.open_pr_limit(),
                "Open pull request limit already met, skipping update job"
            );
            return Ok(format!("open PR limit of {} already met", block.open_pr_limit()));
        }

        let advisories = self
            .fetch_advisories(&package_manager, &[])
            .await
            .into_iter()
            .map(Vulnerability::into_advisory)
            .collect::<Vec<_>>();
        let (existing, existing_groups) = self.existing_prs(&package_manager).await;

        let spec = self.builder(block).for_update(UpdateJobInputs {
            advisories: &advisories,
            existing_pull_requests: &existing,
            existing_group_pull_requests: &existing_groups,
            credentials,
            ..Default::default()
        });
        let cleared = self
            .run_sub_job(spec, self.block_context(block), credentials.to_vec())
            .await?;
        merge_affected(affected, &cleared.affected);
        Ok("update job completed".to_string())
    }

    async fn run_security_block(
        &self,
        block: &UpdateBlock,
        credentials: &[Credential],
        affected: &mut AffectedPrs,
    ) -> Result<String, UpdaterError> {
        let package_manager = ecosystem_branch_segment(&block.package_ecosystem);

        // Discovery first: a security-only job must be told which
        // dependencies are vulnerable, so enumerate what is installed.
        let discovery = self.builder(block).for_dependencies_list(None, credentials);
        let cleared = self
            .run_sub_job(discovery, self.block_context(block), credentials.to_vec())
            .await?;
        let Some(dependencies) = cleared.dependency_list else {
            return Err(UpdaterError::Other(anyhow::anyhow!(
                "discovery job reported no dependency list"
            )));
        };
        debug!(
            ecosystem = %block.package_ecosystem,
            count = dependencies.len(),
            "Discovery job enumerated dependencies"
        );

        let names: Vec<String> = dependencies.iter().map(|d| d.name.clone()).collect();
        let vulnerabilities = self.fetch_advisories(&package_manager, &names).await;
        let vulnerable: Vec<String> = dependencies
            .iter()
            .filter(|dep| {
                vulnerabilities.iter().any(|vuln| {
                    vuln.dependency_name == dep.name
                        && dep
                            .version
                            .as_deref()
                            .map(|v| vuln.affects(v))
                            .unwrap_or(true)
                })
            })
            .map(|dep| dep.name.clone())
            .collect();

        if vulnerable.is_empty() {
            info!(
                ecosystem = %block.package_ecosystem,
                "No vulnerable dependencies, nothing to update"
            );
            return Ok("no vulnerable dependencies".to_string());
        }
        info!(
            ecosystem = %block.package_ecosystem,
            vulnerable = ?vulnerable,
            "Running security update job"
        );

        let advisories: Vec<SecurityAdvisory> = vulnerabilities
            .into_iter()
            .map(Vulnerability::into_advisory)
            .collect();
        let (existing, existing_groups) = self.existing_prs(&package_manager).await;
        let spec = self.builder(block).for_update(UpdateJobInputs {
            advisories: &advisories,
            existing_pull_requests: &existing,
            existing_group_pull_requests: &existing_groups,
            vulnerable_dependencies: Some(vulnerable),
            credentials,
            ..Default::default()
        });
        let cleared = self
            .run_sub_job(spec, self.block_context(block), credentials.to_vec())
            .await?;
        merge_affected(affected, &cleared.affected);
        Ok("security update job completed".to_string())
    }

    async fn refresh_pull_request(
        &self,
        block: &UpdateBlock,
        credentials: &[Credential],
        pr: &OpenPullRequest,
        affected: &mut AffectedPrs,
    ) -> Result<(), UpdaterError> {
        debug!(pr_id = pr.pr_id, "Running refresh job");
        let package_manager = ecosystem_branch_segment(&block.package_ecosystem);
        let names = pr
            .descriptor
            .dependency_names()
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>();
        let advisories = self
            .fetch_advisories(&package_manager, &names)
            .await
            .into_iter()
            .map(Vulnerability::into_advisory)
            .collect::<Vec<_>>();
        let (existing, existing_groups) = self.existing_prs(&package_manager).await;
        let spec = self.builder(block).for_update(UpdateJobInputs {
            advisories: &advisories,
            existing_pull_requests: &existing,
            existing_group_pull_requests: &existing_groups,
            target_pull_request: Some(&pr.descriptor),
            credentials,
            ..Default::default()
        });
        let cleared = self
            .run_sub_job(spec, self.block_context(block), credentials.to_vec())
            .await?;
        merge_affected(affected, &cleared.affected);
        Ok(())
    }

    /// Register, execute and clear one job. The cleared state is returned
    /// even on failure paths that got far enough to produce one.
    async fn run_sub_job(
        &self,
        mut spec: JobSpec,
        context: JobContext,
        credentials: Vec<Credential>,
    ) -> Result<ClearedJob, UpdaterError> {
        let mut tokens = None;
        for attempt in 0..MAX_ID_RETRIES {
            match self
                .registry
                .register(spec.clone(), context.clone(), credentials.clone())
                .await
            {
                Ok(minted) => {
                    tokens = Some(minted);
                    break;
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Job id collision, regenerating");
                    spec.id = generate_job_id();
                }
            }
        }
        let Some(tokens) = tokens else {
            return Err(UpdaterError::Other(anyhow::anyhow!(
                "could not register job after {MAX_ID_RETRIES} id collisions"
            )));
        };

        let job_id = spec.id.clone();
        let assignment = JobAssignment {
            spec,
            tokens,
            api_url: self.api_url.clone(),
        };
        let executed = self.executor.execute(&assignment).await;
        let cleared = self.registry.clear(&job_id).await.unwrap_or_default();

        executed?;
        if let Some(error) = cleared.error {
            return Err(UpdaterError::JobReported {
                error_type: error.error_type,
            });
        }
        Ok(cleared)
    }

    async fn fetch_advisories(
        &self,
        package_manager: &str,
        packages: &[String],
    ) -> Vec<Vulnerability> {
        let mut all = Vec::new();
        for source in &self.advisory_sources {
            match source.fetch(package_manager, packages).await {
                Ok(mut found) => all.append(&mut found),
                // A broken source never blocks the run.
                Err(e) => warn!(error = %e, "Advisory source failed"),
            }
        }
        all
    }

    /// Split the snapshot for an ecosystem into the ungrouped and grouped
    /// shapes the job descriptor carries.
    async fn existing_prs(
        &self,
        package_manager: &str,
    ) -> (Vec<Vec<PrDependency>>, Vec<GroupPullRequest>) {
        let mut ungrouped = Vec::new();
        let mut grouped = Vec::new();
        for pr in self.open_prs.for_package_manager(package_manager).await {
            match pr.descriptor {
                PrDescriptor::Group {
                    dependency_group_name,
                    dependencies,
                } => grouped.push(GroupPullRequest {
                    dependency_group_name,
                    dependencies,
                }),
                PrDescriptor::Deps(dependencies) => ungrouped.push(dependencies),
            }
        }
        (ungrouped, grouped)
    }

    fn builder<'a>(&'a self, block: &'a UpdateBlock) -> JobBuilder<'a> {
        JobBuilder {
            block,
            source: &self.config.source,
            experiments: &self.config.experiments,
        }
    }

    fn block_context(&self, block: &UpdateBlock) -> JobContext {
        JobContext {
            open_pr_limit: block.open_pr_limit(),
            update_block_directory: block.directory.clone(),
            branch_separator: block
                .pull_request_branch_name
                .as_ref()
                .and_then(|o| o.separator.clone())
                .unwrap_or_else(|| DEFAULT_SEPARATOR.to_string()),
            target_branch: block.target_branch.clone(),
            auto_approve: self.auto_approve,
        }
    }

    /// Configured registries as job credentials. The repository token never
    /// appears here; the egress proxy injects it.
    fn block_credentials(&self) -> Vec<Credential> {
        self.config
            .registries
            .values()
            .map(|registry| {
                let mut cred: Credential = BTreeMap::new();
                cred.insert("type".to_string(), registry.kind.clone().into());
                if let Some(url) = &registry.url {
                    cred.insert("url".to_string(), url.clone().into());
                }
                for (key, value) in &registry.extra {
                    cred.insert(key.clone(), value.clone());
                }
                cred
            })
            .collect()
    }
}

/// Reject blocks the builder cannot produce a meaningful job for.
fn validate_block(block: &UpdateBlock) -> Result<(), UpdaterError> {
    if block.package_ecosystem.trim().is_empty() {
        return Err(UpdaterError::Build(
            "update block has no package-ecosystem".to_string(),
        ));
    }
    if block.directory.is_some() && !block.directories.is_empty() {
        return Err(UpdaterError::Build(
            "update block sets both directory and directories".to_string(),
        ));
    }
    Ok(())
}

fn merge_affected(into: &mut AffectedPrs, from: &AffectedPrs) {
    into.created.extend_from_slice(&from.created);
    into.updated.extend_from_slice(&from.updated);
    into.closed.extend_from_slice(&from.closed);
}
