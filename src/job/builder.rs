//! Job specification builder.
//!
//! Pure mapping from a declarative update block (plus optional
//! vulnerability and existing-PR data) to a fully-populated [`JobSpec`]
//! and its credential set. No I/O; deterministic except for the randomly
//! generated job id, whose uniqueness the caller verifies against the
//! active registry.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::config::{SourceDescriptor, UpdateBlock};
use crate::job::spec::{
    AllowedUpdate, Credential, DependencyGroup, GroupPullRequest, GroupRules, IgnoreCondition,
    JobCooldown, JobSource, JobSpec, SecurityAdvisory, credentials_metadata,
    DEFAULT_MAX_UPDATER_RUN_TIME,
};
use crate::outputs::branch::ecosystem_branch_segment;
use crate::outputs::metadata::{PrDependency, PrDescriptor};

/// Inputs shared by both builder operations.
pub struct JobBuilder<'a> {
    pub block: &'a UpdateBlock,
    pub source: &'a SourceDescriptor,
    pub experiments: &'a BTreeMap<String, String>,
}

/// Per-job inputs for [`JobBuilder::for_update`].
#[derive(Default)]
pub struct UpdateJobInputs<'a> {
    /// Supplied job id; a fresh random one is generated when absent.
    pub job_id: Option<String>,
    /// Known advisories for this ecosystem.
    pub advisories: &'a [SecurityAdvisory],
    /// Open ungrouped PRs for this ecosystem, one dependency list per PR.
    pub existing_pull_requests: &'a [Vec<PrDependency>],
    /// Open grouped PRs for this ecosystem.
    pub existing_group_pull_requests: &'a [GroupPullRequest],
    /// When refreshing a specific open PR, its persisted descriptor.
    pub target_pull_request: Option<&'a PrDescriptor>,
    /// Vulnerable dependency names from a prior discovery job
    /// (security-only mode discovering new work).
    pub vulnerable_dependencies: Option<Vec<String>>,
    /// Credentials scoped to this job; only their metadata enters the
    /// job descriptor.
    pub credentials: &'a [Credential],
}

impl<'a> JobBuilder<'a> {
    /// Build a full update job.
    pub fn for_update(&self, inputs: UpdateJobInputs<'_>) -> JobSpec {
        let security_only = self.block.security_only();

        let (dependencies, group_to_refresh, updating_a_pull_request) =
            match inputs.target_pull_request {
                Some(descriptor) => (
                    Some(
                        descriptor
                            .dependency_names()
                            .iter()
                            .map(|s| s.to_string())
                            .collect::<Vec<_>>(),
                    ),
                    descriptor.group_name().map(str::to_string),
                    true,
                ),
                None if security_only => (inputs.vulnerable_dependencies.clone(), None, false),
                None => (None, None, false),
            };

        // Advisory filtering is restricted to the dependencies the job
        // actually considers.
        let security_advisories = match &dependencies {
            Some(names) => inputs
                .advisories
                .iter()
                .filter(|advisory| names.iter().any(|n| *n == advisory.dependency_name))
                .cloned()
                .collect(),
            None => inputs.advisories.to_vec(),
        };

        JobSpec {
            id: inputs
                .job_id
                .unwrap_or_else(generate_job_id),
            package_manager: ecosystem_branch_segment(&self.block.package_ecosystem),
            source: self.job_source(),
            dependencies,
            allowed_updates: self.allowed_updates(security_only),
            ignore_conditions: self.ignore_conditions(),
            dependency_groups: self.dependency_groups(),
            dependency_group_to_refresh: group_to_refresh,
            security_advisories,
            security_updates_only: security_only,
            existing_pull_requests: inputs.existing_pull_requests.to_vec(),
            existing_group_pull_requests: inputs.existing_group_pull_requests.to_vec(),
            updating_a_pull_request,
            lockfile_only: self.block.versioning_strategy.as_deref() == Some("lockfile-only"),
            requirements_update_strategy: requirements_update_strategy(
                self.block.versioning_strategy.as_deref(),
            ),
            cooldown: self.cooldown(),
            experiments: coerce_experiments(self.experiments),
            credentials_metadata: credentials_metadata(inputs.credentials),
            max_updater_run_time: DEFAULT_MAX_UPDATER_RUN_TIME,
        }
    }

    /// Build a discovery job that performs no updates and only enumerates
    /// current dependencies. Used by security-only blocks, which must be
    /// told explicitly which dependencies are vulnerable.
    pub fn for_dependencies_list(
        &self,
        job_id: Option<String>,
        credentials: &[Credential],
    ) -> JobSpec {
        JobSpec {
            id: job_id.unwrap_or_else(generate_job_id),
            package_manager: ecosystem_branch_segment(&self.block.package_ecosystem),
            source: self.job_source(),
            dependencies: None,
            // Discovery is unrestricted; the ignore-everything condition is
            // what keeps the job from proposing updates.
            allowed_updates: vec![AllowedUpdate::direct_all()],
            ignore_conditions: vec![IgnoreCondition {
                dependency_name: "*".to_string(),
                version_requirement: Vec::new(),
                update_types: Vec::new(),
            }],
            dependency_groups: Vec::new(),
            dependency_group_to_refresh: None,
            security_advisories: Vec::new(),
            security_updates_only: false,
            existing_pull_requests: Vec::new(),
            existing_group_pull_requests: Vec::new(),
            updating_a_pull_request: false,
            lockfile_only: false,
            requirements_update_strategy: None,
            cooldown: None,
            experiments: coerce_experiments(self.experiments),
            credentials_metadata: credentials_metadata(credentials),
            max_updater_run_time: DEFAULT_MAX_UPDATER_RUN_TIME,
        }
    }

    fn job_source(&self) -> JobSource {
        JobSource {
            provider: self.source.provider.clone(),
            hostname: self.source.hostname.clone(),
            api_endpoint: self.source.api_endpoint.clone(),
            repo: self.source.repo.clone(),
            directory: self.block.directory.clone().or_else(|| {
                if self.block.directories.is_empty() {
                    Some("/".to_string())
                } else {
                    None
                }
            }),
            directories: self.block.directories.clone(),
            branch: self.block.target_branch.clone(),
        }
    }

    fn allowed_updates(&self, security_only: bool) -> Vec<AllowedUpdate> {
        if self.block.allow.is_empty() {
            return if security_only {
                vec![AllowedUpdate::direct_security()]
            } else {
                vec![AllowedUpdate::direct_all()]
            };
        }
        self.block
            .allow
            .iter()
            .map(|rule| AllowedUpdate {
                dependency_name: rule.dependency_name.clone(),
                dependency_type: rule
                    .dependency_type
                    .clone()
                    .unwrap_or_else(|| "direct".to_string()),
                update_type: rule.update_type.clone(),
            })
            .collect()
    }

    fn ignore_conditions(&self) -> Vec<IgnoreCondition> {
        self.block
            .ignore
            .iter()
            .map(|rule| IgnoreCondition {
                dependency_name: rule.dependency_name.clone(),
                version_requirement: rule.versions.clone(),
                update_types: rule.update_types.clone(),
            })
            .collect()
    }

    fn dependency_groups(&self) -> Vec<DependencyGroup> {
        self.block
            .groups
            .iter()
            .map(|(name, group)| DependencyGroup {
                name: name.clone(),
                applies_to: group.applies_to.clone(),
                rules: GroupRules {
                    patterns: if group.patterns.is_empty() {
                        vec!["*".to_string()]
                    } else {
                        group.patterns.clone()
                    },
                    exclude_patterns: group.exclude_patterns.clone(),
                    update_types: group.update_types.clone(),
                },
            })
            .collect()
    }

    fn cooldown(&self) -> Option<JobCooldown> {
        self.block.cooldown.as_ref().map(|c| JobCooldown {
            default_days: c.default_days,
            semver_major_days: c.semver_major_days,
            semver_minor_days: c.semver_minor_days,
            semver_patch_days: c.semver_patch_days,
            include: c.include.clone(),
            exclude: c.exclude.clone(),
        })
    }
}

/// Generate a random 10-digit job id from CSPRNG entropy. Not guaranteed
/// globally unique; the registry rejects collisions and the caller retries.
pub fn generate_job_id() -> String {
    let n = Uuid::new_v4().as_u128() % 9_000_000_000u128 + 1_000_000_000u128;
    n.to_string()
}

/// Map a configured versioning strategy to the updater's requirement
/// update strategy. `auto` (and absence) leave the updater's default.
fn requirements_update_strategy(versioning_strategy: Option<&str>) -> Option<String> {
    match versioning_strategy {
        None | Some("auto") => None,
        Some("lockfile-only") => Some("lockfile_only".to_string()),
        Some("widen") => Some("widen_ranges".to_string()),
        Some("increase") => Some("bump_versions".to_string()),
        Some("increase-if-necessary") => Some("bump_versions_if_necessary".to_string()),
        Some(other) => Some(other.replace('-', "_")),
    }
}

/// Coerce experiment values: boolean-looking strings become real booleans,
/// everything else passes through unchanged.
fn coerce_experiments(
    experiments: &BTreeMap<String, String>,
) -> BTreeMap<String, serde_json::Value> {
    experiments
        .iter()
        .map(|(key, value)| {
            let coerced = match value.as_str() {
                "true" => serde_json::Value::Bool(true),
                "false" => serde_json::Value::Bool(false),
                other => serde_json::Value::String(other.to_string()),
            };
            (key.clone(), coerced)
        })
        .collect()
}
