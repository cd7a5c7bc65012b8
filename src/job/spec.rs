//! Job descriptor wire model.
//!
//! A [`JobSpec`] is the full specification handed to the containerized
//! updater: it is written to `job.json` before the fetch phase and served
//! back verbatim from the control-plane `details` endpoint. Immutable once
//! built. Top-level fields use the updater's snake_case convention; rule
//! objects are kebab-cased, matching the worker contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::outputs::metadata::PrDependency;

/// Default ceiling for one updater run, in seconds.
pub const DEFAULT_MAX_UPDATER_RUN_TIME: u64 = 2700;

/// Keys of credential fields that are safe to expose to the updater as
/// `credentials_metadata` (everything else is a secret).
const NON_SECRET_CREDENTIAL_KEYS: &[&str] =
    &["type", "host", "url", "registry", "replaces-base", "index-url"];

/// An opaque registry or git-source credential, scoped to one job.
pub type Credential = BTreeMap<String, serde_json::Value>;

/// Strip secret fields from a credential set, leaving only the metadata
/// the updater may see inside the job descriptor.
pub fn credentials_metadata(credentials: &[Credential]) -> Vec<Credential> {
    credentials
        .iter()
        .map(|cred| {
            cred.iter()
                .filter(|(key, _)| NON_SECRET_CREDENTIAL_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .collect()
}

/// Secret string values of a credential (everything not in the metadata
/// allow-list). These are registered with the redactor at fetch time.
pub fn credential_secrets(credentials: &[Credential]) -> Vec<String> {
    credentials
        .iter()
        .flat_map(|cred| cred.iter())
        .filter(|(key, _)| !NON_SECRET_CREDENTIAL_KEYS.contains(&key.as_str()))
        .filter_map(|(_, value)| value.as_str().map(str::to_string))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AllowedUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_name: Option<String>,
    pub dependency_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_type: Option<String>,
}

impl AllowedUpdate {
    pub fn direct_all() -> Self {
        Self {
            dependency_name: None,
            dependency_type: "direct".to_string(),
            update_type: Some("all".to_string()),
        }
    }

    pub fn direct_security() -> Self {
        Self {
            dependency_name: None,
            dependency_type: "direct".to_string(),
            update_type: Some("security".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IgnoreCondition {
    pub dependency_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub version_requirement: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SecurityAdvisory {
    pub dependency_name: String,
    #[serde(default)]
    pub affected_versions: Vec<String>,
    #[serde(default)]
    pub patched_versions: Vec<String>,
    #[serde(default)]
    pub unaffected_versions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupRules {
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub update_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DependencyGroup {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applies_to: Option<String>,
    pub rules: GroupRules,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupPullRequest {
    pub dependency_group_name: String,
    pub dependencies: Vec<PrDependency>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobSource {
    pub provider: String,
    pub hostname: String,
    pub api_endpoint: String,
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub directories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobCooldown {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semver_major_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semver_minor_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semver_patch_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// The full job specification handed to one updater run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Process-unique 10-digit job id.
    pub id: String,
    pub package_manager: String,
    pub source: JobSource,
    /// `None` means "consider everything the ecosystem discovers".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
    pub allowed_updates: Vec<AllowedUpdate>,
    #[serde(default)]
    pub ignore_conditions: Vec<IgnoreCondition>,
    #[serde(default)]
    pub dependency_groups: Vec<DependencyGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_group_to_refresh: Option<String>,
    #[serde(default)]
    pub security_advisories: Vec<SecurityAdvisory>,
    #[serde(default)]
    pub security_updates_only: bool,
    /// Snapshot of open ungrouped PRs, one dependency list per PR.
    #[serde(default)]
    pub existing_pull_requests: Vec<Vec<PrDependency>>,
    #[serde(default)]
    pub existing_group_pull_requests: Vec<GroupPullRequest>,
    /// True when this job refreshes/rebases a specific open PR rather than
    /// discovering new updates.
    #[serde(default)]
    pub updating_a_pull_request: bool,
    #[serde(default)]
    pub lockfile_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements_update_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<JobCooldown>,
    #[serde(default)]
    pub experiments: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub credentials_metadata: Vec<Credential>,
    pub max_updater_run_time: u64,
}

/// The `job.json` envelope written into the updater container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFile {
    pub job: JobSpec,
}
