//! Updater output events and the PR state machine that consumes them.
//!
//! | Module      | Responsibility                                          |
//! |-------------|---------------------------------------------------------|
//! | `metadata`  | Persisted PR dependency descriptor (host property blob) |
//! | `supersede` | "Does this new PR replace that open one?" decision      |
//! | `branch`    | Deterministic source-branch naming + collision check    |
//! | `processor` | Event → pull-request action state machine               |
//!
//! Each output the updater reports is one of a closed set of kinds, with
//! one validated payload type per kind. [`UpdateOutput::parse`] is the
//! single entry point the control-plane routes go through; unrecognized
//! kinds deserialize to [`UpdateOutput::Unknown`] and are accepted for
//! forward compatibility.

pub mod branch;
pub mod metadata;
pub mod processor;
pub mod supersede;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A file the updater changed, as carried in PR payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DependencyFile {
    pub name: String,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_encoding: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub operation: Option<String>,
}

/// A dependency as it appears in a create-PR payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PayloadDependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub previous_version: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyGroupRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CreatePullRequestPayload {
    #[serde(default)]
    pub base_commit_sha: Option<String>,
    pub dependencies: Vec<PayloadDependency>,
    #[serde(default)]
    pub updated_dependency_files: Vec<DependencyFile>,
    pub pr_title: String,
    #[serde(default)]
    pub pr_body: Option<String>,
    #[serde(default)]
    pub commit_message: Option<String>,
    #[serde(default)]
    pub dependency_group: Option<DependencyGroupRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdatePullRequestPayload {
    #[serde(default)]
    pub base_commit_sha: Option<String>,
    pub dependency_names: Vec<String>,
    #[serde(default)]
    pub updated_dependency_files: Vec<DependencyFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClosePullRequestPayload {
    pub dependency_names: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// One dependency the updater discovered, reported by
/// `update_dependency_list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedDependency {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDependencyListPayload {
    #[serde(default)]
    pub dependencies: Vec<ReportedDependency>,
    #[serde(default)]
    pub dependency_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MarkAsProcessedPayload {
    #[serde(default)]
    pub base_commit_sha: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecordErrorPayload {
    pub error_type: String,
    #[serde(default)]
    pub error_details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncrementMetricPayload {
    pub metric: String,
    #[serde(default)]
    pub tags: BTreeMap<String, serde_json::Value>,
}

/// One reported output, tagged by kind with its validated payload.
#[derive(Debug, Clone)]
pub enum UpdateOutput {
    CreatePullRequest(CreatePullRequestPayload),
    UpdatePullRequest(UpdatePullRequestPayload),
    ClosePullRequest(ClosePullRequestPayload),
    UpdateDependencyList(UpdateDependencyListPayload),
    MarkAsProcessed(MarkAsProcessedPayload),
    RecordEcosystemVersions(serde_json::Value),
    RecordEcosystemMeta(serde_json::Value),
    IncrementMetric(IncrementMetricPayload),
    RecordMetrics(serde_json::Value),
    RecordUpdateJobError(RecordErrorPayload),
    RecordUpdateJobUnknownError(RecordErrorPayload),
    /// Forward-compatibility default: logged and accepted.
    Unknown { kind: String },
}

impl UpdateOutput {
    /// Parse the `data` member of an output request for the given kind.
    /// Shape mismatches surface as errors (HTTP 400 at the API boundary);
    /// unknown kinds are accepted as [`UpdateOutput::Unknown`].
    pub fn parse(kind: &str, data: serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            "create_pull_request" => Self::CreatePullRequest(serde_json::from_value(data)?),
            "update_pull_request" => Self::UpdatePullRequest(serde_json::from_value(data)?),
            "close_pull_request" => Self::ClosePullRequest(serde_json::from_value(data)?),
            "update_dependency_list" => Self::UpdateDependencyList(serde_json::from_value(data)?),
            "mark_as_processed" => Self::MarkAsProcessed(serde_json::from_value(data)?),
            "record_ecosystem_versions" => Self::RecordEcosystemVersions(data),
            "record_ecosystem_meta" => Self::RecordEcosystemMeta(data),
            "increment_metric" => Self::IncrementMetric(serde_json::from_value(data)?),
            "record_metrics" => Self::RecordMetrics(data),
            "record_update_job_error" => Self::RecordUpdateJobError(serde_json::from_value(data)?),
            "record_update_job_unknown_error" => {
                Self::RecordUpdateJobUnknownError(serde_json::from_value(data)?)
            }
            other => Self::Unknown {
                kind: other.to_string(),
            },
        })
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::CreatePullRequest(_) => "create_pull_request",
            Self::UpdatePullRequest(_) => "update_pull_request",
            Self::ClosePullRequest(_) => "close_pull_request",
            Self::UpdateDependencyList(_) => "update_dependency_list",
            Self::MarkAsProcessed(_) => "mark_as_processed",
            Self::RecordEcosystemVersions(_) => "record_ecosystem_versions",
            Self::RecordEcosystemMeta(_) => "record_ecosystem_meta",
            Self::IncrementMetric(_) => "increment_metric",
            Self::RecordMetrics(_) => "record_metrics",
            Self::RecordUpdateJobError(_) => "record_update_job_error",
            Self::RecordUpdateJobUnknownError(_) => "record_update_job_unknown_error",
            Self::Unknown { kind } => kind,
        }
    }
}
