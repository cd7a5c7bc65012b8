//! Orchestrator-facing configuration types.
//!
//! Discovery and validation of the declarative config file belong to an
//! external collaborator; this module only models the already-validated
//! data the scheduler and job builder consume, plus a thin YAML loader
//! used by the binary.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default open-PR limit when an update block does not set one.
pub const DEFAULT_OPEN_PR_LIMIT: u32 = 5;

/// One configured package-manager update policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdateBlock {
    pub package_ecosystem: String,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub directories: Vec<String>,
    /// `Some(0)` marks a security-only block: only vulnerability-driven
    /// changes are proposed.
    #[serde(default)]
    pub open_pull_requests_limit: Option<u32>,
    #[serde(default)]
    pub allow: Vec<AllowRule>,
    #[serde(default)]
    pub ignore: Vec<IgnoreRule>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupConfig>,
    #[serde(default)]
    pub cooldown: Option<Cooldown>,
    #[serde(default)]
    pub versioning_strategy: Option<String>,
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default)]
    pub pull_request_branch_name: Option<BranchNameOptions>,
}

impl UpdateBlock {
    /// Effective open-PR limit for this block.
    pub fn open_pr_limit(&self) -> u32 {
        self.open_pull_requests_limit
            .unwrap_or(DEFAULT_OPEN_PR_LIMIT)
    }

    /// A limit of exactly zero means "security updates only".
    pub fn security_only(&self) -> bool {
        self.open_pull_requests_limit == Some(0)
    }

    /// The directory the block targets, defaulting to the repo root.
    pub fn primary_directory(&self) -> &str {
        self.directory
            .as_deref()
            .or_else(|| self.directories.first().map(String::as_str))
            .unwrap_or("/")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AllowRule {
    #[serde(default)]
    pub dependency_name: Option<String>,
    #[serde(default)]
    pub dependency_type: Option<String>,
    #[serde(default)]
    pub update_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IgnoreRule {
    pub dependency_name: String,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub update_types: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupConfig {
    #[serde(default)]
    pub applies_to: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub update_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cooldown {
    #[serde(default)]
    pub default_days: Option<u32>,
    #[serde(default)]
    pub semver_major_days: Option<u32>,
    #[serde(default)]
    pub semver_minor_days: Option<u32>,
    #[serde(default)]
    pub semver_patch_days: Option<u32>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BranchNameOptions {
    #[serde(default)]
    pub separator: Option<String>,
}

/// Where the repository under update lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceDescriptor {
    /// Host kind, e.g. `github` or `azure`.
    pub provider: String,
    pub hostname: String,
    pub api_endpoint: String,
    /// `owner/repo` style slug.
    pub repo: String,
}

/// A configured package registry; turned into a job credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RegistryConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The full parsed input the orchestrator receives from the config
/// provider. Treated as already validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrchestratorConfig {
    pub source: SourceDescriptor,
    pub updates: Vec<UpdateBlock>,
    #[serde(default)]
    pub registries: BTreeMap<String, RegistryConfig>,
    #[serde(default)]
    pub experiments: BTreeMap<String, String>,
    #[serde(default)]
    pub enable_beta_ecosystems: bool,
}

impl OrchestratorConfig {
    /// Load the parsed configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
source:
  provider: github
  hostname: github.com
  api-endpoint: https://api.github.com
  repo: acme/widgets
updates:
  - package-ecosystem: npm
    directory: /
  - package-ecosystem: pip
    open-pull-requests-limit: 0
    groups:
      dev-tools:
        patterns: []
"#
    }

    #[test]
    fn loads_minimal_config() {
        let cfg: OrchestratorConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert_eq!(cfg.source.repo, "acme/widgets");
        assert_eq!(cfg.updates.len(), 2);
        assert_eq!(cfg.updates[0].package_ecosystem, "npm");
        assert!(cfg.registries.is_empty());
    }

    #[test]
    fn open_pr_limit_defaults_to_five() {
        let cfg: OrchestratorConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert_eq!(cfg.updates[0].open_pr_limit(), DEFAULT_OPEN_PR_LIMIT);
        assert!(!cfg.updates[0].security_only());
    }

    #[test]
    fn zero_limit_marks_security_only() {
        let cfg: OrchestratorConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert_eq!(cfg.updates[1].open_pr_limit(), 0);
        assert!(cfg.updates[1].security_only());
    }

    #[test]
    fn primary_directory_falls_back_to_root() {
        let block: UpdateBlock = serde_yaml::from_str("package-ecosystem: cargo").unwrap();
        assert_eq!(block.primary_directory(), "/");

        let block: UpdateBlock = serde_yaml::from_str(
            "package-ecosystem: cargo\ndirectories: [\"/svc\", \"/cli\"]",
        )
        .unwrap();
        assert_eq!(block.primary_directory(), "/svc");
    }

    #[test]
    fn load_rejects_invalid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deputy.yml");
        std::fs::write(&path, "updates: {{{{").unwrap();
        assert!(OrchestratorConfig::load(&path).is_err());
    }
}
