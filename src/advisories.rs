//! Security-advisory sources.
//!
//! A [`Vulnerability`] names a dependency and the version ranges it
//! affects. Sources are additive: the scheduler concatenates whatever each
//! configured source returns. Two sources exist: a local JSON file and the
//! GitHub Advisory Database REST API.
//!
//! Version matching is deliberately simple string comparison over dotted
//! numeric versions with `<`, `<=`, `>`, `>=`, `=` and bare-equality
//! requirements. Anything it cannot parse is treated as matching, so an
//! exotic range errs toward running the update job rather than silently
//! skipping a vulnerable dependency.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::job::spec::SecurityAdvisory;

/// One known vulnerability for one dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Vulnerability {
    pub dependency_name: String,
    #[serde(default)]
    pub affected_versions: Vec<String>,
    #[serde(default)]
    pub patched_versions: Vec<String>,
    #[serde(default)]
    pub unaffected_versions: Vec<String>,
}

impl Vulnerability {
    /// Does the given installed version fall in an affected range?
    pub fn affects(&self, version: &str) -> bool {
        if self
            .unaffected_versions
            .iter()
            .any(|req| requirement_matches(req, version))
        {
            return false;
        }
        if self.affected_versions.is_empty() {
            // An advisory with no affected range applies to every version
            // that is not explicitly patched or unaffected.
            return !self
                .patched_versions
                .iter()
                .any(|req| requirement_matches(req, version));
        }
        self.affected_versions
            .iter()
            .any(|req| requirement_matches(req, version))
    }

    pub fn into_advisory(self) -> SecurityAdvisory {
        SecurityAdvisory {
            dependency_name: self.dependency_name,
            affected_versions: self.affected_versions,
            patched_versions: self.patched_versions,
            unaffected_versions: self.unaffected_versions,
        }
    }
}

/// Where advisories come from.
#[async_trait]
pub trait AdvisorySource: Send + Sync {
    /// Advisories for the given ecosystem, restricted to the named
    /// packages when the source supports filtering.
    async fn fetch(&self, ecosystem: &str, packages: &[String]) -> Result<Vec<Vulnerability>>;
}

/// Advisories loaded from a local JSON file: a flat array of
/// [`Vulnerability`] records. Ecosystem filtering does not apply; the file
/// is assumed to be curated for the repository it sits next to.
pub struct FileAdvisorySource {
    path: std::path::PathBuf,
}

impl FileAdvisorySource {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl AdvisorySource for FileAdvisorySource {
    async fn fetch(&self, _ecosystem: &str, packages: &[String]) -> Result<Vec<Vulnerability>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read advisory file {}", self.path.display()))?;
        let all: Vec<Vulnerability> =
            serde_json::from_str(&raw).context("Failed to parse advisory file")?;
        Ok(all
            .into_iter()
            .filter(|vuln| {
                packages.is_empty() || packages.contains(&vuln.dependency_name)
            })
            .collect())
    }
}

/// GitHub Advisory Database query, one request per package.
pub struct GitHubAdvisorySource {
    client: reqwest::Client,
    api_endpoint: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhAdvisory {
    #[serde(default)]
    vulnerabilities: Vec<GhVulnerability>,
}

#[derive(Debug, Deserialize)]
struct GhVulnerability {
    package: Option<GhPackage>,
    #[serde(default)]
    vulnerable_version_range: Option<String>,
    #[serde(default)]
    first_patched_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhPackage {
    name: String,
}

impl GitHubAdvisorySource {
    pub fn new(api_endpoint: &str, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_endpoint: api_endpoint.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Advisory-database ecosystem label for a package-manager name.
    fn gh_ecosystem(ecosystem: &str) -> &str {
        match ecosystem {
            "npm_and_yarn" => "npm",
            "go_modules" => "go",
            "github_actions" => "actions",
            "bundler" => "rubygems",
            "cargo" => "rust",
            "pip" => "pip",
            "hex" => "erlang",
            other => other,
        }
    }
}

#[async_trait]
impl AdvisorySource for GitHubAdvisorySource {
    async fn fetch(&self, ecosystem: &str, packages: &[String]) -> Result<Vec<Vulnerability>> {
        let gh_ecosystem = Self::gh_ecosystem(ecosystem);
        let mut vulnerabilities = Vec::new();
        for package in packages {
            let mut request = self
                .client
                .get(format!("{}/advisories", self.api_endpoint))
                .header("User-Agent", "deputy-orchestrator")
                .header("Accept", "application/vnd.github+json")
                .query(&[("ecosystem", gh_ecosystem), ("affects", package)]);
            if let Some(token) = &self.token {
                request = request.header("Authorization", format!("Bearer {token}"));
            }
            let response = request
                .send()
                .await
                .context("Advisory database request failed")?;
            if !response.status().is_success() {
                warn!(
                    package = %package,
                    status = %response.status(),
                    "Advisory lookup failed, continuing without it"
                );
                continue;
            }
            let advisories: Vec<GhAdvisory> = response
                .json()
                .await
                .context("Failed to parse advisory response")?;
            for advisory in advisories {
                for vuln in advisory.vulnerabilities {
                    let Some(pkg) = vuln.package else { continue };
                    if &pkg.name != package {
                        continue;
                    }
                    vulnerabilities.push(Vulnerability {
                        dependency_name: pkg.name,
                        affected_versions: vuln
                            .vulnerable_version_range
                            .map(|range| {
                                range.split(',').map(|r| r.trim().to_string()).collect()
                            })
                            .unwrap_or_default(),
                        patched_versions: vuln
                            .first_patched_version
                            .map(|v| vec![format!(">= {v}")])
                            .unwrap_or_default(),
                        unaffected_versions: Vec::new(),
                    });
                }
            }
        }
        debug!(
            ecosystem = %ecosystem,
            count = vulnerabilities.len(),
            "Fetched advisories"
        );
        Ok(vulnerabilities)
    }
}

/// Match a single version requirement against a version. Unparseable
/// requirements match (conservative toward running the job).
pub fn requirement_matches(requirement: &str, version: &str) -> bool {
    let requirement = requirement.trim();
    let (op, bound) = if let Some(rest) = requirement.strip_prefix("<=") {
        ("<=", rest)
    } else if let Some(rest) = requirement.strip_prefix(">=") {
        (">=", rest)
    } else if let Some(rest) = requirement.strip_prefix('<') {
        ("<", rest)
    } else if let Some(rest) = requirement.strip_prefix('>') {
        (">", rest)
    } else if let Some(rest) = requirement.strip_prefix('=') {
        ("=", rest)
    } else {
        ("=", requirement)
    };

    let (Some(version), Some(bound)) = (parse_version(version), parse_version(bound.trim()))
    else {
        return true;
    };
    match op {
        "<" => version < bound,
        "<=" => version <= bound,
        ">" => version > bound,
        ">=" => version >= bound,
        _ => version == bound,
    }
}

/// Dotted numeric version, ignoring any pre-release suffix.
fn parse_version(raw: &str) -> Option<Vec<u64>> {
    let core = raw.split(['-', '+']).next()?;
    let parts: Vec<u64> = core
        .split('.')
        .map(|p| p.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    if parts.is_empty() { None } else { Some(parts) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vuln(affected: &[&str], patched: &[&str], unaffected: &[&str]) -> Vulnerability {
        Vulnerability {
            dependency_name: "lodash".to_string(),
            affected_versions: affected.iter().map(|s| s.to_string()).collect(),
            patched_versions: patched.iter().map(|s| s.to_string()).collect(),
            unaffected_versions: unaffected.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn requirement_operators() {
        assert!(requirement_matches("< 4.17.21", "4.17.20"));
        assert!(!requirement_matches("< 4.17.21", "4.17.21"));
        assert!(requirement_matches("<= 4.17.21", "4.17.21"));
        assert!(requirement_matches(">= 1.0", "1.0.0"));
        assert!(requirement_matches("> 1.0", "1.0.1"));
        assert!(!requirement_matches("> 1.0", "1.0"));
        assert!(requirement_matches("= 2.3.4", "2.3.4"));
        assert!(requirement_matches("2.3.4", "2.3.4"));
        assert!(!requirement_matches("2.3.4", "2.3.5"));
    }

    #[test]
    fn multi_component_comparison_is_numeric_not_lexicographic() {
        assert!(requirement_matches("< 4.10.0", "4.9.1"));
        assert!(!requirement_matches("< 4.10.0", "4.10.0"));
        assert!(requirement_matches("< 10.0.0", "9.99.99"));
    }

    #[test]
    fn unparseable_requirement_matches() {
        assert!(requirement_matches("~> 1.2", "1.2.3"));
        assert!(requirement_matches("< 1.x", "0.9"));
    }

    #[test]
    fn pre_release_suffix_is_ignored() {
        assert!(requirement_matches("< 2.0.0", "1.9.0-beta.1"));
    }

    #[test]
    fn affects_honours_unaffected_over_affected() {
        let v = vuln(&["< 5.0.0"], &[], &["= 4.17.21"]);
        assert!(v.affects("4.17.20"));
        assert!(!v.affects("4.17.21"));
    }

    #[test]
    fn empty_affected_range_means_everything_unpatched() {
        let v = vuln(&[], &[">= 4.17.21"], &[]);
        assert!(v.affects("4.17.20"));
        assert!(!v.affects("4.17.21"));
        assert!(!v.affects("5.0.0"));
    }

    #[tokio::test]
    async fn file_source_filters_to_requested_packages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("advisories.json");
        std::fs::write(
            &path,
            serde_json::json!([
                {"dependency-name": "lodash", "affected-versions": ["< 4.17.21"]},
                {"dependency-name": "react", "affected-versions": ["< 18.0.0"]}
            ])
            .to_string(),
        )
        .unwrap();

        let source = FileAdvisorySource::new(&path);
        let found = source
            .fetch("npm_and_yarn", &["lodash".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].dependency_name, "lodash");

        // No package filter returns everything.
        let all = source.fetch("npm_and_yarn", &[]).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn vulnerability_converts_to_job_advisory() {
        let advisory = vuln(&["< 4.17.21"], &[">= 4.17.21"], &[]).into_advisory();
        assert_eq!(advisory.dependency_name, "lodash");
        assert_eq!(advisory.affected_versions, vec!["< 4.17.21"]);
        assert_eq!(advisory.patched_versions, vec![">= 4.17.21"]);
    }

    #[test]
    fn gh_ecosystem_mapping() {
        assert_eq!(GitHubAdvisorySource::gh_ecosystem("npm_and_yarn"), "npm");
        assert_eq!(GitHubAdvisorySource::gh_ecosystem("go_modules"), "go");
        assert_eq!(GitHubAdvisorySource::gh_ecosystem("cargo"), "rust");
        assert_eq!(GitHubAdvisorySource::gh_ecosystem("composer"), "composer");
    }
}
