//! GitHub implementation of the host PR contract.
//!
//! Thin REST glue over the endpoints the orchestrator needs. GitHub has no
//! PR-scoped key/value store, so properties are embedded in (and parsed
//! back out of) an HTML comment at the end of the PR body.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::errors::HostError;

use super::{
    HostClient, PullRequestClose, PullRequestRecord, PullRequestSpec, PullRequestUpdate,
};

const METADATA_OPEN: &str = "<!-- deputy-metadata: ";
const METADATA_CLOSE: &str = " -->";
const USER_AGENT: &str = "deputy-orchestrator";

pub struct GitHubHost {
    client: reqwest::Client,
    api_endpoint: String,
    repo: String,
    token: String,
    /// Secondary identity used for auto-approval; a PR author cannot
    /// approve their own PR.
    approver_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct GitCommitResponse {
    tree: Option<TreeRef>,
}

#[derive(Debug, Deserialize)]
struct TreeRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ShaResponse {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: i64,
    body: Option<String>,
    head: HeadRef,
    user: Option<UserRef>,
}

#[derive(Debug, Deserialize)]
struct HeadRef {
    #[serde(rename = "ref")]
    branch: String,
}

#[derive(Debug, Deserialize)]
struct UserRef {
    login: String,
}

impl GitHubHost {
    pub fn new(api_endpoint: &str, repo: &str, token: &str, approver_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_endpoint: api_endpoint.trim_end_matches('/').to_string(),
            repo: repo.to_string(),
            token: token.to_string(),
            approver_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}", self.api_endpoint, self.repo, path)
    }

    fn request(&self, method: reqwest::Method, url: String, token: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }

    async fn branch_sha(&self, branch: &str) -> Result<String, HostError> {
        let resp: RefResponse = self
            .request(
                reqwest::Method::GET,
                self.url(&format!("git/ref/heads/{}", branch)),
                &self.token,
            )
            .send()
            .await
            .context("Failed to resolve branch ref")?
            .error_for_status()
            .map_err(|e| HostError::Api(e.to_string()))?
            .json()
            .await
            .context("Failed to parse branch ref response")?;
        Ok(resp.object.sha)
    }

    /// Push the changed files as one commit on `branch`, branching off
    /// `base_sha`. Returns the new commit sha.
    async fn push_commit(
        &self,
        branch: &str,
        base_sha: &str,
        commit_message: &str,
        files: &[crate::outputs::DependencyFile],
        new_branch: bool,
    ) -> Result<String, HostError> {
        let base_commit: GitCommitResponse = self
            .request(
                reqwest::Method::GET,
                self.url(&format!("git/commits/{}", base_sha)),
                &self.token,
            )
            .send()
            .await
            .context("Failed to fetch base commit")?
            .error_for_status()
            .map_err(|e| HostError::Api(e.to_string()))?
            .json()
            .await
            .context("Failed to parse base commit")?;

        let mut tree_entries = Vec::new();
        for file in files {
            let path = file_path(file);
            if file.deleted {
                tree_entries.push(json!({
                    "path": path, "mode": "100644", "type": "blob", "sha": null
                }));
                continue;
            }
            let Some(content) = &file.content else {
                continue;
            };
            let encoding = file.content_encoding.as_deref().unwrap_or("utf-8");
            let blob: ShaResponse = self
                .request(reqwest::Method::POST, self.url("git/blobs"), &self.token)
                .json(&json!({"content": content, "encoding": encoding}))
                .send()
                .await
                .context("Failed to create blob")?
                .error_for_status()
                .map_err(|e| HostError::Api(e.to_string()))?
                .json()
                .await
                .context("Failed to parse blob response")?;
            tree_entries.push(json!({
                "path": path, "mode": "100644", "type": "blob", "sha": blob.sha
            }));
        }

        let tree: ShaResponse = self
            .request(reqwest::Method::POST, self.url("git/trees"), &self.token)
            .json(&json!({
                "base_tree": base_commit.tree.map(|t| t.sha),
                "tree": tree_entries
            }))
            .send()
            .await
            .context("Failed to create tree")?
            .error_for_status()
            .map_err(|e| HostError::Api(e.to_string()))?
            .json()
            .await
            .context("Failed to parse tree response")?;

        let commit: ShaResponse = self
            .request(reqwest::Method::POST, self.url("git/commits"), &self.token)
            .json(&json!({
                "message": commit_message,
                "tree": tree.sha,
                "parents": [base_sha]
            }))
            .send()
            .await
            .context("Failed to create commit")?
            .error_for_status()
            .map_err(|e| HostError::Api(e.to_string()))?
            .json()
            .await
            .context("Failed to parse commit response")?;

        if new_branch {
            self.request(reqwest::Method::POST, self.url("git/refs"), &self.token)
                .json(&json!({
                    "ref": format!("refs/heads/{}", branch),
                    "sha": commit.sha
                }))
                .send()
                .await
                .context("Failed to create branch ref")?
                .error_for_status()
                .map_err(|e| HostError::Api(e.to_string()))?;
        } else {
            self.request(
                reqwest::Method::PATCH,
                self.url(&format!("git/refs/heads/{}", branch)),
                &self.token,
            )
            .json(&json!({"sha": commit.sha, "force": true}))
            .send()
            .await
            .context("Failed to move branch ref")?
            .error_for_status()
            .map_err(|e| HostError::Api(e.to_string()))?;
        }

        Ok(commit.sha)
    }
}

fn file_path(file: &crate::outputs::DependencyFile) -> String {
    let dir = file
        .directory
        .as_deref()
        .unwrap_or("/")
        .trim_matches('/');
    let name = file.name.trim_start_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Append the property map to a PR body as a parseable trailer.
fn body_with_properties(body: &str, properties: &[(String, String)]) -> String {
    let map: HashMap<&str, &str> = properties
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    match serde_json::to_string(&map) {
        Ok(encoded) => format!("{}\n\n{}{}{}", body, METADATA_OPEN, encoded, METADATA_CLOSE),
        Err(_) => body.to_string(),
    }
}

/// Recover the property map embedded by [`body_with_properties`].
fn properties_from_body(body: &str) -> HashMap<String, String> {
    let Some(start) = body.rfind(METADATA_OPEN) else {
        return HashMap::new();
    };
    let rest = &body[start + METADATA_OPEN.len()..];
    let Some(end) = rest.find(METADATA_CLOSE) else {
        return HashMap::new();
    };
    serde_json::from_str(&rest[..end]).unwrap_or_default()
}

#[async_trait]
impl HostClient for GitHubHost {
    async fn create_pull_request(
        &self,
        spec: PullRequestSpec,
    ) -> Result<Option<i64>, HostError> {
        let base_sha = match &spec.base_commit_sha {
            Some(sha) => sha.clone(),
            None => self.branch_sha(&spec.target_branch).await?,
        };
        self.push_commit(
            &spec.source_branch,
            &base_sha,
            &spec.commit_message,
            &spec.changed_files,
            true,
        )
        .await?;

        let pull: PullResponse = self
            .request(reqwest::Method::POST, self.url("pulls"), &self.token)
            .json(&json!({
                "title": spec.title,
                "body": body_with_properties(&spec.description, &spec.properties),
                "head": spec.source_branch,
                "base": spec.target_branch
            }))
            .send()
            .await
            .context("Failed to create pull request")?
            .error_for_status()
            .map_err(|e| HostError::Api(e.to_string()))?
            .json()
            .await
            .context("Failed to parse pull request response")?;

        Ok(Some(pull.number))
    }

    async fn update_pull_request(&self, update: PullRequestUpdate) -> Result<bool, HostError> {
        let base_sha = match &update.base_commit_sha {
            Some(sha) => sha.clone(),
            None => self.branch_sha(&update.source_branch).await?,
        };
        self.push_commit(
            &update.source_branch,
            &base_sha,
            &update.commit_message,
            &update.changed_files,
            false,
        )
        .await?;
        Ok(true)
    }

    async fn abandon_pull_request(&self, close: PullRequestClose) -> Result<bool, HostError> {
        if let Some(comment) = &close.comment {
            let _ = self
                .request(
                    reqwest::Method::POST,
                    self.url(&format!("issues/{}/comments", close.pr_id)),
                    &self.token,
                )
                .json(&json!({"body": comment}))
                .send()
                .await;
        }

        self.request(
            reqwest::Method::PATCH,
            self.url(&format!("pulls/{}", close.pr_id)),
            &self.token,
        )
        .json(&json!({"state": "closed"}))
        .send()
        .await
        .context("Failed to close pull request")?
        .error_for_status()
        .map_err(|e| HostError::Api(e.to_string()))?;

        if close.delete_source_branch {
            if let Some(branch) = &close.source_branch {
                self.request(
                    reqwest::Method::DELETE,
                    self.url(&format!("git/refs/heads/{}", branch)),
                    &self.token,
                )
                .send()
                .await
                .context("Failed to delete source branch")?
                .error_for_status()
                .map_err(|e| HostError::Api(e.to_string()))?;
            }
        }
        Ok(true)
    }

    async fn get_default_branch(&self) -> Result<String, HostError> {
        let repo: RepoResponse = self
            .request(
                reqwest::Method::GET,
                format!("{}/repos/{}", self.api_endpoint, self.repo),
                &self.token,
            )
            .send()
            .await
            .context("Failed to fetch repository")?
            .error_for_status()
            .map_err(|e| HostError::Api(e.to_string()))?
            .json()
            .await
            .context("Failed to parse repository response")?;
        Ok(repo.default_branch)
    }

    async fn get_branch_names(&self) -> Result<Vec<String>, HostError> {
        let mut names = Vec::new();
        let mut page = 1u32;
        loop {
            let branches: Vec<BranchResponse> = self
                .request(reqwest::Method::GET, self.url("branches"), &self.token)
                .query(&[("per_page", "100"), ("page", &page.to_string())])
                .send()
                .await
                .context("Failed to list branches")?
                .error_for_status()
                .map_err(|e| HostError::Api(e.to_string()))?
                .json()
                .await
                .context("Failed to parse branch list")?;
            let count = branches.len();
            names.extend(branches.into_iter().map(|b| b.name));
            if count < 100 {
                break;
            }
            page += 1;
        }
        Ok(names)
    }

    async fn get_active_pull_request_properties(
        &self,
        creator: &str,
    ) -> Result<Vec<PullRequestRecord>, HostError> {
        let mut records = Vec::new();
        let mut page = 1u32;
        loop {
            let pulls: Vec<PullResponse> = self
                .request(reqwest::Method::GET, self.url("pulls"), &self.token)
                .query(&[
                    ("state", "open"),
                    ("per_page", "100"),
                    ("page", &page.to_string()),
                ])
                .send()
                .await
                .context("Failed to list pull requests")?
                .error_for_status()
                .map_err(|e| HostError::Api(e.to_string()))?
                .json()
                .await
                .context("Failed to parse pull request list")?;
            let count = pulls.len();
            for pull in pulls {
                let by_creator = pull
                    .user
                    .as_ref()
                    .map(|u| u.login == creator)
                    .unwrap_or(false);
                if !by_creator {
                    continue;
                }
                let properties = properties_from_body(pull.body.as_deref().unwrap_or(""));
                if properties.is_empty() {
                    continue;
                }
                records.push(PullRequestRecord {
                    pr_id: pull.number,
                    source_branch: pull.head.branch,
                    properties,
                });
            }
            if count < 100 {
                break;
            }
            page += 1;
        }
        Ok(records)
    }

    async fn approve_pull_request(&self, pr_id: i64) -> Result<bool, HostError> {
        let Some(approver_token) = &self.approver_token else {
            return Ok(false);
        };
        self.request(
            reqwest::Method::POST,
            self.url(&format!("pulls/{}/reviews", pr_id)),
            approver_token,
        )
        .json(&json!({"event": "APPROVE"}))
        .send()
        .await
        .context("Failed to approve pull request")?
        .error_for_status()
        .map_err(|e| HostError::Api(e.to_string()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_round_trip_through_pr_body() {
        let properties = vec![
            ("deputy.package_manager".to_string(), "npm_and_yarn".to_string()),
            ("deputy.dependencies".to_string(), "[{\"x\":1}]".to_string()),
        ];
        let body = body_with_properties("Bumps lodash.", &properties);
        assert!(body.starts_with("Bumps lodash."));
        let parsed = properties_from_body(&body);
        assert_eq!(parsed.get("deputy.package_manager").unwrap(), "npm_and_yarn");
        assert_eq!(parsed.get("deputy.dependencies").unwrap(), "[{\"x\":1}]");
    }

    #[test]
    fn body_without_trailer_yields_no_properties() {
        assert!(properties_from_body("just a description").is_empty());
        assert!(properties_from_body("").is_empty());
    }

    #[test]
    fn truncated_trailer_is_ignored() {
        let body = format!("desc\n\n{}{{\"a\":", METADATA_OPEN);
        assert!(properties_from_body(&body).is_empty());
    }

    #[test]
    fn file_paths_join_directory_and_name() {
        let file = crate::outputs::DependencyFile {
            name: "package.json".to_string(),
            directory: Some("/app".to_string()),
            content: None,
            content_encoding: None,
            deleted: false,
            operation: None,
        };
        assert_eq!(file_path(&file), "app/package.json");

        let root = crate::outputs::DependencyFile {
            name: "/package.json".to_string(),
            directory: Some("/".to_string()),
            content: None,
            content_encoding: None,
            deleted: false,
            operation: None,
        };
        assert_eq!(file_path(&root), "package.json");
    }
}
