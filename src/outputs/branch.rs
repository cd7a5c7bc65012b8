//! Deterministic source-branch naming for update pull requests.

use sha2::{Digest, Sha256};

/// Default separator between branch segments.
pub const DEFAULT_SEPARATOR: &str = "/";
/// Leading segment of every branch this orchestrator creates.
pub const BRANCH_PREFIX: &str = "dependabot";

/// Map a configured package ecosystem to the branch-name segment the
/// updater uses for it.
pub fn ecosystem_branch_segment(ecosystem: &str) -> String {
    match ecosystem {
        "npm" | "yarn" | "pnpm" | "bun" | "npm_and_yarn" => "npm_and_yarn".to_string(),
        "pip" | "pipenv" | "pip-compile" | "poetry" | "uv" => "pip".to_string(),
        "gomod" | "go_modules" => "go_modules".to_string(),
        "github-actions" => "github_actions".to_string(),
        "gitsubmodule" | "submodules" => "submodules".to_string(),
        "mix" => "hex".to_string(),
        other => other.replace('-', "_"),
    }
}

/// A dependency name/version pair participating in the branch name.
#[derive(Debug, Clone)]
pub struct BranchDependency {
    pub name: String,
    pub version: Option<String>,
}

/// Derive the source branch for a pull request.
///
/// Segments, in order: the fixed prefix, the ecosystem segment, the target
/// branch when one is configured, the affected directory (root omitted),
/// then the group name, or `name-version` for a single dependency, or a
/// short digest over the whole list for ungrouped multi-dependency updates.
pub fn source_branch_name(
    ecosystem: &str,
    target_branch: Option<&str>,
    directory: &str,
    group_name: Option<&str>,
    dependencies: &[BranchDependency],
    separator: &str,
) -> String {
    let mut segments: Vec<String> = vec![
        BRANCH_PREFIX.to_string(),
        ecosystem_branch_segment(ecosystem),
    ];

    if let Some(target) = target_branch {
        if !target.is_empty() {
            segments.push(sanitize(target));
        }
    }

    for part in directory.split('/').filter(|p| !p.is_empty()) {
        segments.push(sanitize(part));
    }

    let leaf = if let Some(group) = group_name {
        sanitize(group)
    } else if dependencies.len() == 1 {
        let dep = &dependencies[0];
        let name = sanitize(dep.name.trim_start_matches('@'));
        match dep.version.as_deref() {
            Some(version) if !version.is_empty() => format!("{}-{}", name, sanitize(version)),
            _ => name,
        }
    } else {
        let mut hasher = Sha256::new();
        for dep in dependencies {
            hasher.update(dep.name.as_bytes());
            hasher.update(b"\0");
            hasher.update(dep.version.as_deref().unwrap_or("").as_bytes());
            hasher.update(b"\0");
        }
        let digest = hasher.finalize();
        format!("multi-{:x}", digest)[..16].to_string()
    };
    segments.push(leaf);

    segments.join(separator)
}

/// Check a candidate branch against every branch already on the host.
///
/// A candidate conflicts when it exactly matches an existing branch, or is
/// a prefix of one, or is prefixed by one. The prefix rule is deliberately
/// coarse plain-string matching (`foo` conflicts with `foobar-legacy`);
/// kept that way for compatibility with what existing branches were
/// created against.
pub fn branch_conflicts<'a, I>(candidate: &str, existing: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    existing.into_iter().find(|branch| {
        *branch == candidate || branch.starts_with(candidate) || candidate.starts_with(branch)
    })
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| match c {
            ' ' | ':' | '[' | ']' | '?' | '^' | '~' | '\\' | '*' => '-',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(name: &str, version: &str) -> BranchDependency {
        BranchDependency {
            name: name.to_string(),
            version: Some(version.to_string()),
        }
    }

    #[test]
    fn single_dependency_npm_branch() {
        let branch = source_branch_name(
            "npm",
            None,
            "/",
            None,
            &[dep("lodash", "4.17.21")],
            DEFAULT_SEPARATOR,
        );
        assert_eq!(branch, "dependabot/npm_and_yarn/lodash-4.17.21");
    }

    #[test]
    fn directory_segments_are_included() {
        let branch = source_branch_name(
            "cargo",
            None,
            "/crates/api",
            None,
            &[dep("tokio", "1.40.0")],
            DEFAULT_SEPARATOR,
        );
        assert_eq!(branch, "dependabot/cargo/crates/api/tokio-1.40.0");
    }

    #[test]
    fn target_branch_segment_comes_before_directory() {
        let branch = source_branch_name(
            "npm",
            Some("release/v2"),
            "/",
            None,
            &[dep("lodash", "4.17.21")],
            DEFAULT_SEPARATOR,
        );
        assert_eq!(branch, "dependabot/npm_and_yarn/release/v2/lodash-4.17.21");
    }

    #[test]
    fn group_name_wins_over_dependency_list() {
        let branch = source_branch_name(
            "pip",
            None,
            "/",
            Some("dev-tools"),
            &[dep("black", "24.1.0"), dep("ruff", "0.6.0")],
            DEFAULT_SEPARATOR,
        );
        assert_eq!(branch, "dependabot/pip/dev-tools");
    }

    #[test]
    fn multi_dependency_branch_is_deterministic_digest() {
        let deps = [dep("a", "1"), dep("b", "2")];
        let first = source_branch_name("npm", None, "/", None, &deps, DEFAULT_SEPARATOR);
        let second = source_branch_name("npm", None, "/", None, &deps, DEFAULT_SEPARATOR);
        assert_eq!(first, second);
        assert!(first.starts_with("dependabot/npm_and_yarn/multi-"));

        let other = source_branch_name(
            "npm",
            None,
            "/",
            None,
            &[dep("a", "1"), dep("b", "3")],
            DEFAULT_SEPARATOR,
        );
        assert_ne!(first, other);
    }

    #[test]
    fn scoped_package_drops_leading_at() {
        let branch = source_branch_name(
            "npm",
            None,
            "/",
            None,
            &[dep("@types/node", "22.5.0")],
            DEFAULT_SEPARATOR,
        );
        assert_eq!(branch, "dependabot/npm_and_yarn/types/node-22.5.0");
    }

    #[test]
    fn custom_separator_is_respected() {
        let branch = source_branch_name(
            "npm",
            None,
            "/",
            None,
            &[dep("lodash", "4.17.21")],
            "-",
        );
        assert_eq!(branch, "dependabot-npm_and_yarn-lodash-4.17.21");
    }

    #[test]
    fn conflict_on_exact_match() {
        let existing = ["dependabot/npm_and_yarn/lodash-4.17.21"];
        assert!(branch_conflicts(
            "dependabot/npm_and_yarn/lodash-4.17.21",
            existing.iter().copied()
        )
        .is_some());
    }

    #[test]
    fn conflict_when_candidate_is_prefix_of_existing() {
        let existing = ["dependabot/npm_and_yarn/lodash-4.17.21-extended"];
        assert!(branch_conflicts(
            "dependabot/npm_and_yarn/lodash-4.17.21",
            existing.iter().copied()
        )
        .is_some());
    }

    #[test]
    fn conflict_when_existing_is_prefix_of_candidate() {
        let existing = ["dependabot/npm_and_yarn/lodash"];
        assert!(branch_conflicts(
            "dependabot/npm_and_yarn/lodash-4.17.21",
            existing.iter().copied()
        )
        .is_some());
    }

    #[test]
    fn no_conflict_with_unrelated_branches() {
        let existing = ["main", "dependabot/pip/requests-2.32.0"];
        assert!(branch_conflicts(
            "dependabot/npm_and_yarn/lodash-4.17.21",
            existing.iter().copied()
        )
        .is_none());
    }

    #[test]
    fn ecosystem_segments_match_updater_conventions() {
        assert_eq!(ecosystem_branch_segment("npm"), "npm_and_yarn");
        assert_eq!(ecosystem_branch_segment("yarn"), "npm_and_yarn");
        assert_eq!(ecosystem_branch_segment("github-actions"), "github_actions");
        assert_eq!(ecosystem_branch_segment("gomod"), "go_modules");
        assert_eq!(ecosystem_branch_segment("mix"), "hex");
        assert_eq!(ecosystem_branch_segment("cargo"), "cargo");
        assert_eq!(ecosystem_branch_segment("pub-dev"), "pub_dev");
    }
}
