//! Persisted pull-request dependency metadata.
//!
//! The only durable artifact the orchestrator writes is a property blob
//! attached to each PR on the host: the package-manager name plus a
//! JSON-serialized dependency/group descriptor. Reading that blob back on
//! a later run is the sole mechanism for recovering "which dependencies
//! does this open PR represent".

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Property key carrying the package manager name.
pub const PROPERTY_PACKAGE_MANAGER: &str = "deputy.package_manager";
/// Property key carrying the serialized [`PrDescriptor`].
pub const PROPERTY_DEPENDENCIES: &str = "deputy.dependencies";

/// One dependency recorded against a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PrDependency {
    pub dependency_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// What an open pull request updates: either a flat dependency list or a
/// named group. This is the unit the superseding algorithm compares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrDescriptor {
    Group {
        #[serde(rename = "dependency-group-name")]
        dependency_group_name: String,
        dependencies: Vec<PrDependency>,
    },
    Deps(Vec<PrDependency>),
}

impl PrDescriptor {
    pub fn group_name(&self) -> Option<&str> {
        match self {
            PrDescriptor::Group {
                dependency_group_name,
                ..
            } => Some(dependency_group_name),
            PrDescriptor::Deps(_) => None,
        }
    }

    pub fn dependencies(&self) -> &[PrDependency] {
        match self {
            PrDescriptor::Group { dependencies, .. } => dependencies,
            PrDescriptor::Deps(deps) => deps,
        }
    }

    /// Dependency names, order preserved.
    pub fn dependency_names(&self) -> Vec<&str> {
        self.dependencies()
            .iter()
            .map(|d| d.dependency_name.as_str())
            .collect()
    }

    /// Order-independent exact name-set comparison.
    pub fn same_dependency_names(&self, names: &[String]) -> bool {
        let mut mine: Vec<&str> = self.dependency_names();
        let mut theirs: Vec<&str> = names.iter().map(String::as_str).collect();
        mine.sort_unstable();
        mine.dedup();
        theirs.sort_unstable();
        theirs.dedup();
        mine == theirs
    }

    /// Serialize for attachment as a PR property. Never includes a PR
    /// number; the host record is the source of truth for that.
    pub fn to_property_value(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize PR dependency descriptor")
    }

    /// Decode a property blob written by [`Self::to_property_value`].
    pub fn from_property_value(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse PR dependency descriptor")
    }
}
