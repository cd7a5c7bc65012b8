//! Pull-request superseding decisions.
//!
//! Given an already-open PR and a new candidate, decide whether the new one
//! is "the same logical update, just refreshed" (supersedes the old PR) or
//! materially different work (does not).

use std::collections::HashMap;

use super::metadata::PrDescriptor;

/// Returns true when `new` supersedes `old`.
///
/// Two descriptors are comparable only if their group names match exactly,
/// including both being absent. Ungrouped descriptors must additionally
/// cover the exact same dependency-name set; different sets are different
/// scopes and never supersede each other. For comparable descriptors the
/// answer is "yes" iff some dependency present in both records a different
/// version, counting present-vs-absent as a difference.
pub fn should_supersede(old: &PrDescriptor, new: &PrDescriptor) -> bool {
    if old.group_name() != new.group_name() {
        return false;
    }

    if old.group_name().is_none() {
        let new_names: Vec<String> = new
            .dependency_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        if !old.same_dependency_names(&new_names) {
            return false;
        }
    }

    let old_versions: HashMap<&str, Option<&str>> = old
        .dependencies()
        .iter()
        .map(|d| (d.dependency_name.as_str(), d.dependency_version.as_deref()))
        .collect();

    new.dependencies().iter().any(|d| {
        match old_versions.get(d.dependency_name.as_str()) {
            Some(old_version) => *old_version != d.dependency_version.as_deref(),
            // Not in the intersection.
            None => false,
        }
    })
}
