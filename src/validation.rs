//! Centralized validation for values that end up in filesystem paths.
//!
//! Task identities (policy, rule-type, owner, filename) and declared inputs
//! come from a configuration file or from URLs. They are joined onto the
//! source and output roots, so anything that could escape those roots is
//! rejected here.

use anyhow::{bail, Result};
use std::path::{Component, Path};

/// Validate a single path component (policy, rule-type, owner or filename).
///
/// # Examples
/// ```
/// use ruleset_sync::validation::validate_component;
/// assert!(validate_component("block").is_ok());
/// assert!(validate_component("ads.txt").is_ok());
/// assert!(validate_component("..").is_err());
/// assert!(validate_component("a/b").is_err());
/// ```
pub fn validate_component(value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("empty path component");
    }
    if value == "." || value == ".." {
        bail!("path component '{}' is not allowed", value);
    }
    if value.contains('/') || value.contains('\\') {
        bail!("path component '{}' contains a path separator", value);
    }
    if value.chars().any(char::is_control) {
        bail!("path component '{}' contains control characters", value.escape_debug());
    }
    Ok(())
}

/// Validate a relative input path declared by a merge task.
///
/// # Examples
/// ```
/// use ruleset_sync::validation::validate_relative_path;
/// assert!(validate_relative_path("block/domain/owner/ads.txt").is_ok());
/// assert!(validate_relative_path("/etc/passwd").is_err());
/// assert!(validate_relative_path("block/../../secret").is_err());
/// ```
pub fn validate_relative_path(value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("empty input path");
    }
    let path = Path::new(value);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => bail!("input path '{}' escapes the source root", value),
            Component::RootDir | Component::Prefix(_) => {
                bail!("input path '{}' must be relative", value)
            }
        }
    }
    Ok(())
}

/// Normalize a relative path to forward-slash form for set membership checks.
///
/// # Examples
/// ```
/// use ruleset_sync::validation::normalize_relative;
/// assert_eq!(normalize_relative("./block//domain/a.txt"), "block/domain/a.txt");
/// ```
pub fn normalize_relative(value: &str) -> String {
    Path::new(value)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
