//! Merge configuration (`merge-config.yaml`).
//!
//! ```yaml
//! merges:
//!   - strategy: block
//!     type: domain
//!     owner: combined
//!     filename: ads.txt
//!     description: Ads from every upstream
//!     inputs:
//!       - block/domain/owner-a/ads.txt
//!       - block/domain/owner-b/ads.txt
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default location of the merge configuration.
pub const DEFAULT_CONFIG_FILE: &str = "merge-config.yaml";

/// Default root of per-source rule files.
pub const DEFAULT_SOURCE_DIR: &str = "rulesets";

/// Default root of merged artifacts.
pub const DEFAULT_OUTPUT_DIR: &str = "merged-rules";

/// Default upstream source list.
pub const DEFAULT_SOURCES_FILE: &str = "sources.urls";

/// Top-level merge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Explicit merge tasks, run in declaration order.
    pub merges: Vec<TaskConfig>,
}

/// One declared merge task.
///
/// Every field has a default so that a malformed entry fails on its own
/// (see [`crate::merger`]) instead of rejecting the whole document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskConfig {
    #[serde(alias = "policy")]
    pub strategy: String,

    #[serde(rename = "type")]
    pub rule_type: String,

    pub owner: String,

    /// Output file name. Required.
    pub filename: Option<String>,

    /// Input files, relative to the source root.
    pub inputs: Vec<String>,

    pub description: String,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            strategy: "Default".to_string(),
            rule_type: "General".to_string(),
            owner: "Unknown".to_string(),
            filename: None,
            inputs: Vec::new(),
            description: "Configured Merge".to_string(),
        }
    }
}

impl MergeConfig {
    /// Load configuration from a YAML file.
    ///
    /// A missing or unparsable file is an error; a file with only comments is
    /// an empty configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Parse configuration from YAML text.
    pub fn parse(content: &str) -> Result<Self> {
        let has_content = content.lines().any(|line| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#') && line != "---"
        });
        if !has_content {
            return Ok(Self::default());
        }
        let config: MergeConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_full_task() {
        let yaml = r#"
merges:
  - strategy: block
    type: domain
    owner: combined
    filename: ads.txt
    description: All ads
    inputs:
      - block/domain/a/ads.txt
      - block/domain/b/ads.txt
"#;
        let config = MergeConfig::parse(yaml).unwrap();
        assert_eq!(config.merges.len(), 1);
        let task = &config.merges[0];
        assert_eq!(task.strategy, "block");
        assert_eq!(task.rule_type, "domain");
        assert_eq!(task.owner, "combined");
        assert_eq!(task.filename.as_deref(), Some("ads.txt"));
        assert_eq!(task.inputs.len(), 2);
        assert_eq!(task.description, "All ads");
    }

    #[test]
    fn test_parse_defaults_and_policy_alias() {
        let yaml = "merges:\n  - policy: direct\n    filename: cn.txt\n";
        let config = MergeConfig::parse(yaml).unwrap();
        let task = &config.merges[0];
        assert_eq!(task.strategy, "direct");
        assert_eq!(task.rule_type, "General");
        assert_eq!(task.owner, "Unknown");
        assert_eq!(task.description, "Configured Merge");
        assert!(task.inputs.is_empty());
    }

    #[test]
    fn test_missing_filename_is_not_a_parse_error() {
        let config = MergeConfig::parse("merges:\n  - inputs: [a.txt]\n").unwrap();
        assert_eq!(config.merges[0].filename, None);
    }

    #[test]
    fn test_empty_document() {
        assert!(MergeConfig::parse("").unwrap().merges.is_empty());
        assert!(MergeConfig::parse("# nothing yet\n").unwrap().merges.is_empty());
        assert!(MergeConfig::parse("merges: []\n").unwrap().merges.is_empty());
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(MergeConfig::parse("merges: [unclosed").is_err());
        assert!(MergeConfig::parse("merges: 42\n").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = MergeConfig::load("/nonexistent/merge-config.yaml");
        let msg = format!("{:#}", result.unwrap_err());
        assert!(msg.contains("Failed to read config file"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "merges:\n  - filename: x.txt\n    inputs: [a/b/c/x.txt]").unwrap();
        let config = MergeConfig::load(file.path()).unwrap();
        assert_eq!(config.merges[0].inputs, vec!["a/b/c/x.txt"]);
    }
}
