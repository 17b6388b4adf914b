//! Error types for ruleset-sync.

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single merge, process or sync task.
///
/// Task errors are recorded in the run report and never abort the run.
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Source file not found: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid network entry '{entry}' in {}", path.display())]
    InvalidNetwork { path: PathBuf, entry: String },

    #[error("Download failed: {0}")]
    Download(String),
}
