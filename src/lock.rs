//! File-based locking to prevent concurrent runs over the same tree.
//!
//! The merge stage clears its output root and the sync stage deletes
//! orphans, so two runs over the same directory must not overlap. The lock
//! file sits next to the directory it protects (`merged-rules.lock` for
//! `merged-rules/`), outside the tree that gets cleared.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// A guard that holds an exclusive lock for a directory.
/// The lock is automatically released when the guard is dropped.
#[derive(Debug)]
pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Attempt to acquire an exclusive lock for `dir`.
    /// Returns an error if another run already holds it.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let lock_path = lock_path_for(dir);
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }

        // Open without truncating: the file may be locked by another process
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {:?}", lock_path))?;

        // Try to acquire exclusive lock (non-blocking)
        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another run is already working on {:?}.\n\
                 If you believe this is an error, remove the lock file: {:?}",
                dir,
                lock_path
            )
        })?;

        Ok(Self {
            _file: file,
            path: lock_path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// `<dir>.lock`, as a sibling of `dir`.
fn lock_path_for(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "ruleset-sync".to_string());
    dir.with_file_name(format!("{}.lock", name))
}
