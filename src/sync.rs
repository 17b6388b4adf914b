//! Sync stage: download every upstream list and write its cleaned copy.
//!
//! Downloads run concurrently (bounded); each list is cleaned and written
//! as soon as it is next in source-list order. Files under the rulesets tree that no source maps to
//! any more are removed afterwards.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::TaskError;
use crate::fetcher::{SourceFetcher, MAX_CONCURRENT_REQUESTS};
use crate::fs_abstraction::FileSystem;
use crate::report::{ItemFailure, SyncReport};
use crate::rules::{clean_source, render_entries};
use crate::sources::{SourceEntry, SourceList};
use crate::utils::{format_bytes, format_count};

/// Fetch, clean and write every source, then remove orphaned lists.
pub async fn sync_sources<S, F>(
    fetcher: &S,
    fs: &F,
    sources: &SourceList,
    rulesets_root: &Path,
) -> Result<SyncReport>
where
    S: SourceFetcher + ?Sized,
    F: FileSystem + ?Sized,
{
    fs.create_dir_all(rulesets_root)
        .with_context(|| format!("Failed to create rulesets directory: {:?}", rulesets_root))?;

    let mut report = SyncReport {
        sources: sources.len(),
        ..Default::default()
    };
    let expected: HashSet<PathBuf> = sources
        .entries
        .iter()
        .map(|e| rulesets_root.join(e.target_path()))
        .collect();

    // Each body is cleaned and dropped as soon as it is next in order
    let downloads = stream::iter(sources.entries.iter())
        .map(|entry| async move { (entry, fetcher.fetch(&entry.url).await) })
        .buffered(MAX_CONCURRENT_REQUESTS);
    let mut downloads = std::pin::pin!(downloads);

    while let Some((entry, download)) = downloads.next().await {
        let result = download
            .map_err(|e| TaskError::Download(format!("{:#}", e)))
            .and_then(|bytes| {
                report.bytes_downloaded += bytes.len() as u64;
                write_source(fs, entry, &bytes, rulesets_root)
            });
        match result {
            Ok(count) => {
                report.written += 1;
                report.rules += count;
            }
            Err(e) => {
                warn!("[FAIL] {}: {}", entry.url, e);
                report.failures.push(ItemFailure {
                    item: entry.url.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    report.orphans_removed = remove_orphans(fs, rulesets_root, &expected)
        .with_context(|| format!("Failed to clean up {:?}", rulesets_root))?;

    info!(
        "Downloaded {} from {} sources",
        format_bytes(report.bytes_downloaded),
        report.sources
    );
    Ok(report)
}

/// Clean one downloaded list and write it. Returns the number of entries.
fn write_source<F: FileSystem + ?Sized>(
    fs: &F,
    entry: &SourceEntry,
    bytes: &[u8],
    rulesets_root: &Path,
) -> Result<usize, TaskError> {
    let cleaned = clean_source(bytes, entry.kind());
    let path = rulesets_root.join(entry.target_path());
    let write_err = |source: std::io::Error| TaskError::Write {
        path: path.clone(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs.create_dir_all(parent).map_err(write_err)?;
    }
    fs.write(&path, render_entries(&cleaned.rules.entries()).as_bytes())
        .map_err(write_err)?;

    if cleaned.rules.is_empty() {
        warn!("{}: no usable entries", entry.url);
    }
    info!(
        "[OK] {}/{}/{}: {} entries{}",
        entry.policy,
        entry.rule_type,
        entry.file_name,
        format_count(cleaned.rules.len()),
        if cleaned.was_base64 { " (base64)" } else { "" }
    );
    Ok(cleaned.rules.len())
}

/// Delete `.txt` lists not produced by the current source list.
fn remove_orphans<F: FileSystem + ?Sized>(
    fs: &F,
    root: &Path,
    expected: &HashSet<PathBuf>,
) -> std::io::Result<usize> {
    let mut removed = 0;
    for path in fs.list_files(root)? {
        let is_list = path.extension().is_some_and(|ext| ext == "txt");
        if is_list && !expected.contains(&path) {
            info!("Deleting orphan: {}", path.display());
            fs.remove_file(&path)?;
            removed += 1;
        }
    }
    let dirs = fs.remove_empty_dirs(root)?;
    debug!("Removed {} empty directories", dirs);
    Ok(removed)
}
