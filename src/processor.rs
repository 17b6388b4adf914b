//! Process stage: sanitize every rule file of the rulesets tree in place.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::TaskError;
use crate::fs_abstraction::FileSystem;
use crate::merger::SOURCE_EXTENSIONS;
use crate::report::{ItemFailure, ProcessReport};
use crate::rules::{clean_source, render_entries, RuleKind};

/// Rewrite every rule file under `root` as its canonical list.
///
/// The kind of each file follows from its location (see
/// [`RuleKind::from_source_path`]). A missing `root` is not an error: there
/// is simply nothing to process.
pub fn process_tree<F: FileSystem + ?Sized>(fs: &F, root: &Path) -> Result<ProcessReport> {
    let mut report = ProcessReport::default();
    if !fs.exists(root) {
        warn!("Directory {:?} not found, nothing to process", root);
        return Ok(report);
    }

    let files: Vec<_> = fs
        .list_files(root)
        .with_context(|| format!("Failed to scan {:?}", root))?
        .into_iter()
        .filter(|p| is_rule_file(p))
        .collect();
    info!("Found {} rule files under {:?}", files.len(), root);

    for path in files {
        let rel = path.strip_prefix(root).unwrap_or(&path);
        let kind = RuleKind::from_source_path(rel);
        match process_file(fs, &path, kind) {
            Ok(outcome) => {
                report.files += 1;
                report.original_lines += outcome.original_lines;
                report.kept_lines += outcome.kept_lines;
                if outcome.was_base64 {
                    report.base64_decoded += 1;
                }
            }
            Err(e) => {
                warn!("[FAIL] {}: {}", path.display(), e);
                report.failures.push(ItemFailure {
                    item: rel.display().to_string(),
                    error: e.to_string(),
                });
            }
        }
    }
    Ok(report)
}

struct FileOutcome {
    original_lines: usize,
    kept_lines: usize,
    was_base64: bool,
}

fn process_file<F: FileSystem + ?Sized>(
    fs: &F,
    path: &Path,
    kind: RuleKind,
) -> Result<FileOutcome, TaskError> {
    let bytes = fs.read(path).map_err(|source| TaskError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let cleaned = clean_source(&bytes, kind);
    fs.write(path, render_entries(&cleaned.rules.entries()).as_bytes())
        .map_err(|source| TaskError::Write {
            path: path.to_path_buf(),
            source,
        })?;

    debug!(
        "{} ({}): {} -> {} lines",
        path.display(),
        kind,
        cleaned.original_lines,
        cleaned.rules.len()
    );
    Ok(FileOutcome {
        original_lines: cleaned.original_lines,
        kept_lines: cleaned.rules.len(),
        was_base64: cleaned.was_base64,
    })
}

fn is_rule_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}
