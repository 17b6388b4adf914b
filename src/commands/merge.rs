//! Merge command implementation.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::info;

use super::emit_report;
use crate::config::MergeConfig;
use crate::fs_abstraction::real_fs;
use crate::lock::LockGuard;
use crate::merger::{MergeOptions, Merger};
use crate::utils::generation_time;

/// Run the merge command
pub async fn run(
    config_path: &Path,
    source: &Path,
    output: &Path,
    strict: bool,
    json: bool,
) -> Result<()> {
    let config = MergeConfig::load(config_path)
        .with_context(|| format!("Failed to load merge config from {:?}", config_path))?;
    let _lock = LockGuard::acquire(output)?;

    let options = MergeOptions {
        source_root: source.to_path_buf(),
        output_root: output.to_path_buf(),
        generated_at: generation_time()?,
        strict,
    };
    info!(
        "Merging {:?} into {:?} ({} configured tasks)",
        source,
        output,
        config.merges.len()
    );

    let report = Merger::new(real_fs(), options).run(&config)?;
    emit_report(&report, json)?;

    if report.has_failures() {
        bail!("{} of {} merge tasks failed", report.failed(), report.outcomes.len());
    }
    Ok(())
}
