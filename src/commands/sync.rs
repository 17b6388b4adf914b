//! Sync command implementation.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::{info, warn};

use super::emit_report;
use crate::fetcher::Fetcher;
use crate::fs_abstraction::real_fs;
use crate::lock::LockGuard;
use crate::sources::SourceList;
use crate::sync::sync_sources;

/// Run the sync command
pub async fn run(sources_path: &Path, output: &Path, strict: bool, json: bool) -> Result<()> {
    let sources = SourceList::load(sources_path)
        .with_context(|| format!("Failed to load sources from {:?}", sources_path))?;
    if sources.is_empty() {
        warn!("No sources found in {:?}", sources_path);
    }
    info!("Loaded {} sources", sources.len());

    let _lock = LockGuard::acquire(output)?;
    let fetcher = Fetcher::new()?;
    let report = sync_sources(&fetcher, real_fs(), &sources, output).await?;
    emit_report(&report, json)?;

    if report.has_failures() && strict {
        bail!("{} of {} sources failed", report.failures.len(), report.sources);
    }
    Ok(())
}
