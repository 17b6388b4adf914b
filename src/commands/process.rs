//! Process command implementation.

use anyhow::{bail, Result};
use std::path::Path;

use super::emit_report;
use crate::fs_abstraction::real_fs;
use crate::lock::LockGuard;
use crate::processor::process_tree;

/// Run the process command
pub async fn run(source: &Path, json: bool) -> Result<()> {
    let _lock = LockGuard::acquire(source)?;
    let report = process_tree(real_fs(), source)?;
    emit_report(&report, json)?;

    if report.has_failures() {
        bail!("{} files could not be processed", report.failures.len());
    }
    Ok(())
}
