//! CLI command implementations.

pub mod merge;
pub mod normalize;
pub mod process;
pub mod sync;

use anyhow::Result;
use tracing::{debug, warn};

use crate::report::{append_step_summary, RunReport};

/// Print a stage report (JSON or text summary) and mirror it to the CI step summary.
pub(crate) fn emit_report(report: &impl RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json()?);
    } else {
        report.log_summary();
    }
    match append_step_summary(report) {
        Ok(true) => debug!("Step summary updated"),
        Ok(false) => {}
        Err(e) => warn!("Could not write step summary: {:#}", e),
    }
    Ok(())
}
