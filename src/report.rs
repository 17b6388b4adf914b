//! Run-scoped result accumulators for the merge, process and sync stages.
//!
//! Each stage returns one report value. Reports are rendered three ways:
//! a text summary through `tracing`, JSON (`--json`) and a Markdown block
//! appended to the file named by `GITHUB_STEP_SUMMARY`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::rules::RuleKind;
use crate::utils::{format_count, format_count_with_separator, truncate};

/// Environment variable naming the CI step summary file.
pub const STEP_SUMMARY_ENV: &str = "GITHUB_STEP_SUMMARY";

/// Where a merge task came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrigin {
    Configured,
    Discovered,
}

/// Counters for one successfully written artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub kind: RuleKind,
    /// Input files read.
    pub sources: usize,
    /// Unique lines across all inputs, before normalization.
    pub raw: usize,
    /// Entries written.
    pub optimized: usize,
    pub invalid: usize,
    pub default_routes: usize,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Success(TaskStats),
    Skipped { reason: String },
    Failed { error: String },
}

/// Result of one merge task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    /// `policy/type/owner/filename`
    pub task: String,
    pub origin: TaskOrigin,
    #[serde(flatten)]
    pub status: TaskStatus,
}

/// Report returned by a merge run.
#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub generated_at: DateTime<Utc>,
    pub outcomes: Vec<TaskOutcome>,
}

impl MergeReport {
    pub fn new(generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            outcomes: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: TaskOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Success(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, TaskStatus::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&TaskStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    /// Entries written across all successful tasks.
    pub fn total_rules(&self) -> usize {
        self.successes().map(|(_, stats)| stats.optimized).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn successes(&self) -> impl Iterator<Item = (&TaskOutcome, &TaskStats)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            TaskStatus::Success(stats) => Some((o, stats)),
            _ => None,
        })
    }

    /// `(task, error)` for every failed task, in execution order.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            TaskStatus::Failed { error } => Some((o.task.as_str(), error.as_str())),
            _ => None,
        })
    }
}

/// Common rendering for stage reports.
pub trait RunReport: Serialize {
    /// Emit the human-readable summary through `tracing`.
    fn log_summary(&self);

    /// Markdown block for the CI step summary.
    fn to_markdown(&self) -> String;

    fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize report")
    }
}

impl RunReport for MergeReport {
    fn log_summary(&self) {
        info!("──────────────────────────────────────────────────────────");
        for (outcome, stats) in self.successes() {
            let marker = match outcome.origin {
                TaskOrigin::Configured => "",
                TaskOrigin::Discovered => " (auto)",
            };
            info!(
                "  {:<48} {:>8} {:>10} (raw {}){}",
                truncate(&outcome.task, 48),
                stats.kind.label(),
                format_count_with_separator(stats.optimized),
                format_count(stats.raw),
                marker
            );
        }
        info!("──────────────────────────────────────────────────────────");
        info!(
            "Merge finished: {} succeeded, {} skipped, {} failed, {} rules written",
            self.succeeded(),
            self.skipped(),
            self.failed(),
            format_count_with_separator(self.total_rules())
        );
        for (task, err) in self.failures() {
            error!("  [FAIL] {}: {}", task, err);
        }
    }

    fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("## Rule Merge\n\n");
        out.push_str(&format!(
            "**Generated:** {}\n\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        out.push_str("| Success | Skipped | Failed | Rules |\n");
        out.push_str("|---------|---------|--------|-------|\n");
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n\n",
            self.succeeded(),
            self.skipped(),
            self.failed(),
            format_count_with_separator(self.total_rules())
        ));

        if self.succeeded() > 0 {
            out.push_str("| Task | Mode | Sources | Raw | Rules |\n");
            out.push_str("|------|------|---------|-----|-------|\n");
            for (outcome, stats) in self.successes() {
                let task = match outcome.origin {
                    TaskOrigin::Configured => outcome.task.clone(),
                    TaskOrigin::Discovered => format!("{} (auto)", outcome.task),
                };
                out.push_str(&format!(
                    "| {} | {} | {} | {} | {} |\n",
                    task,
                    stats.kind.label(),
                    stats.sources,
                    format_count_with_separator(stats.raw),
                    format_count_with_separator(stats.optimized)
                ));
            }
            out.push('\n');
        }

        if self.has_failures() {
            out.push_str("### Failures\n\n");
            for (task, err) in self.failures() {
                out.push_str(&format!("- `{}`: {}\n", task, err));
            }
            out.push('\n');
        }
        out
    }
}

/// A file or source that could not be handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub item: String,
    pub error: String,
}

/// Report returned by the in-place process stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessReport {
    pub files: usize,
    pub base64_decoded: usize,
    pub original_lines: usize,
    pub kept_lines: usize,
    pub failures: Vec<ItemFailure>,
}

impl ProcessReport {
    /// Lines dropped by cleaning (comments, duplicates, invalid entries).
    pub fn removed(&self) -> usize {
        self.original_lines.saturating_sub(self.kept_lines)
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl RunReport for ProcessReport {
    fn log_summary(&self) {
        info!(
            "Processed {} files ({} base64): {} lines -> {} kept, {} removed",
            self.files,
            self.base64_decoded,
            format_count_with_separator(self.original_lines),
            format_count_with_separator(self.kept_lines),
            format_count_with_separator(self.removed())
        );
        for failure in &self.failures {
            error!("  [FAIL] {}: {}", failure.item, failure.error);
        }
    }

    fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("## Rule Processing\n\n");
        out.push_str("| Metric | Value |\n");
        out.push_str("|--------|-------|\n");
        out.push_str(&format!("| Files | {} |\n", self.files));
        out.push_str(&format!("| Base64 decoded | {} |\n", self.base64_decoded));
        out.push_str(&format!(
            "| Original lines | {} |\n",
            format_count_with_separator(self.original_lines)
        ));
        out.push_str(&format!(
            "| Kept lines | {} |\n",
            format_count_with_separator(self.kept_lines)
        ));
        out.push_str(&format!(
            "| Removed | {} |\n\n",
            format_count_with_separator(self.removed())
        ));
        push_failures(&mut out, &self.failures);
        out
    }
}

/// Report returned by the sync stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub sources: usize,
    pub written: usize,
    pub rules: usize,
    pub bytes_downloaded: u64,
    pub orphans_removed: usize,
    pub failures: Vec<ItemFailure>,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl RunReport for SyncReport {
    fn log_summary(&self) {
        info!(
            "Sync finished: {}/{} sources written, {} rules, {} orphans removed",
            self.written,
            self.sources,
            format_count_with_separator(self.rules),
            self.orphans_removed
        );
        for failure in &self.failures {
            warn!("  [FAIL] {}: {}", failure.item, failure.error);
        }
    }

    fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("## Rule Sync\n\n");
        out.push_str("| Sources | Written | Failed | Rules | Orphans removed |\n");
        out.push_str("|---------|---------|--------|-------|-----------------|\n");
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n\n",
            self.sources,
            self.written,
            self.failures.len(),
            format_count_with_separator(self.rules),
            self.orphans_removed
        ));
        push_failures(&mut out, &self.failures);
        out
    }
}

fn push_failures(out: &mut String, failures: &[ItemFailure]) {
    if failures.is_empty() {
        return;
    }
    out.push_str("### Failures\n\n");
    for failure in failures {
        out.push_str(&format!("- `{}`: {}\n", failure.item, failure.error));
    }
    out.push('\n');
}

/// Append the report's Markdown block to `$GITHUB_STEP_SUMMARY`, if set.
///
/// Returns whether anything was written.
pub fn append_step_summary(report: &impl RunReport) -> Result<bool> {
    let path = match std::env::var_os(STEP_SUMMARY_ENV) {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => return Ok(false),
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open step summary: {:?}", path))?;
    file.write_all(report.to_markdown().as_bytes())
        .with_context(|| format!("Failed to write step summary: {:?}", path))?;
    Ok(true)
}
