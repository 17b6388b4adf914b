//! Merge stage: combine cleaned source files into published artifacts.
//!
//! Configured tasks run first, in declaration order. Every source file
//! that no configured task declared is then merged on its own as a
//! discovered task, in directory-walk order. A failed task is recorded in
//! the [`MergeReport`] and the run moves on.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::collections::{BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::aggregator::parse_network;
use crate::config::{MergeConfig, TaskConfig};
use crate::decoder::decode_source;
use crate::error::TaskError;
use crate::extractor::extract_candidates;
use crate::fs_abstraction::FileSystem;
use crate::report::{MergeReport, TaskOrigin, TaskOutcome, TaskStats, TaskStatus};
use crate::rules::{render_entries, RuleKind, RuleSet};
use crate::validation::{normalize_relative, validate_component, validate_relative_path};

/// Extensions of files considered rule sources.
pub const SOURCE_EXTENSIONS: &[&str] = &["txt", "list", "conf", "yaml"];

const HEADER_RULE: &str = "# ----------------------------------------";
const HEADER_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// A validated merge task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeTask {
    pub policy: String,
    pub rule_type: String,
    pub owner: String,
    pub filename: String,
    /// Inputs relative to the source root, in declaration order.
    pub inputs: Vec<String>,
    pub description: String,
    pub origin: TaskOrigin,
}

impl MergeTask {
    /// Validate a configured task.
    pub fn from_config(config: &TaskConfig) -> Result<Self, TaskError> {
        let filename = config
            .filename
            .clone()
            .ok_or_else(|| TaskError::InvalidTask("missing filename".to_string()))?;

        for (field, value) in [
            ("strategy", &config.strategy),
            ("type", &config.rule_type),
            ("owner", &config.owner),
            ("filename", &filename),
        ] {
            validate_component(value)
                .map_err(|e| TaskError::InvalidTask(format!("{}: {:#}", field, e)))?;
        }
        for input in &config.inputs {
            validate_relative_path(input).map_err(|e| TaskError::InvalidTask(format!("{:#}", e)))?;
        }

        Ok(Self {
            policy: config.strategy.clone(),
            rule_type: config.rule_type.clone(),
            owner: config.owner.clone(),
            filename,
            inputs: config.inputs.clone(),
            description: config.description.clone(),
            origin: TaskOrigin::Configured,
        })
    }

    /// Synthesize a singleton task for an unreferenced source file.
    ///
    /// Policy, rule-type and owner come from the first three directory
    /// components of `rel`, defaulting to `Auto`, `General` and `Unknown`.
    pub fn discovered(rel: &str) -> Option<Self> {
        let rel = normalize_relative(rel);
        let mut parts: Vec<&str> = rel.split('/').collect();
        let filename = parts.pop()?.to_string();
        let component = |i: usize, default: &str| {
            parts.get(i).map(|s| s.to_string()).unwrap_or_else(|| default.to_string())
        };

        Some(Self {
            policy: component(0, "Auto"),
            rule_type: component(1, "General"),
            owner: component(2, "Unknown"),
            filename,
            description: format!("Auto-detected from {}", rel),
            inputs: vec![rel],
            origin: TaskOrigin::Discovered,
        })
    }

    /// `policy/type/owner/filename`
    pub fn label(&self) -> String {
        format!("{}/{}/{}/{}", self.policy, self.rule_type, self.owner, self.filename)
    }

    /// Canonical kind of this task's output.
    pub fn kind(&self) -> RuleKind {
        RuleKind::infer(&self.rule_type, &self.filename)
    }

    pub fn output_path(&self, output_root: &Path) -> PathBuf {
        output_root
            .join(&self.policy)
            .join(&self.rule_type)
            .join(&self.owner)
            .join(&self.filename)
    }
}

/// The `#`-prefixed provenance block at the top of every artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceHeader {
    pub policy: String,
    pub rule_type: String,
    pub owner: String,
    pub generated_at: DateTime<Utc>,
    pub kind: RuleKind,
    pub count: usize,
    pub raw: usize,
    pub description: String,
}

impl ProvenanceHeader {
    pub fn render(&self) -> String {
        let description = self.description.replace(['\r', '\n'], " ");
        let mut out = String::new();
        out.push_str(HEADER_RULE);
        out.push('\n');
        out.push_str(&format!("# Strategy: {}\n", self.policy));
        out.push_str(&format!("# Type:     {}\n", self.rule_type));
        out.push_str(&format!("# Owner:    {}\n", self.owner));
        out.push_str(&format!(
            "# Date:     {}\n",
            self.generated_at.format(HEADER_DATE_FORMAT)
        ));
        out.push_str(&format!("# Mode:     {}\n", self.kind.label()));
        out.push_str(&format!("# Count:    {} (Raw: {})\n", self.count, self.raw));
        out.push_str(&format!("# Desc:     {}\n", description));
        out.push_str(HEADER_RULE);
        out.push('\n');
        out
    }

    /// Read the header back from an artifact. `None` if it is malformed.
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        if lines.next()? != HEADER_RULE {
            return None;
        }
        let mut field = |name: &str| -> Option<String> {
            let line = lines.next()?;
            let rest = line.strip_prefix("# ")?.strip_prefix(name)?.strip_prefix(':')?;
            Some(rest.trim().to_string())
        };

        let policy = field("Strategy")?;
        let rule_type = field("Type")?;
        let owner = field("Owner")?;
        let date = field("Date")?;
        let mode = field("Mode")?;
        let count = field("Count")?;
        let description = field("Desc")?;

        let naive = NaiveDateTime::parse_from_str(&date, HEADER_DATE_FORMAT).ok()?;
        let (count, raw) = count.strip_suffix(')')?.split_once(" (Raw: ")?;

        let header = Self {
            policy,
            rule_type,
            owner,
            generated_at: Utc.from_utc_datetime(&naive),
            kind: mode.parse().ok()?,
            count: count.trim().parse().ok()?,
            raw: raw.trim().parse().ok()?,
            description,
        };
        (lines.next()? == HEADER_RULE).then_some(header)
    }
}

/// Paths and switches for one merge run.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub source_root: PathBuf,
    pub output_root: PathBuf,
    /// Timestamp written into every header of this run.
    pub generated_at: DateTime<Utc>,
    /// Fail IP/CIDR tasks on unparsable entries instead of dropping them.
    pub strict: bool,
}

impl MergeOptions {
    pub fn new(source_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            output_root: output_root.into(),
            generated_at: Utc::now(),
            strict: false,
        }
    }
}

/// Bookkeeping scoped to a single [`Merger::run`].
struct RunState {
    report: MergeReport,
    /// Normalized relative paths declared by configured tasks.
    used_sources: HashSet<String>,
    written: HashSet<PathBuf>,
}

/// Merge driver over a [`FileSystem`].
pub struct Merger<'a, F: FileSystem + ?Sized> {
    fs: &'a F,
    options: MergeOptions,
}

impl<'a, F: FileSystem + ?Sized> Merger<'a, F> {
    pub fn new(fs: &'a F, options: MergeOptions) -> Self {
        Self { fs, options }
    }

    /// Run every configured task, then auto-discovery.
    ///
    /// Errors only on configuration-fatal conditions (missing source root,
    /// unusable output root); task failures are in the returned report.
    pub fn run(&self, config: &MergeConfig) -> Result<MergeReport> {
        let source_root = &self.options.source_root;
        if !self.fs.exists(source_root) || self.fs.is_file(source_root) {
            bail!("Source directory not found: {:?}", source_root);
        }
        let sources = self
            .fs
            .list_files(source_root)
            .with_context(|| format!("Failed to scan source directory: {:?}", source_root))?;

        self.reset_output()?;

        let mut state = RunState {
            report: MergeReport::new(self.options.generated_at),
            used_sources: HashSet::new(),
            written: HashSet::new(),
        };

        info!("Running {} configured merge tasks", config.merges.len());
        for task_config in &config.merges {
            for input in &task_config.inputs {
                if validate_relative_path(input).is_ok() {
                    state.used_sources.insert(normalize_relative(input));
                }
            }
            let label = configured_label(task_config);
            let status = match MergeTask::from_config(task_config) {
                Ok(task) => self.execute(&task, &mut state.written),
                Err(e) => TaskStatus::Failed {
                    error: e.to_string(),
                },
            };
            state
                .report
                .record(log_outcome(label, TaskOrigin::Configured, status));
        }

        let discovered: Vec<MergeTask> = sources
            .iter()
            .filter_map(|path| discoverable(source_root, path))
            .filter(|rel| !state.used_sources.contains(rel))
            .filter_map(|rel| MergeTask::discovered(&rel))
            .collect();
        if !discovered.is_empty() {
            info!("Auto-discovered {} unreferenced source files", discovered.len());
        }
        for task in &discovered {
            let status = self.execute(task, &mut state.written);
            state
                .report
                .record(log_outcome(task.label(), TaskOrigin::Discovered, status));
        }

        Ok(state.report)
    }

    fn reset_output(&self) -> Result<()> {
        let output_root = &self.options.output_root;
        if self.fs.exists(output_root) {
            self.fs
                .remove_dir_all(output_root)
                .with_context(|| format!("Failed to clear output directory: {:?}", output_root))?;
        }
        self.fs
            .create_dir_all(output_root)
            .with_context(|| format!("Failed to create output directory: {:?}", output_root))
    }

    fn execute(&self, task: &MergeTask, written: &mut HashSet<PathBuf>) -> TaskStatus {
        if task.inputs.is_empty() {
            return TaskStatus::Skipped {
                reason: "no inputs declared".to_string(),
            };
        }
        match self.run_task(task, written) {
            Ok(stats) => TaskStatus::Success(stats),
            Err(e) => TaskStatus::Failed {
                error: e.to_string(),
            },
        }
    }

    /// Merge one task's inputs into its artifact.
    ///
    /// Every input is checked before anything is written, so a failed task
    /// never leaves a partial artifact behind.
    pub fn run_task(
        &self,
        task: &MergeTask,
        written: &mut HashSet<PathBuf>,
    ) -> Result<TaskStats, TaskError> {
        let output = task.output_path(&self.options.output_root);
        if written.contains(&output) {
            return Err(TaskError::InvalidTask(format!(
                "output {} already written by an earlier task",
                output.display()
            )));
        }

        let inputs: Vec<PathBuf> = task
            .inputs
            .iter()
            .map(|rel| self.options.source_root.join(rel))
            .collect();
        if let Some(missing) = inputs.iter().find(|p| !self.fs.is_file(p)) {
            return Err(TaskError::MissingSource(missing.clone()));
        }

        let kind = task.kind();
        let mut combined = BTreeSet::new();
        for path in &inputs {
            let bytes = self.fs.read(path).map_err(|source| TaskError::Read {
                path: path.clone(),
                source,
            })?;
            let decoded = decode_source(&bytes);
            let candidates = extract_candidates(&decoded.text);
            for line in candidates.iter().filter_map(|c| merge_line(c)) {
                if self.options.strict && kind == RuleKind::IpCidr && parse_network(line).is_none() {
                    return Err(TaskError::InvalidNetwork {
                        path: path.clone(),
                        entry: line.to_string(),
                    });
                }
                combined.insert(line.to_string());
            }
        }

        let raw = combined.len();
        let (rules, rejects) = RuleSet::build(kind, &combined);
        if rejects.default_routes > 0 {
            warn!(
                "{}: dropped {} default route(s) (/0)",
                task.label(),
                rejects.default_routes
            );
        }
        if rejects.invalid > 0 {
            debug!(
                "{}: dropped {} invalid entries (first: {:?})",
                task.label(),
                rejects.invalid,
                rejects.first_invalid
            );
        }

        let header = ProvenanceHeader {
            policy: task.policy.clone(),
            rule_type: task.rule_type.clone(),
            owner: task.owner.clone(),
            generated_at: self.options.generated_at,
            kind,
            count: rules.len(),
            raw,
            description: task.description.clone(),
        };
        let mut content = header.render();
        content.push_str(&render_entries(&rules.entries()));

        let write_err = |source: std::io::Error| TaskError::Write {
            path: output.clone(),
            source,
        };
        if let Some(parent) = output.parent() {
            self.fs.create_dir_all(parent).map_err(write_err)?;
        }
        self.fs.write(&output, content.as_bytes()).map_err(write_err)?;
        written.insert(output.clone());

        Ok(TaskStats {
            kind,
            sources: inputs.len(),
            raw,
            optimized: rules.len(),
            invalid: rejects.invalid,
            default_routes: rejects.default_routes,
            output,
        })
    }
}

/// A source line as the merge stage sees it: trimmed, comments removed.
fn merge_line(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
        return None;
    }
    let line = match line.split_once('#') {
        Some((before, _)) => before.trim(),
        None => line,
    };
    (!line.is_empty()).then_some(line)
}

/// Relative path of a source file eligible for auto-discovery.
fn discoverable(source_root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(source_root).ok()?;
    let hidden = rel.components().any(|c| match c {
        Component::Normal(part) => part.to_string_lossy().starts_with('.'),
        _ => false,
    });
    if hidden {
        return None;
    }
    let ext = rel.extension()?.to_str()?.to_lowercase();
    if !SOURCE_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    Some(normalize_relative(&rel.to_string_lossy()))
}

fn configured_label(config: &TaskConfig) -> String {
    format!(
        "{}/{}/{}/{}",
        config.strategy,
        config.rule_type,
        config.owner,
        config.filename.as_deref().unwrap_or("<unnamed>")
    )
}

fn log_outcome(task: String, origin: TaskOrigin, status: TaskStatus) -> TaskOutcome {
    match &status {
        TaskStatus::Success(stats) => info!(
            "[OK] {} ({}, {} sources): {} rules (raw {})",
            task,
            stats.kind.label(),
            stats.sources,
            stats.optimized,
            stats.raw
        ),
        TaskStatus::Skipped { reason } => warn!("[SKIP] {}: {}", task, reason),
        TaskStatus::Failed { error: e } => error!("[FAIL] {}: {}", task, e),
    }
    TaskOutcome {
        task,
        origin,
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_abstraction::{MockFileSystem, RealFileSystem};
    use std::fs;
    use tempfile::TempDir;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    fn options(temp: &TempDir) -> MergeOptions {
        MergeOptions {
            source_root: temp.path().join("rulesets"),
            output_root: temp.path().join("merged"),
            generated_at: fixed_time(),
            strict: false,
        }
    }

    fn write_source(temp: &TempDir, rel: &str, content: &str) {
        let path = temp.path().join("rulesets").join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn task(filename: &str, rule_type: &str, inputs: &[&str]) -> TaskConfig {
        TaskConfig {
            strategy: "block".into(),
            rule_type: rule_type.into(),
            owner: "combined".into(),
            filename: Some(filename.into()),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            description: "test merge".into(),
        }
    }

    fn read_output(temp: &TempDir, rel: &str) -> String {
        fs::read_to_string(temp.path().join("merged").join(rel)).unwrap()
    }

    fn body(artifact: &str) -> Vec<&str> {
        artifact.lines().filter(|l| !l.starts_with('#')).collect()
    }

    #[test]
    fn test_merge_domains_from_two_sources() {
        let temp = TempDir::new().unwrap();
        write_source(&temp, "block/domain/a/ads.txt", "b.com\na.com\n# note\n");
        write_source(&temp, "block/domain/b/ads.txt", "a.com\nc.com # trailing\n");
        let config = MergeConfig {
            merges: vec![task(
                "ads.txt",
                "domain",
                &["block/domain/a/ads.txt", "block/domain/b/ads.txt"],
            )],
        };

        let report = Merger::new(&RealFileSystem, options(&temp)).run(&config).unwrap();
        assert_eq!(report.succeeded(), 1);
        assert!(!report.has_failures());

        let artifact = read_output(&temp, "block/domain/combined/ads.txt");
        assert_eq!(body(&artifact), vec!["a.com", "b.com", "c.com"]);
        assert!(artifact.ends_with("c.com\n"));

        let header = ProvenanceHeader::parse(&artifact).unwrap();
        assert_eq!(header.kind, RuleKind::Domain);
        assert_eq!(header.count, 3);
        assert_eq!(header.raw, 3);
        assert_eq!(header.generated_at, fixed_time());
        assert_eq!(header.description, "test merge");
    }

    #[test]
    fn test_merge_collapses_networks() {
        let temp = TempDir::new().unwrap();
        write_source(&temp, "direct/ipcidr/a/cn.txt", "192.168.0.0/24\n10.0.0.0/0\n");
        write_source(&temp, "direct/ipcidr/b/cn.txt", "192.168.1.0/24\n2001:db8::1/32\n");
        let config = MergeConfig {
            merges: vec![task(
                "cn.txt",
                "ipcidr",
                &["direct/ipcidr/a/cn.txt", "direct/ipcidr/b/cn.txt"],
            )],
        };

        let report = Merger::new(&RealFileSystem, options(&temp)).run(&config).unwrap();
        let (_, stats) = report.successes().next().unwrap();
        assert_eq!(stats.kind, RuleKind::IpCidr);
        assert_eq!(stats.raw, 4);
        assert_eq!(stats.optimized, 2);
        assert_eq!(stats.default_routes, 1);

        let artifact = read_output(&temp, "block/ipcidr/combined/cn.txt");
        assert_eq!(body(&artifact), vec!["192.168.0.0/23", "2001:db8::/32"]);
        assert!(artifact.contains("# Mode:     IP-CIDR\n"));
        assert!(artifact.contains("# Count:    2 (Raw: 4)\n"));
    }

    #[test]
    fn test_default_route_only_yields_empty_artifact() {
        let temp = TempDir::new().unwrap();
        write_source(&temp, "x/ipcidr/o/all.txt", "10.0.0.0/0\n");
        let report = Merger::new(&RealFileSystem, options(&temp))
            .run(&MergeConfig::default())
            .unwrap();
        assert_eq!(report.succeeded(), 1);

        let artifact = read_output(&temp, "x/ipcidr/o/all.txt");
        assert!(body(&artifact).is_empty());
        assert!(artifact.contains("# Count:    0 (Raw: 1)\n"));
    }

    #[test]
    fn test_missing_source_fails_without_artifact() {
        let temp = TempDir::new().unwrap();
        write_source(&temp, "block/domain/a/ads.txt", "a.com\n");
        let config = MergeConfig {
            merges: vec![task(
                "ads.txt",
                "domain",
                &["block/domain/a/ads.txt", "block/domain/gone/ads.txt"],
            )],
        };

        let report = Merger::new(&RealFileSystem, options(&temp)).run(&config).unwrap();
        assert_eq!(report.failed(), 1);
        let (label, err) = report.failures().next().unwrap();
        assert_eq!(label, "block/domain/combined/ads.txt");
        assert!(err.contains("gone"));
        assert!(!temp
            .path()
            .join("merged/block/domain/combined/ads.txt")
            .exists());
    }

    #[test]
    fn test_failure_does_not_stop_later_tasks() {
        let temp = TempDir::new().unwrap();
        write_source(&temp, "p/domain/o/ok.txt", "ok.com\n");
        let config = MergeConfig {
            merges: vec![
                task("bad.txt", "domain", &["p/domain/o/missing.txt"]),
                task("ok.txt", "domain", &["p/domain/o/ok.txt"]),
            ],
        };

        let report = Merger::new(&RealFileSystem, options(&temp)).run(&config).unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.outcomes.len(), 2);
    }

    #[test]
    fn test_empty_inputs_skipped() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("rulesets")).unwrap();
        let config = MergeConfig {
            merges: vec![task("none.txt", "domain", &[])],
        };

        let report = Merger::new(&RealFileSystem, options(&temp)).run(&config).unwrap();
        assert_eq!(report.skipped(), 1);
        assert!(!report.has_failures());
    }

    #[test]
    fn test_invalid_task_definitions_fail_individually() {
        let temp = TempDir::new().unwrap();
        write_source(&temp, "a/domain/o/x.txt", "x.com\n");
        let mut no_name = task("x.txt", "domain", &["a/domain/o/x.txt"]);
        no_name.filename = None;
        let escaping = task("y.txt", "domain", &["../outside.txt"]);
        let mut bad_owner = task("z.txt", "domain", &["a/domain/o/x.txt"]);
        bad_owner.owner = "..".into();

        let config = MergeConfig {
            merges: vec![no_name, escaping, bad_owner],
        };
        let report = Merger::new(&RealFileSystem, options(&temp)).run(&config).unwrap();
        assert_eq!(report.failed(), 3);
        let errors: Vec<_> = report.failures().map(|(_, e)| e.to_string()).collect();
        assert!(errors[0].contains("missing filename"));
        assert!(errors[1].contains("escapes"));
        assert!(errors[2].contains("owner"));
    }

    #[test]
    fn test_duplicate_output_fails_second_task() {
        let temp = TempDir::new().unwrap();
        write_source(&temp, "p/domain/o/a.txt", "a.com\n");
        write_source(&temp, "p/domain/o/b.txt", "b.com\n");
        let config = MergeConfig {
            merges: vec![
                task("out.txt", "domain", &["p/domain/o/a.txt"]),
                task("out.txt", "domain", &["p/domain/o/b.txt"]),
            ],
        };

        let report = Merger::new(&RealFileSystem, options(&temp)).run(&config).unwrap();
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(body(&read_output(&temp, "block/domain/combined/out.txt")), vec!["a.com"]);
    }

    #[test]
    fn test_auto_discovery_covers_unreferenced_sources() {
        let temp = TempDir::new().unwrap();
        write_source(&temp, "block/domain/a/used.txt", "used.com\n");
        write_source(&temp, "block/domain/a/free.txt", "free.com\n");
        write_source(&temp, "direct/ipcidr/b/nets.list", "10.0.0.0/9\n10.128.0.0/9\n");
        write_source(&temp, "loose.txt", "loose.com\n");
        write_source(&temp, ".git/config.txt", "ignored.com\n");
        write_source(&temp, "block/domain/a/README.md", "ignored.com\n");

        let config = MergeConfig {
            merges: vec![task("merged.txt", "domain", &["./block/domain/a/used.txt"])],
        };
        let report = Merger::new(&RealFileSystem, options(&temp)).run(&config).unwrap();

        let discovered: Vec<_> = report
            .outcomes
            .iter()
            .filter(|o| o.origin == TaskOrigin::Discovered)
            .map(|o| o.task.as_str())
            .collect();
        assert_eq!(
            discovered,
            vec![
                "block/domain/a/free.txt",
                "direct/ipcidr/b/nets.list",
                "Auto/General/Unknown/loose.txt",
            ]
        );
        assert!(!report.has_failures());

        assert_eq!(body(&read_output(&temp, "block/domain/a/free.txt")), vec!["free.com"]);
        assert_eq!(body(&read_output(&temp, "direct/ipcidr/b/nets.list")), vec!["10.0.0.0/8"]);
        let loose = read_output(&temp, "Auto/General/Unknown/loose.txt");
        assert!(loose.contains("# Desc:     Auto-detected from loose.txt\n"));
        assert!(!temp.path().join("merged/block/domain/a/used.txt").exists());
    }

    #[test]
    fn test_declared_missing_input_is_not_rediscovered() {
        let temp = TempDir::new().unwrap();
        write_source(&temp, "p/domain/o/a.txt", "a.com\n");
        let config = MergeConfig {
            merges: vec![task("out.txt", "domain", &["p/domain/o/a.txt", "p/domain/o/gone.txt"])],
        };
        let report = Merger::new(&RealFileSystem, options(&temp)).run(&config).unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn test_output_root_is_cleared() {
        let temp = TempDir::new().unwrap();
        write_source(&temp, "p/domain/o/a.txt", "a.com\n");
        let stale = temp.path().join("merged/old/stale.txt");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "stale.com\n").unwrap();

        Merger::new(&RealFileSystem, options(&temp))
            .run(&MergeConfig::default())
            .unwrap();
        assert!(!stale.exists());
        assert!(temp.path().join("merged/p/domain/o/a.txt").exists());
    }

    #[test]
    fn test_missing_source_root_is_fatal() {
        let temp = TempDir::new().unwrap();
        let stale = temp.path().join("merged/keep.txt");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, "x").unwrap();

        let result = Merger::new(&RealFileSystem, options(&temp)).run(&MergeConfig::default());
        assert!(result.is_err());
        assert!(stale.exists(), "output must not be touched on fatal errors");
    }

    #[test]
    fn test_deterministic_output() {
        let temp = TempDir::new().unwrap();
        write_source(&temp, "p/domain/o/a.txt", "z.com\n||ads.example.com^\nb.com\n");
        write_source(&temp, "p/ipcidr/o/n.txt", "10.0.1.0/24\n10.0.0.0/24\n::1\n");

        let merger = Merger::new(&RealFileSystem, options(&temp));
        merger.run(&MergeConfig::default()).unwrap();
        let first_a = read_output(&temp, "p/domain/o/a.txt");
        let first_n = read_output(&temp, "p/ipcidr/o/n.txt");
        merger.run(&MergeConfig::default()).unwrap();
        assert_eq!(read_output(&temp, "p/domain/o/a.txt"), first_a);
        assert_eq!(read_output(&temp, "p/ipcidr/o/n.txt"), first_n);
        assert_eq!(body(&first_n), vec!["10.0.0.0/23", "::1/128"]);
    }

    #[test]
    fn test_strict_mode_rejects_invalid_network() {
        let temp = TempDir::new().unwrap();
        write_source(&temp, "p/ipcidr/o/n.txt", "10.0.0.0/8\nnot-a-network\n");

        let lenient = Merger::new(&RealFileSystem, options(&temp))
            .run(&MergeConfig::default())
            .unwrap();
        assert_eq!(lenient.succeeded(), 1);

        let mut opts = options(&temp);
        opts.strict = true;
        let strict = Merger::new(&RealFileSystem, opts).run(&MergeConfig::default()).unwrap();
        assert_eq!(strict.failed(), 1);
        let (_, err) = strict.failures().next().unwrap();
        assert!(err.contains("not-a-network"));
        assert!(!temp.path().join("merged/p/ipcidr/o/n.txt").exists());
    }

    #[test]
    fn test_strict_mode_rejects_truncatable_address() {
        let temp = TempDir::new().unwrap();
        write_source(&temp, "p/ipcidr/o/n.txt", "10.0.0.0/8\n10.0.0.1000\n");

        let lenient = Merger::new(&RealFileSystem, options(&temp))
            .run(&MergeConfig::default())
            .unwrap();
        let (_, stats) = lenient.successes().next().unwrap();
        assert_eq!(stats.invalid, 1);
        assert_eq!(body(&read_output(&temp, "p/ipcidr/o/n.txt")), vec!["10.0.0.0/8"]);

        let mut opts = options(&temp);
        opts.strict = true;
        let strict = Merger::new(&RealFileSystem, opts).run(&MergeConfig::default()).unwrap();
        let (_, err) = strict.failures().next().unwrap();
        assert!(err.contains("10.0.0.1000"));
    }

    #[test]
    fn test_raw_payload_and_base64_sources_are_extracted() {
        let temp = TempDir::new().unwrap();
        write_source(
            &temp,
            "proxy/domain/o/clash.yaml",
            "payload:\n  - '+.a.com'\n  - DOMAIN-SUFFIX,b.com\nrules:\n  - MATCH,DIRECT\n",
        );
        // "c.com\nd.com\ne.example.org\n" in base64
        write_source(&temp, "proxy/domain/o/b64.txt", "Yy5jb20KZC5jb20KZS5leGFtcGxlLm9yZwo=\n");
        write_source(
            &temp,
            "direct/ipcidr/o/cn.yaml",
            "payload:\n  - IP-CIDR,10.0.0.0/9,no-resolve\n  - IP-CIDR,10.128.0.0/9\n",
        );

        let report = Merger::new(&RealFileSystem, options(&temp))
            .run(&MergeConfig::default())
            .unwrap();
        assert_eq!(report.succeeded(), 3);

        assert_eq!(body(&read_output(&temp, "proxy/domain/o/clash.yaml")), vec!["a.com", "b.com"]);
        assert_eq!(
            body(&read_output(&temp, "proxy/domain/o/b64.txt")),
            vec!["c.com", "d.com", "e.example.org"]
        );
        assert_eq!(body(&read_output(&temp, "direct/ipcidr/o/cn.yaml")), vec!["10.0.0.0/8"]);
    }

    #[test]
    fn test_merge_line() {
        assert_eq!(merge_line("  a.com  "), Some("a.com"));
        assert_eq!(merge_line("a.com # comment"), Some("a.com"));
        assert_eq!(merge_line("# comment"), None);
        assert_eq!(merge_line("// comment"), None);
        assert_eq!(merge_line("   "), None);
    }

    #[test]
    fn test_discovered_task_components() {
        let t = MergeTask::discovered("block/domain/owner/deep/list.txt").unwrap();
        assert_eq!(t.label(), "block/domain/owner/list.txt");
        assert_eq!(t.inputs, vec!["block/domain/owner/deep/list.txt"]);

        let t = MergeTask::discovered("block/list.txt").unwrap();
        assert_eq!(t.label(), "block/General/Unknown/list.txt");
        assert_eq!(t.origin, TaskOrigin::Discovered);
    }

    #[test]
    fn test_task_kind_inference() {
        let t = MergeTask::discovered("direct/ipcidr/o/cn.txt").unwrap();
        assert_eq!(t.kind(), RuleKind::IpCidr);
        let t = MergeTask::discovered("direct/domain/o/telegram-cidr.txt").unwrap();
        assert_eq!(t.kind(), RuleKind::IpCidr);
        let t = MergeTask::discovered("direct/domain/o/cn.txt").unwrap();
        assert_eq!(t.kind(), RuleKind::Domain);
    }

    #[test]
    fn test_header_roundtrip_and_newlines_in_description() {
        let header = ProvenanceHeader {
            policy: "block".into(),
            rule_type: "domain".into(),
            owner: "o".into(),
            generated_at: fixed_time(),
            kind: RuleKind::Domain,
            count: 12,
            raw: 40,
            description: "two\nlines".into(),
        };
        let text = header.render();
        assert_eq!(text.lines().count(), 9);
        assert!(text.contains("# Date:     2024-01-02 03:04:05 UTC\n"));

        let parsed = ProvenanceHeader::parse(&text).unwrap();
        assert_eq!(parsed.description, "two lines");
        assert_eq!(parsed.count, 12);
        assert_eq!(parsed.raw, 40);
        assert!(ProvenanceHeader::parse("a.com\n").is_none());
    }

    #[test]
    fn test_mock_fs_read_error_fails_task() {
        let mut mock = MockFileSystem::new();
        mock.expect_exists().returning(|_| true);
        mock.expect_is_file()
            .returning(|p| p.extension().is_some());
        mock.expect_list_files()
            .returning(|_| Ok(vec![PathBuf::from("/src/p/domain/o/a.txt")]));
        mock.expect_remove_dir_all().returning(|_| Ok(()));
        mock.expect_create_dir_all().returning(|_| Ok(()));
        mock.expect_read().returning(|_| {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"))
        });
        mock.expect_write().never();

        let opts = MergeOptions {
            source_root: PathBuf::from("/src"),
            output_root: PathBuf::from("/out"),
            generated_at: fixed_time(),
            strict: false,
        };
        let report = Merger::new(&mock, opts).run(&MergeConfig::default()).unwrap();
        assert_eq!(report.failed(), 1);
        let (_, err) = report.failures().next().unwrap();
        assert!(err.contains("denied"));
    }
}
