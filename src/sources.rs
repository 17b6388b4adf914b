//! Upstream source list (`sources.urls`).
//!
//! ```text
//! [policy:reject]
//! [type:domain]
//! https://raw.githubusercontent.com/owner/repo/main/reject-list.txt
//!
//! [type:ipcidr]
//! https://cdn.jsdelivr.net/gh/other/lists@release/cncidr.yaml
//! ```
//!
//! Each URL inherits the most recent `[policy:…]` and `[type:…]` headers and
//! is written to `<policy>/<type>/<owner>/<stem>.txt` under the rulesets tree.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::rules::RuleKind;
use crate::validation::validate_component;

static POLICY_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[policy:(.+)\]$").expect("Invalid policy header regex"));
static TYPE_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[type:(.+)\]$").expect("Invalid type header regex"));
static URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").expect("Invalid URL regex"));

const DEFAULT_POLICY: &str = "proxy";
const DEFAULT_TYPE: &str = "domain";

/// One upstream list and where its cleaned copy lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub policy: String,
    pub rule_type: String,
    pub url: String,
    pub owner: String,
    pub file_name: String,
}

impl SourceEntry {
    fn new(policy: &str, rule_type: &str, url: &str) -> Result<Self> {
        let parsed = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        let owner = owner_from_url(&parsed).with_context(|| format!("No owner in URL: {}", url))?;
        let file_name = format!("{}.txt", file_stem(&parsed));

        validate_component(policy)?;
        validate_component(&owner)?;
        validate_component(&file_name)?;

        Ok(Self {
            policy: policy.to_string(),
            rule_type: rule_type.to_string(),
            url: url.to_string(),
            owner,
            file_name,
        })
    }

    /// Path of the cleaned list, relative to the rulesets root.
    pub fn target_path(&self) -> PathBuf {
        Path::new(&self.policy)
            .join(&self.rule_type)
            .join(&self.owner)
            .join(&self.file_name)
    }

    pub fn kind(&self) -> RuleKind {
        if self.rule_type == "ipcidr" {
            RuleKind::IpCidr
        } else {
            RuleKind::Domain
        }
    }
}

/// Parsed `sources.urls`.
#[derive(Debug, Clone, Default)]
pub struct SourceList {
    pub entries: Vec<SourceEntry>,
}

impl SourceList {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read source list: {:?}", path))?;
        Ok(Self::parse(&content))
    }

    /// Parse the source list. Lines with an unusable URL are logged and skipped.
    pub fn parse(content: &str) -> Self {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut policy = DEFAULT_POLICY.to_string();
        let mut rule_type = DEFAULT_TYPE.to_string();
        let mut entries = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(caps) = POLICY_HEADER.captures(line) {
                let candidate = normalize_policy(&caps[1]);
                match validate_component(&candidate) {
                    Ok(()) => policy = candidate,
                    Err(e) => warn!("Ignoring policy header {}: {:#}", line, e),
                }
                continue;
            }
            if let Some(caps) = TYPE_HEADER.captures(line) {
                rule_type = normalize_type(&caps[1]).to_string();
                continue;
            }
            let Some(url) = URL.find(line) else {
                continue;
            };
            match SourceEntry::new(&policy, &rule_type, url.as_str()) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!("Skipping source {}: {:#}", url.as_str(), e),
            }
        }
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Map a free-form policy name onto the canonical policy directories.
///
/// # Examples
/// ```
/// use ruleset_sync::sources::normalize_policy;
/// assert_eq!(normalize_policy("Reject"), "block");
/// assert_eq!(normalize_policy("no-proxy"), "direct");
/// assert_eq!(normalize_policy("GFW"), "proxy");
/// assert_eq!(normalize_policy("streaming"), "streaming");
/// ```
pub fn normalize_policy(name: &str) -> String {
    let name = name.trim().to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| name.contains(w));
    if has(&["reject", "block", "deny", "ads", "adblock"]) {
        "block".to_string()
    } else if has(&["direct", "bypass", "no-proxy"]) {
        "direct".to_string()
    } else if has(&["proxy", "gfw"]) {
        "proxy".to_string()
    } else if name.is_empty() {
        DEFAULT_POLICY.to_string()
    } else {
        name
    }
}

/// `ipcidr` if the name mentions `ip` or `cidr`, otherwise `domain`.
pub fn normalize_type(name: &str) -> &'static str {
    let name = name.to_lowercase();
    if name.contains("ip") || name.contains("cidr") {
        "ipcidr"
    } else {
        "domain"
    }
}

/// Owner directory for a URL.
///
/// GitHub hosts use the first path segment, jsDelivr `gh/` URLs the
/// segment after `gh`, anything else the host name.
pub fn owner_from_url(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    let mut segments = url.path_segments().into_iter().flatten().filter(|s| !s.is_empty());

    if host.contains("github") {
        segments.next().map(str::to_string)
    } else if host == "cdn.jsdelivr.net" {
        match (segments.next(), segments.next()) {
            (Some("gh"), Some(owner)) => Some(owner.to_string()),
            _ => Some("jsdelivr".to_string()),
        }
    } else {
        Some(host)
    }
}

/// Last path segment up to its first `.`; `index` when there is none.
fn file_stem(url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|mut s| s.next_back())
        .unwrap_or_default();
    let stem = last.split('.').next().unwrap_or_default();
    if stem.is_empty() {
        "index".to_string()
    } else {
        stem.to_string()
    }
}
