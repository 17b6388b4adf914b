//! Rule kinds, canonical rule sets and the per-source cleaning pipeline.

use ipnet::IpNet;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use crate::aggregator::NetworkCollection;
use crate::decoder::decode_source;
use crate::domain::normalize_domain;
use crate::extractor::extract_candidates;

/// The canonical kind of a rule list. Decided once per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleKind {
    Domain,
    IpCidr,
}

impl RuleKind {
    /// Infer the kind of a merge target from its rule-type and filename.
    ///
    /// `ip` or `cidr` anywhere in either (case-insensitive) selects
    /// [`RuleKind::IpCidr`].
    pub fn infer(rule_type: &str, filename: &str) -> Self {
        let haystack = format!("{}{}", rule_type, filename).to_lowercase();
        if haystack.contains("ip") || haystack.contains("cidr") {
            RuleKind::IpCidr
        } else {
            RuleKind::Domain
        }
    }

    /// Infer the kind of a source file from its location in the rulesets tree.
    ///
    /// Only whole directory components count: an `ipcidr` or `ip` directory
    /// selects [`RuleKind::IpCidr`].
    pub fn from_source_path(path: &Path) -> Self {
        let is_ip = path
            .parent()
            .into_iter()
            .flat_map(Path::components)
            .filter_map(|c| c.as_os_str().to_str())
            .any(|c| {
                let c = c.to_lowercase();
                c == "ipcidr" || c == "ip"
            });
        if is_ip {
            RuleKind::IpCidr
        } else {
            RuleKind::Domain
        }
    }

    /// Label written into provenance headers.
    pub fn label(self) -> &'static str {
        match self {
            RuleKind::Domain => "DOMAIN",
            RuleKind::IpCidr => "IP-CIDR",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "domain" => Ok(RuleKind::Domain),
            "ipcidr" | "ip-cidr" | "ip" | "cidr" => Ok(RuleKind::IpCidr),
            other => Err(format!("Unknown rule kind '{}'. Valid values: domain, ipcidr", other)),
        }
    }
}

/// A canonical, deduplicated rule set of one kind.
#[derive(Debug, Clone)]
pub enum RuleSet {
    Domains(BTreeSet<String>),
    Networks(Vec<IpNet>),
}

/// What was dropped while building a [`RuleSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RejectStats {
    /// Candidates that did not normalize to an entry.
    pub invalid: usize,
    /// `/0` networks dropped as unsafe.
    pub default_routes: usize,
    /// First invalid candidate, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_invalid: Option<String>,
}

impl RuleSet {
    /// Normalize `candidates` as `kind` and build the canonical set.
    pub fn build<I, S>(kind: RuleKind, candidates: I) -> (Self, RejectStats)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match kind {
            RuleKind::Domain => {
                let mut stats = RejectStats::default();
                let mut domains = BTreeSet::new();
                for candidate in candidates {
                    match normalize_domain(candidate.as_ref()) {
                        Some(domain) => {
                            domains.insert(domain);
                        }
                        None => {
                            stats.invalid += 1;
                            if stats.first_invalid.is_none() {
                                stats.first_invalid = Some(candidate.as_ref().to_string());
                            }
                        }
                    }
                }
                (RuleSet::Domains(domains), stats)
            }
            RuleKind::IpCidr => {
                let collection: NetworkCollection = candidates.into_iter().collect();
                let stats = RejectStats {
                    invalid: collection.invalid,
                    default_routes: collection.default_routes,
                    first_invalid: collection.first_invalid.clone(),
                };
                (RuleSet::Networks(collection.collapse()), stats)
            }
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            RuleSet::Domains(_) => RuleKind::Domain,
            RuleSet::Networks(_) => RuleKind::IpCidr,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RuleSet::Domains(d) => d.len(),
            RuleSet::Networks(n) => n.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in output order, one string per line.
    pub fn entries(&self) -> Vec<String> {
        match self {
            RuleSet::Domains(d) => d.iter().cloned().collect(),
            RuleSet::Networks(n) => n.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Result of running one raw source through decode, extract and normalize.
#[derive(Debug, Clone)]
pub struct CleanedSource {
    pub rules: RuleSet,
    pub rejects: RejectStats,
    /// Lines in the decoded text.
    pub original_lines: usize,
    pub was_base64: bool,
}

/// Full per-source pipeline: raw bytes to a canonical rule set.
pub fn clean_source(bytes: &[u8], kind: RuleKind) -> CleanedSource {
    let decoded = decode_source(bytes);
    let candidates = extract_candidates(&decoded.text);
    let (rules, rejects) = RuleSet::build(kind, &candidates);
    CleanedSource {
        rules,
        rejects,
        original_lines: decoded.text.lines().count(),
        was_base64: decoded.was_base64,
    }
}

/// Render entries as file content: one per line, trailing newline.
pub fn render_entries(entries: &[String]) -> String {
    let mut out = String::with_capacity(entries.iter().map(|e| e.len() + 1).sum());
    for entry in entries {
        out.push_str(entry);
        out.push('\n');
    }
    out
}
