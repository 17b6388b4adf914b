//! Domain rule normalization.
//!
//! Turns a candidate line in any supported dialect (plain, Adblock, hosts,
//! Clash/v2ray prefixed rules) into a bare lowercase domain, or discards it.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Rule-syntax prefixes, in priority order. At most one is removed.
const RULE_PREFIXES: &[&str] = &[
    "full:",
    "domain:",
    "host:",
    "keyword:",
    "regexp:",
    "domain-suffix:",
    "domain-keyword:",
    "+.",
];

/// Clash classical prefixes. The trailing `,policy` field is dropped with them.
const CLASSICAL_PREFIXES: &[&str] = &["domain-suffix,", "domain,", "host-suffix,", "host,"];

/// First tokens that mark a hosts-file line.
const HOSTS_ADDRESSES: &[&str] = &["127.0.0.1", "0.0.0.0", "::1"];

/// Leading wildcard/anchor markers, one of which is stripped.
const WILDCARD_PREFIXES: &[&str] = &["*.", "+.", "."];

static DOTTED_QUAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,3}(\.\d{1,3}){3}$").expect("dotted quad regex"));

/// Normalize one candidate into a canonical domain.
///
/// Returns `None` when the candidate is an exception rule, an IP literal or
/// anything that does not reduce to a plausible domain name.
///
/// # Examples
/// ```
/// use ruleset_sync::domain::normalize_domain;
/// assert_eq!(normalize_domain("||example.com^").as_deref(), Some("example.com"));
/// assert_eq!(normalize_domain("*.EXAMPLE.com/path?x=1").as_deref(), Some("example.com"));
/// assert_eq!(normalize_domain("192.168.1.1"), None);
/// ```
pub fn normalize_domain(candidate: &str) -> Option<String> {
    let lowered = candidate.trim().to_lowercase();
    if lowered.starts_with("@@") {
        return None;
    }

    let s = strip_rule_prefix(&lowered);
    let s = unwrap_hosts_entry(s);
    let s = unwrap_adblock(s);
    let s = strip_wildcard(s);
    let s = strip_location(s);

    is_canonical(s).then(|| s.to_string())
}

fn strip_rule_prefix(s: &str) -> &str {
    if let Some(rest) = RULE_PREFIXES.iter().find_map(|p| s.strip_prefix(p)) {
        return rest;
    }
    if let Some(rest) = CLASSICAL_PREFIXES.iter().find_map(|p| s.strip_prefix(p)) {
        return rest.split(',').next().unwrap_or_default().trim();
    }
    s
}

fn unwrap_hosts_entry(s: &str) -> &str {
    let mut tokens = s.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some(first), Some(second)) if HOSTS_ADDRESSES.contains(&first) => second,
        _ => s,
    }
}

fn unwrap_adblock(s: &str) -> &str {
    let s = s.strip_prefix("||").unwrap_or(s);
    let s = s.split('$').next().unwrap_or_default();
    s.strip_suffix('^').unwrap_or(s)
}

fn strip_wildcard(s: &str) -> &str {
    WILDCARD_PREFIXES
        .iter()
        .find_map(|p| s.strip_prefix(p))
        .unwrap_or(s)
}

/// Drop scheme, path and port. Path goes before port: a path may contain `:`.
fn strip_location(s: &str) -> &str {
    let s = s.split_once("://").map_or(s, |(_, rest)| rest);
    let s = s.split('/').next().unwrap_or_default();
    s.split(':').next().unwrap_or_default()
}

fn is_canonical(s: &str) -> bool {
    !s.is_empty()
        && s.contains('.')
        && !s.starts_with('.')
        && !s.chars().any(char::is_whitespace)
        && !DOTTED_QUAD.is_match(s)
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '-' | '_'))
}

/// Normalize a batch of candidates into a sorted, deduplicated set.
pub fn normalize_domains<I, S>(candidates: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    candidates
        .into_iter()
        .filter_map(|c| normalize_domain(c.as_ref()))
        .collect()
}
