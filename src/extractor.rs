//! Candidate line extraction from decoded rule text.
//!
//! Understands plain one-entry-per-line lists (including Adblock and hosts
//! syntax, which are unwrapped later by the normalizers) and Clash-style YAML
//! documents that carry their entries under a `payload:` key.

use once_cell::sync::Lazy;
use regex::Regex;

/// Number of leading lines inspected when looking for a `payload:` key.
pub const PAYLOAD_SCAN_LINES: usize = 512;

static PAYLOAD_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*payload:").expect("payload key regex"));

static INLINE_PAYLOAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*payload:\s*\[(.*)\]").expect("inline payload regex"));

static TOP_LEVEL_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+\s*:(\s|$)").expect("top-level key regex"));

/// Which dialect the whole document is read as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    Plain,
    YamlPayload,
}

impl ExtractMode {
    /// Pick the mode for `text` by looking for a `payload:` key near the top.
    pub fn detect(text: &str) -> Self {
        if text
            .lines()
            .take(PAYLOAD_SCAN_LINES)
            .any(|line| PAYLOAD_KEY.is_match(line))
        {
            ExtractMode::YamlPayload
        } else {
            ExtractMode::Plain
        }
    }
}

/// Extract candidate entries from `text`, in file order.
///
/// Never fails: malformed input yields fewer candidates.
pub fn extract_candidates(text: &str) -> Vec<String> {
    match ExtractMode::detect(text) {
        ExtractMode::Plain => text.lines().filter_map(plain_candidate).collect(),
        ExtractMode::YamlPayload => extract_payload(text),
    }
}

fn plain_candidate(raw: &str) -> Option<String> {
    let line = raw.trim();
    if is_comment_or_blank(line) {
        return None;
    }
    let line = strip_inline_comment(line);
    let line = line.strip_prefix("- ").map(str::trim).unwrap_or(line);
    non_empty(unquote(line))
}

fn extract_payload(text: &str) -> Vec<String> {
    let mut candidates = Vec::new();
    let mut in_payload = false;

    for raw in text.lines() {
        let line = raw.trim();

        if PAYLOAD_KEY.is_match(raw) {
            if let Some(caps) = INLINE_PAYLOAD.captures(raw) {
                candidates.extend(
                    caps[1]
                        .split(',')
                        .filter_map(|item| non_empty(unquote(item.trim()))),
                );
                in_payload = false;
            } else {
                in_payload = true;
            }
            continue;
        }

        if !in_payload || is_comment_or_blank(line) {
            continue;
        }

        if let Some(item) = line.strip_prefix('-') {
            let item = strip_inline_comment(item.trim());
            if let Some(candidate) = non_empty(unquote(item)) {
                candidates.push(candidate);
            }
        } else if TOP_LEVEL_KEY.is_match(raw) {
            in_payload = false;
        }
    }

    candidates
}

fn is_comment_or_blank(line: &str) -> bool {
    line.is_empty() || line.starts_with('#') || line.starts_with('!') || line.starts_with("//")
}

fn strip_inline_comment(line: &str) -> &str {
    match line.find(" #") {
        Some(idx) => line[..idx].trim_end(),
        None => line,
    }
}

/// Strip one pair of matching surrounding quotes.
fn unquote(s: &str) -> &str {
    for quote in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(quote) && s.ends_with(quote) {
            return s[1..s.len() - 1].trim();
        }
    }
    s
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
