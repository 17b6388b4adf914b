//! Normalize command implementation.

use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

use crate::aggregator::count_ips;
use crate::rules::{clean_source, render_entries, RuleKind, RuleSet};
use crate::utils::format_count_with_separator;

/// Run the normalize command
pub async fn run(kind: RuleKind, file: Option<&Path>) -> Result<()> {
    let bytes = match file {
        Some(path) => std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let cleaned = clean_source(&bytes, kind);
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(render_entries(&cleaned.rules.entries()).as_bytes())?;
    stdout.flush()?;

    info!(
        "{}: {} lines -> {} entries ({} invalid, {} default routes dropped)",
        kind,
        cleaned.original_lines,
        cleaned.rules.len(),
        cleaned.rejects.invalid,
        cleaned.rejects.default_routes
    );
    if let RuleSet::Networks(nets) = &cleaned.rules {
        let addresses = count_ips(nets);
        let shown = usize::try_from(addresses)
            .map(format_count_with_separator)
            .unwrap_or_else(|_| addresses.to_string());
        info!("Networks cover {} addresses", shown);
    }
    Ok(())
}
