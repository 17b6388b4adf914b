//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{DEFAULT_CONFIG_FILE, DEFAULT_OUTPUT_DIR, DEFAULT_SOURCES_FILE, DEFAULT_SOURCE_DIR};
use crate::rules::RuleKind;

#[derive(Parser)]
#[command(name = "ruleset-sync")]
#[command(
    author,
    version,
    about = "Normalize, collapse and merge domain and IP/CIDR rule lists"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download every upstream list and write its cleaned copy
    Sync {
        /// Upstream source list
        #[arg(long, default_value = DEFAULT_SOURCES_FILE)]
        sources: PathBuf,

        /// Rulesets directory to write into
        #[arg(short, long, default_value = DEFAULT_SOURCE_DIR)]
        output: PathBuf,

        /// Exit non-zero if any source failed
        #[arg(long)]
        strict: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Sanitize every rule file of the rulesets tree in place
    Process {
        /// Rulesets directory
        #[arg(short, long, default_value = DEFAULT_SOURCE_DIR)]
        source: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Merge rulesets into published artifacts
    Merge {
        /// Merge configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Rulesets directory
        #[arg(short, long, default_value = DEFAULT_SOURCE_DIR)]
        source: PathBuf,

        /// Output directory (cleared on every run)
        #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
        output: PathBuf,

        /// Fail IP/CIDR tasks on unparsable entries
        #[arg(long)]
        strict: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the canonical form of a rule list (file or stdin)
    Normalize {
        /// Rule kind: domain or ipcidr
        #[arg(short, long, default_value = "domain", value_parser = parse_kind)]
        kind: RuleKind,

        /// Input file (reads stdin when omitted)
        file: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn parse_kind(s: &str) -> Result<RuleKind, String> {
    s.parse()
}
