//! # ruleset-sync - Rule list normalization and aggregation
//!
//! Takes traffic-routing rule lists from many heterogeneous upstreams (plain
//! lists, Adblock filters, hosts files, Clash `payload:` documents, base64
//! blobs), reduces them to two canonical kinds and publishes merged artifacts.
//!
//! - **Domains** - lowercase, no wildcard or anchor markers, no scheme, path
//!   or port, sorted and deduplicated
//! - **IP/CIDR** - host bits masked, `/0` dropped, collapsed per family to the
//!   minimal set of disjoint covering networks
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ruleset-sync                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: sync, process, merge, normalize            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Sources (sources.urls) + Fetcher (reqwest + rustls)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Decoder ──► Extractor ──► Domain normalizer                │
//! │   (codecs,    (plain /  └► IP normalizer + collapser        │
//! │    base64)     payload)      (ipnet)                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Merger (merge-config.yaml + auto-discovery)                │
//! │    └── Provenance header + sorted entries per artifact      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Reports (text via tracing, JSON, CI step summary)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```
//! use ruleset_sync::rules::{clean_source, RuleKind};
//!
//! let text = b"payload:\n  - '+.ads.example.com'\n  - 'DOMAIN-SUFFIX,track.example.net'\n";
//! let cleaned = clean_source(text, RuleKind::Domain);
//! assert_eq!(cleaned.rules.entries(), vec!["ads.example.com", "track.example.net"]);
//!
//! let nets = clean_source(b"192.168.0.0/24\n192.168.1.0/24\n10.0.0.0/0\n", RuleKind::IpCidr);
//! assert_eq!(nets.rules.entries(), vec!["192.168.0.0/23"]);
//! ```
//!
//! ## Modules
//!
//! - [`aggregator`] - IP/CIDR parsing and collapsing
//! - [`cli`] - Command-line interface definitions
//! - [`commands`] - CLI command implementations
//! - [`config`] - Merge configuration parsing
//! - [`decoder`] - Text codecs and opportunistic base64 decoding
//! - [`domain`] - Domain normalization
//! - [`error`] - Per-task error type
//! - [`extractor`] - Candidate line extraction (plain and payload dialects)
//! - [`fetcher`] - HTTP client for downloading upstream lists
//! - [`fs_abstraction`] - Filesystem seam for the stage drivers
//! - [`lock`] - File locking for concurrent execution prevention
//! - [`merger`] - Merge stage and provenance headers
//! - [`processor`] - In-place sanitization of the rulesets tree
//! - [`report`] - Run reports for every stage
//! - [`rules`] - Rule kinds, rule sets and the per-source pipeline
//! - [`sources`] - Upstream source list parsing
//! - [`sync`] - Sync stage (download, clean, write, orphan cleanup)
//! - [`utils`] - Common utility functions (formatting, timestamps)
//! - [`validation`] - Path component validation

pub mod aggregator;
pub mod cli;
pub mod commands;
pub mod config;
pub mod decoder;
pub mod domain;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod fs_abstraction;
pub mod lock;
pub mod merger;
pub mod processor;
pub mod report;
pub mod rules;
pub mod sources;
pub mod sync;
pub mod utils;
pub mod validation;

pub use cli::{Cli, Commands};
pub use config::MergeConfig;
pub use error::TaskError;
pub use rules::{RuleKind, RuleSet};
