//! Configuration module for the harvester
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Structural validation happens here; cross-references between schemas,
//! targets and rules are checked when the [`Catalog`](crate::catalog::Catalog)
//! is built.
//!
//! # Example
//!
//! ```no_run
//! use listing_harvester::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Crawl workers: {}", config.pool.crawl_workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, FetchConfig, FieldEntry, OutputConfig, PoolConfig, RetryConfig, RuleEntry,
    SchemaEntry, ScrollConfig, TargetEntry,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
