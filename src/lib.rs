//! Listing Harvester: a concurrent crawl → extract → persist pipeline
//!
//! This crate collects paginated, dynamically-rendered listings from a set of
//! configured targets, extracts structured records with declarative field
//! rules, and upserts them into SQLite without rewriting unchanged rows.

pub mod catalog;
pub mod config;
pub mod crawler;
pub mod extract;
pub mod fetch;
pub mod output;
pub mod storage;

use thiserror::Error;

/// Main error type for harvester operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] crawler::PoolError),

    #[error("Extraction error: {0}")]
    Extract(#[from] extract::ExtractError),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("All {0} targets failed")]
    AllTargetsFailed(usize),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector in config: {0}")]
    InvalidSelector(String),
}

/// Result type alias for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use catalog::{Catalog, Schema, Target};
pub use config::Config;
pub use crawler::{Harvester, TaskStatus, WorkerPool};
pub use extract::{Extractor, FieldValue, Record};
pub use output::RunReport;
pub use storage::{SaveOutcome, SqliteStore, Store};
