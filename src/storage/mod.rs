//! Storage module for persisting extracted records
//!
//! This module handles all database operations for the harvester, including:
//! - SQLite initialization and per-schema table management
//! - Diff-aware idempotent upserts keyed by each schema's natural key
//! - Insert/update/duplicate/error accounting
//! - Run history

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{Store, StorageError, StorageResult};

use chrono::{DateTime, Utc};
use std::path::Path;

/// Initializes or opens a store database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStore)` - Successfully initialized store
/// * `Err(StorageError)` - Failed to open or initialize the database
pub fn open_store(path: &Path) -> StorageResult<SqliteStore> {
    SqliteStore::open(path)
}

/// Result of a single save
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// No row with this natural key existed
    Inserted,

    /// The row existed and these fields were rewritten
    Updated { changed: Vec<String> },

    /// The row existed and nothing differed; no write happened
    Duplicate,
}

/// Save counters
///
/// Monotonically increasing for the lifetime of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub inserted: u64,
    pub updated: u64,
    pub duplicates: u64,
    pub errors: u64,
}

impl StoreStats {
    /// Saves that completed without error
    pub fn saved(&self) -> u64 {
        self.inserted + self.updated + self.duplicates
    }

    /// Counts accumulated since an earlier snapshot of the same store
    pub fn since(&self, earlier: &StoreStats) -> StoreStats {
        StoreStats {
            inserted: self.inserted.saturating_sub(earlier.inserted),
            updated: self.updated.saturating_sub(earlier.updated),
            duplicates: self.duplicates.saturating_sub(earlier.duplicates),
            errors: self.errors.saturating_sub(earlier.errors),
        }
    }
}

/// One row of the run history
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config_hash: String,
    pub targets_total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub pool_errors: u64,
}
