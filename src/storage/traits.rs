//! Storage traits and error types
//!
//! This module defines the trait interface for store backends and
//! associated error types.

use crate::catalog::Schema;
use crate::extract::Record;
use crate::storage::{RunRecord, SaveOutcome, StoreStats};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record for '{0}' has no natural key value")]
    MissingNaturalKey(String),

    #[error("Schema '{0}' has not been initialized in the store")]
    UnknownSchema(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for store backend implementations
///
/// Implementations are shared between parse jobs running on different
/// threads, so every method takes `&self` and the backend provides its own
/// synchronization.
pub trait Store: Send + Sync {
    /// Creates the table and natural-key index for a schema if missing
    fn ensure_schema(&self, schema: &Schema) -> StorageResult<()>;

    /// Inserts or diff-updates a record by its natural key
    ///
    /// # Returns
    ///
    /// * `Ok(SaveOutcome::Inserted)` - No row existed for the key
    /// * `Ok(SaveOutcome::Updated { .. })` - Only the differing fields were written
    /// * `Ok(SaveOutcome::Duplicate)` - Nothing differed, nothing was written
    /// * `Err(StorageError)` - Missing key or SQL failure; the error counter is incremented
    fn save(&self, schema: &Schema, record: &Record) -> StorageResult<SaveOutcome>;

    /// Snapshot of the save counters
    fn stats(&self) -> StoreStats;

    /// Number of rows in a schema's table
    fn count_rows(&self, schema: &Schema) -> StorageResult<u64>;

    /// Reads one row by natural key as string values
    fn fetch_row(
        &self,
        schema: &Schema,
        natural_key: &str,
    ) -> StorageResult<Option<BTreeMap<String, Option<String>>>>;

    /// Appends a run to the run history and returns its id
    fn record_run(&self, run: &RunRecord) -> StorageResult<i64>;

    /// Most recent run, if any
    fn latest_run(&self) -> StorageResult<Option<RunRecord>>;
}
