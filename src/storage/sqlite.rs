//! SQLite store implementation
//!
//! This module provides a SQLite-based implementation of the Store trait.

use crate::catalog::Schema;
use crate::extract::{FieldValue, Record};
use crate::storage::schema::{
    build_update_sql, compare_row_sql, initialize_schema, insert_row_sql, quote_ident,
    record_table_sql, select_row_sql,
};
use crate::storage::traits::{Store, StorageError, StorageResult};
use crate::storage::{RunRecord, SaveOutcome, StoreStats};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::{ToSql, Type, Value};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// SQLite store backend
///
/// One connection serves every parse job. The existence check and the write
/// of a save run as separate autocommitted statements, but both happen while
/// the connection lock is held, so two saves of the same natural key from
/// this process cannot interleave.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    stats: Mutex<StoreStats>,
    schemas: Mutex<HashSet<String>>,
}

impl SqliteStore {
    /// Opens or creates a store at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        Self::with_connection(conn)
    }

    /// Creates an in-memory store
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            stats: Mutex::new(StoreStats::default()),
            schemas: Mutex::new(HashSet::new()),
        })
    }

    fn save_locked(&self, schema: &Schema, record: &Record) -> StorageResult<SaveOutcome> {
        let natural_key = record
            .natural_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| StorageError::MissingNaturalKey(schema.id.clone()))?;

        if !self.schemas.lock().contains(&schema.id) {
            return Err(StorageError::UnknownSchema(schema.id.clone()));
        }

        // Fields outside the schema are never written.
        let fields: Vec<(&str, Option<&FieldValue>)> = schema
            .field_names()
            .map(|name| (name, record.get(name)))
            .collect();

        let conn = self.conn.lock();

        // Compared in SQL so that column affinity applies to the candidate.
        let mut params: Vec<&dyn ToSql> = fields.iter().map(|(_, v)| v as &dyn ToSql).collect();
        params.push(&natural_key);
        let unchanged = conn
            .query_row(&compare_row_sql(schema), params.as_slice(), |row| {
                (0..fields.len())
                    .map(|i| row.get::<_, bool>(i))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .optional()?;

        let now = Utc::now().to_rfc3339();

        let Some(unchanged) = unchanged else {
            let mut params: Vec<&dyn ToSql> =
                fields.iter().map(|(_, v)| v as &dyn ToSql).collect();
            params.push(&now);
            params.push(&now);

            conn.execute(&insert_row_sql(schema), params.as_slice())?;
            tracing::trace!("Inserted {} into {}", natural_key, schema.id);
            return Ok(SaveOutcome::Inserted);
        };

        let changed: Vec<&str> = fields
            .iter()
            .zip(unchanged)
            .filter(|(_, same)| !same)
            .map(|((name, _), _)| *name)
            .collect();

        if changed.is_empty() {
            return Ok(SaveOutcome::Duplicate);
        }

        let changed_values: Vec<Option<&FieldValue>> =
            changed.iter().map(|name| record.get(name)).collect();
        let mut params: Vec<&dyn ToSql> =
            changed_values.iter().map(|v| v as &dyn ToSql).collect();
        params.push(&now);
        params.push(&natural_key);

        conn.execute(
            &build_update_sql(&schema.id, &changed, &schema.natural_key),
            params.as_slice(),
        )?;
        tracing::debug!(
            "Updated {} in {}: {}",
            natural_key,
            schema.id,
            changed.join(", ")
        );

        Ok(SaveOutcome::Updated {
            changed: changed.into_iter().map(String::from).collect(),
        })
    }
}

/// String form of a stored value
fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(n) => Some(n.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(s) => Some(s),
        Value::Blob(b) => Some(hex::encode(b)),
    }
}

impl Store for SqliteStore {
    fn ensure_schema(&self, schema: &Schema) -> StorageResult<()> {
        self.conn.lock().execute_batch(&record_table_sql(schema))?;
        self.schemas.lock().insert(schema.id.clone());
        Ok(())
    }

    fn save(&self, schema: &Schema, record: &Record) -> StorageResult<SaveOutcome> {
        let result = self.save_locked(schema, record);

        let mut stats = self.stats.lock();
        match &result {
            Ok(SaveOutcome::Inserted) => stats.inserted += 1,
            Ok(SaveOutcome::Updated { .. }) => stats.updated += 1,
            Ok(SaveOutcome::Duplicate) => stats.duplicates += 1,
            Err(_) => stats.errors += 1,
        }

        result
    }

    fn stats(&self) -> StoreStats {
        *self.stats.lock()
    }

    fn count_rows(&self, schema: &Schema) -> StorageResult<u64> {
        let count: i64 = self.conn.lock().query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&schema.id)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn fetch_row(
        &self,
        schema: &Schema,
        natural_key: &str,
    ) -> StorageResult<Option<BTreeMap<String, Option<String>>>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(&select_row_sql(schema), params![natural_key], |row| {
                schema
                    .field_names()
                    .enumerate()
                    .map(|(i, name)| {
                        row.get::<_, Value>(i)
                            .map(|v| (name.to_string(), value_to_string(v)))
                    })
                    .collect::<rusqlite::Result<BTreeMap<_, _>>>()
            })
            .optional()?;
        Ok(row)
    }

    fn record_run(&self, run: &RunRecord) -> StorageResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO harvest_runs (started_at, finished_at, config_hash, targets_total, \
             succeeded, failed, inserted, updated, duplicates, errors, pool_errors) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                run.started_at.to_rfc3339(),
                run.finished_at.to_rfc3339(),
                run.config_hash,
                run.targets_total as i64,
                run.succeeded as i64,
                run.failed as i64,
                run.inserted as i64,
                run.updated as i64,
                run.duplicates as i64,
                run.errors as i64,
                run.pool_errors as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let conn = self.conn.lock();
        let run = conn
            .query_row(
                "SELECT started_at, finished_at, config_hash, targets_total, succeeded, failed, \
                 inserted, updated, duplicates, errors, pool_errors \
                 FROM harvest_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok(RunRecord {
                        started_at: parse_timestamp(0, &row.get::<_, String>(0)?)?,
                        finished_at: parse_timestamp(1, &row.get::<_, String>(1)?)?,
                        config_hash: row.get(2)?,
                        targets_total: row.get::<_, i64>(3)? as u64,
                        succeeded: row.get::<_, i64>(4)? as u64,
                        failed: row.get::<_, i64>(5)? as u64,
                        inserted: row.get::<_, i64>(6)? as u64,
                        updated: row.get::<_, i64>(7)? as u64,
                        duplicates: row.get::<_, i64>(8)? as u64,
                        errors: row.get::<_, i64>(9)? as u64,
                        pool_errors: row.get::<_, i64>(10)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(run)
    }
}

fn parse_timestamp(column: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}
