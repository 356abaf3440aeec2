//! Database schema definitions
//!
//! The run history table is fixed; record tables are generated from the
//! configured schemas. Identifiers come from validated config and are always
//! quoted.

use crate::catalog::Schema;

/// SQL schema for the fixed tables
pub const SCHEMA_SQL: &str = r#"
-- Track harvest runs
CREATE TABLE IF NOT EXISTS harvest_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    targets_total INTEGER NOT NULL,
    succeeded INTEGER NOT NULL,
    failed INTEGER NOT NULL,
    inserted INTEGER NOT NULL,
    updated INTEGER NOT NULL,
    duplicates INTEGER NOT NULL,
    errors INTEGER NOT NULL,
    pool_errors INTEGER NOT NULL
);
"#;

/// Initializes the fixed tables
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// Quotes an SQL identifier
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `CREATE TABLE` plus natural-key index for a record schema
pub fn record_table_sql(schema: &Schema) -> String {
    let mut columns = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    columns.extend(
        schema
            .fields
            .iter()
            .map(|f| format!("{} {}", quote_ident(&f.name), f.column_type)),
    );
    columns.push("created_at TEXT NOT NULL".to_string());
    columns.push("updated_at TEXT NOT NULL".to_string());

    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    {columns}\n);\n\
         CREATE INDEX IF NOT EXISTS {index} ON {table}({key});",
        table = quote_ident(&schema.id),
        columns = columns.join(",\n    "),
        index = quote_ident(&format!("idx_{}_{}", schema.id, schema.natural_key)),
        key = quote_ident(&schema.natural_key),
    )
}

/// `SELECT` of every schema field for one natural key
pub fn select_row_sql(schema: &Schema) -> String {
    let columns: Vec<String> = schema.field_names().map(quote_ident).collect();
    format!(
        "SELECT {} FROM {} WHERE {} = ?1 LIMIT 1",
        columns.join(", "),
        quote_ident(&schema.id),
        quote_ident(&schema.natural_key)
    )
}

/// Per-field `IS` comparison of a candidate against the stored row
///
/// Each stored column is compared with its bound candidate, so SQLite applies
/// the column's affinity to the candidate first. Placeholders are the fields
/// in order, then the natural key. Yields no row when the key is absent.
pub fn compare_row_sql(schema: &Schema) -> String {
    let columns: Vec<String> = schema
        .field_names()
        .enumerate()
        .map(|(i, name)| format!("{} IS ?{}", quote_ident(name), i + 1))
        .collect();
    format!(
        "SELECT {} FROM {} WHERE {} = ?{} LIMIT 1",
        columns.join(", "),
        quote_ident(&schema.id),
        quote_ident(&schema.natural_key),
        columns.len() + 1
    )
}

/// `INSERT` of every schema field plus both timestamps
///
/// Placeholders are the fields in order, then `created_at`, then `updated_at`.
pub fn insert_row_sql(schema: &Schema) -> String {
    let mut columns: Vec<String> = schema.field_names().map(quote_ident).collect();
    columns.push("created_at".to_string());
    columns.push("updated_at".to_string());

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&schema.id),
        columns.join(", "),
        placeholders.join(", ")
    )
}

/// `UPDATE` touching only `fields` and `updated_at`
///
/// Placeholders are the changed fields in order, then `updated_at`, then the
/// natural key.
pub fn build_update_sql(table: &str, fields: &[&str], natural_key: &str) -> String {
    let mut assignments: Vec<String> = fields
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{} = ?{}", quote_ident(f), i + 1))
        .collect();
    assignments.push(format!("updated_at = ?{}", fields.len() + 1));

    format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote_ident(table),
        assignments.join(", "),
        quote_ident(natural_key),
        fields.len() + 2
    )
}
