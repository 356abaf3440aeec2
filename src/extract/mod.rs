//! Declarative field extraction
//!
//! This module turns one item fragment (the outer markup of a listing entry)
//! into a [`Record`] by applying the target's rules:
//! - rules are typed once at catalog load time ([`ExtractionRule`])
//! - the effective rule set per target is filtered to the destination schema
//!   and compiled once, then cached by the [`Extractor`]
//! - every rule is applied independently; a miss only nulls its own field

mod engine;
mod processors;
mod rules;

pub use engine::{CompiledRules, Extractor};
pub use processors::{extract_number, extract_phone, normalize_url};
pub use rules::{ExtractionRule, Locator, Method, PostProcessor};

use rusqlite::types::{ToSql, ToSqlOutput};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised while preparing extraction
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid selector for {target}.{field}: {reason}")]
    InvalidSelector {
        target: String,
        field: String,
        reason: String,
    },
}

/// An extracted, typed value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Integer(n) => write!(f, "{}", n),
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Self::Text(s) => s.to_sql(),
            Self::Integer(n) => n.to_sql(),
        }
    }
}

/// One extracted listing entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    /// Value of the schema's natural-key field, if present and non-empty
    pub natural_key: Option<String>,

    /// Every schema field; `None` where the rule missed or no rule exists
    pub fields: BTreeMap<String, Option<FieldValue>>,
}

impl Record {
    /// Builds a record from field values, deriving the natural key
    pub fn new(natural_key_field: &str, fields: BTreeMap<String, Option<FieldValue>>) -> Self {
        let natural_key = fields
            .get(natural_key_field)
            .and_then(|v| v.as_ref())
            .map(|v| v.to_string())
            .filter(|k| !k.trim().is_empty());

        Self {
            natural_key,
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field).and_then(|v| v.as_ref())
    }
}
