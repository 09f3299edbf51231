//! Table, column and page metadata.
//!
//! These types describe a table for the duration of one dump or load run.
//! Metadata is fetched once at the start and never changes afterwards.

use serde::{Deserialize, Serialize};

use super::value::Row;

/// Semantic kind of a column, independent of the backend's type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    String,
    Integer,
    Float,
    Decimal,
    Boolean,
    Timestamp,
    Date,
    Time,
    Json,
    Binary,
}

impl ColumnKind {
    /// Classify a backend storage type (e.g. "int4", "tinyint(1)", "jsonb").
    ///
    /// Unknown types fall back to [`ColumnKind::String`].
    pub fn from_sql_type(data_type: &str) -> Self {
        let lower = data_type.trim().to_lowercase();
        // MySQL reports BOOLEAN columns as tinyint(1); BIT(1) is a flag too
        if lower == "tinyint(1)" || lower == "bit(1)" {
            return ColumnKind::Boolean;
        }
        let base = lower.split('(').next().unwrap_or("").trim();

        match base {
            "bool" | "boolean" => ColumnKind::Boolean,
            // MySQL BIT(n) arrives as raw bytes; PostgreSQL bit strings stay text
            "bit" if lower.contains('(') => ColumnKind::Binary,
            "smallint" | "integer" | "int" | "bigint" | "tinyint" | "mediumint" | "int2"
            | "int4" | "int8" | "serial" | "bigserial" | "smallserial" => ColumnKind::Integer,
            "real" | "float" | "float4" | "float8" | "double" | "double precision" => {
                ColumnKind::Float
            }
            "numeric" | "decimal" | "money" => ColumnKind::Decimal,
            "timestamp" | "timestamptz" | "timestamp with time zone"
            | "timestamp without time zone" | "datetime" => ColumnKind::Timestamp,
            "date" => ColumnKind::Date,
            "time" | "timetz" | "time with time zone" | "time without time zone" => {
                ColumnKind::Time
            }
            "json" | "jsonb" => ColumnKind::Json,
            "bytea" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "binary"
            | "varbinary" => ColumnKind::Binary,
            _ => {
                // Unsigned and zerofill modifiers follow the base type name
                if base.starts_with("int ") || base.starts_with("bigint ") {
                    ColumnKind::Integer
                } else {
                    ColumnKind::String
                }
            }
        }
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Semantic kind.
    pub kind: ColumnKind,

    /// Backend storage type (e.g. "int4", "varchar", "jsonb").
    pub data_type: String,
}

impl Column {
    /// Create a column, classifying its kind from the storage type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let data_type = data_type.into();
        Self {
            name: name.into(),
            kind: ColumnKind::from_sql_type(&data_type),
            data_type,
        }
    }
}

/// Table metadata for one dump run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name.
    pub name: String,

    /// Columns in table order.
    pub columns: Vec<Column>,

    /// Total row count at the time the table was inspected.
    pub row_count: u64,

    /// Columns used to order rows for paging.
    pub sort_key: Vec<String>,
}

impl TableInfo {
    /// Column names in table order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Names of columns holding booleans.
    pub fn boolean_columns(&self) -> Vec<String> {
        names_of_kind(&self.columns, ColumnKind::Boolean)
    }

    /// Names of columns holding structured (json) values.
    pub fn structured_columns(&self) -> Vec<String> {
        names_of_kind(&self.columns, ColumnKind::Json)
    }

    /// Whether the table has rows to emit.
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }
}

pub(crate) fn names_of_kind(columns: &[Column], kind: ColumnKind) -> Vec<String> {
    columns
        .iter()
        .filter(|c| c.kind == kind)
        .map(|c| c.name.clone())
        .collect()
}

/// A bounded batch of rows from one table, in sort-key order.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 0-based page index.
    pub index: u64,

    /// Rows in column order.
    pub rows: Vec<Row>,

    /// First page of the table.
    pub is_first: bool,

    /// Last page of the table.
    pub is_last: bool,
}

impl Page {
    /// Number of rows in this page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the page has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Self-contained load unit: one table's name, columns and (part of) its rows.
///
/// The binary format yields one unit per row batch, all sharing the header's
/// name, columns and count. Text formats yield one unit per table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableUnit {
    /// Table name.
    pub name: String,

    /// Column names; an empty list means the unit is skipped on load.
    pub columns: Vec<String>,

    /// Declared total row count for the table.
    pub count: u64,

    /// Rows carried by this unit.
    pub rows: Vec<Row>,
}

impl TableUnit {
    /// Create a unit whose declared count equals its row count.
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            columns,
            count: rows.len() as u64,
            rows,
        }
    }
}
