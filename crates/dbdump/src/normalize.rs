//! Row normalization.
//!
//! Drivers hand back booleans as `t`/`1`/integer surrogates and structured
//! columns as their JSON text. The normalizer turns a raw row into a
//! format-agnostic [`Row`]: values in table column order, booleans as real
//! booleans, structured values as parsed trees. It is pure and idempotent.

use std::collections::HashSet;

use crate::core::schema::TableInfo;
use crate::core::value::{RawRow, Row, SqlValue};
use crate::error::{DumpError, Result};

/// Normalizes raw rows of one table.
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    table: String,
    columns: Vec<String>,
    boolean: HashSet<String>,
    structured: HashSet<String>,
}

impl RowNormalizer {
    pub fn new(
        table: impl Into<String>,
        columns: Vec<String>,
        boolean_columns: &[String],
        structured_columns: &[String],
    ) -> Self {
        Self {
            table: table.into(),
            columns,
            boolean: boolean_columns.iter().cloned().collect(),
            structured: structured_columns.iter().cloned().collect(),
        }
    }

    /// Normalizer using the column sets recorded in the table metadata.
    pub fn for_table(table: &TableInfo) -> Self {
        Self::new(
            table.name.clone(),
            table.column_names(),
            &table.boolean_columns(),
            &table.structured_columns(),
        )
    }

    /// Unhash a raw row into column order and normalize it.
    ///
    /// Columns missing from the raw row become NULL.
    pub fn normalize(&self, mut raw: RawRow) -> Result<Row> {
        let row = self
            .columns
            .iter()
            .map(|c| raw.remove(c).unwrap_or(SqlValue::Null))
            .collect();
        self.normalize_row(row)
    }

    /// Normalize a row that is already in column order.
    pub fn normalize_row(&self, row: Row) -> Result<Row> {
        row.into_iter()
            .zip(&self.columns)
            .map(|(value, column)| self.normalize_value(column, value))
            .collect()
    }

    /// Normalize one page of raw rows.
    pub fn normalize_page(&self, rows: Vec<RawRow>) -> Result<Vec<Row>> {
        rows.into_iter().map(|r| self.normalize(r)).collect()
    }

    fn normalize_value(&self, column: &str, value: SqlValue) -> Result<SqlValue> {
        if self.boolean.contains(column) {
            return Ok(convert_boolean(value));
        }
        if self.structured.contains(column) {
            return convert_structured(value).map_err(|message| DumpError::Normalize {
                table: self.table.clone(),
                column: column.to_string(),
                message,
            });
        }
        Ok(value)
    }
}

/// Coerce a boolean surrogate.
///
/// `t`, `1`, `true` and integer 1 are true; NULL stays NULL; anything else
/// is false.
pub fn convert_boolean(value: SqlValue) -> SqlValue {
    match value {
        SqlValue::Bool(_) | SqlValue::Null => value,
        SqlValue::Int(i) => SqlValue::Bool(i == 1),
        SqlValue::Text(s) => SqlValue::Bool(matches!(s.as_str(), "t" | "1" | "true")),
        _ => SqlValue::Bool(false),
    }
}

/// Parse a structured value from its JSON text when it is not already a tree.
pub fn convert_structured(value: SqlValue) -> std::result::Result<SqlValue, String> {
    match value {
        SqlValue::Text(s) => serde_json::from_str(&s)
            .map(SqlValue::Json)
            .map_err(|e| format!("invalid JSON: {}", e)),
        SqlValue::Bytes(b) => serde_json::from_slice(&b)
            .map(SqlValue::Json)
            .map_err(|e| format!("invalid JSON: {}", e)),
        other => Ok(other),
    }
}

/// Wrap a decoded scalar as a JSON value.
///
/// Tree formats hand a json column's scalar documents (`"hello"`, `5`,
/// `true`) back as plain scalars; this restores them before insertion.
/// NULL and values with no JSON counterpart are returned unchanged.
pub fn structured_scalar(value: SqlValue) -> SqlValue {
    let json = match &value {
        SqlValue::Text(s) => serde_json::Value::String(s.clone()),
        SqlValue::Bool(b) => serde_json::Value::Bool(*b),
        SqlValue::Int(i) => serde_json::Value::from(*i),
        SqlValue::Float(f) => match serde_json::Number::from_f64(*f) {
            Some(n) => serde_json::Value::Number(n),
            None => return value,
        },
        SqlValue::Decimal(d) => match serde_json::from_str(&d.to_string()) {
            Ok(json) => json,
            Err(_) => return value,
        },
        _ => return value,
    };
    SqlValue::Json(json)
}
