//! SQL value types shared by every wire format.
//!
//! A [`SqlValue`] is the format-agnostic representation of one column value.
//! Readers convert driver-native values into it, encoders serialize it and
//! decoders rebuild it.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};
use rust_decimal::Decimal;

/// One scalar value of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Boolean value.
    Bool(bool),

    /// Any integer column (smallint through bigint).
    Int(i64),

    /// Floating point (real/double precision).
    Float(f64),

    /// Text data.
    Text(String),

    /// Binary data (bytea, blob).
    Bytes(Vec<u8>),

    /// Decimal value, scale preserved exactly.
    Decimal(Decimal),

    /// Temporal instant: date, time and UTC offset.
    Timestamp(DateTime<FixedOffset>),

    /// Calendar date.
    Date(NaiveDate),

    /// Wall-clock time with its UTC offset.
    Time(NaiveTime, FixedOffset),

    /// Structured (tree) value from a json/jsonb column.
    Json(serde_json::Value),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::Int(_) => "int",
            SqlValue::Float(_) => "float",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::Date(_) => "date",
            SqlValue::Time(..) => "time",
            SqlValue::Json(_) => "json",
        }
    }

    /// Render binary data the way text formats carry it: `\x` + lowercase hex.
    #[must_use]
    pub fn hex_bytes(bytes: &[u8]) -> String {
        format!("\\x{}", hex::encode(bytes))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Float(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Bytes(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        SqlValue::Decimal(v)
    }
}

impl From<DateTime<FixedOffset>> for SqlValue {
    fn from(v: DateTime<FixedOffset>) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        SqlValue::Date(v)
    }
}

impl From<serde_json::Value> for SqlValue {
    fn from(v: serde_json::Value) -> Self {
        SqlValue::Json(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// The `+00:00` offset given to naive timestamps and times.
pub fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// A row as handed over by the access layer: column name to raw value.
pub type RawRow = HashMap<String, SqlValue>;

/// A normalized row: one value per column, in table column order.
pub type Row = Vec<SqlValue>;
