//! Custom scalar type registry.
//!
//! Temporal and decimal values have no native representation in most wire
//! formats. The registry maps each such kind to a stable tag and a canonical
//! text form; decoding is the exact inverse of encoding.
//!
//! | kind      | tag  | canonical text               | tree class   |
//! |-----------|------|------------------------------|--------------|
//! | timestamp | 0x01 | `2014-01-01T12:20:00+00:00`  | `DateTime`   |
//! | time      | 0x02 | `12:20:00 +0000`             | `Time`       |
//! | date      | 0x03 | `2014-01-01`                 | `Date`       |
//! | decimal   | 0x04 | `1234.56`                    | `BigDecimal` |
//!
//! Tag `0x20` is reserved for the binary format's table header.
//!
//! The registry is built once and shared read-only (usually behind an `Arc`)
//! by every encoder and decoder of a run.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use rust_decimal::Decimal;

use crate::core::value::{utc_offset, SqlValue};
use crate::error::{DumpError, Result};

/// Extension tag of the binary format's table header unit.
pub const TABLE_HEADER_TAG: i8 = 0x20;

/// Scalar kinds without a native wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Timestamp,
    Time,
    Date,
    Decimal,
}

impl ScalarKind {
    /// Kind of a value, or `None` for values every format carries natively.
    pub fn of(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Timestamp(_) => Some(ScalarKind::Timestamp),
            SqlValue::Time(..) => Some(ScalarKind::Time),
            SqlValue::Date(_) => Some(ScalarKind::Date),
            SqlValue::Decimal(_) => Some(ScalarKind::Decimal),
            _ => None,
        }
    }
}

/// One registered kind: its tag, tree-format class name and codec pair.
#[derive(Clone, Copy)]
pub struct TypeEntry {
    pub kind: ScalarKind,
    pub tag: i8,
    pub class_name: &'static str,
    encode: fn(&SqlValue) -> Option<String>,
    decode: fn(&str) -> Result<SqlValue>,
}

impl TypeEntry {
    /// Canonical text of a value of this entry's kind.
    pub fn encode(&self, value: &SqlValue) -> Option<String> {
        (self.encode)(value)
    }

    /// Rebuild a value from its canonical text.
    pub fn decode(&self, text: &str) -> Result<SqlValue> {
        (self.decode)(text)
    }
}

impl std::fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeEntry")
            .field("kind", &self.kind)
            .field("tag", &self.tag)
            .field("class_name", &self.class_name)
            .finish()
    }
}

/// Immutable tag/codec table for custom scalar kinds.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    entries: Vec<TypeEntry>,
}

impl TypeRegistry {
    /// Registry with the four built-in kinds.
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                TypeEntry {
                    kind: ScalarKind::Timestamp,
                    tag: 0x01,
                    class_name: "DateTime",
                    encode: encode_timestamp,
                    decode: decode_timestamp,
                },
                TypeEntry {
                    kind: ScalarKind::Time,
                    tag: 0x02,
                    class_name: "Time",
                    encode: encode_time,
                    decode: decode_time,
                },
                TypeEntry {
                    kind: ScalarKind::Date,
                    tag: 0x03,
                    class_name: "Date",
                    encode: encode_date,
                    decode: decode_date,
                },
                TypeEntry {
                    kind: ScalarKind::Decimal,
                    tag: 0x04,
                    class_name: "BigDecimal",
                    encode: encode_decimal,
                    decode: decode_decimal,
                },
            ],
        }
    }

    /// Entry for a kind.
    pub fn entry(&self, kind: ScalarKind) -> Option<&TypeEntry> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    /// Entry for a binary tag.
    pub fn by_tag(&self, tag: i8) -> Option<&TypeEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    /// Entry for a tree-format class name.
    pub fn by_class(&self, class_name: &str) -> Option<&TypeEntry> {
        self.entries.iter().find(|e| e.class_name == class_name)
    }

    /// `(tag, canonical text)` for a custom scalar; `None` for native values.
    pub fn encode(&self, value: &SqlValue) -> Option<(i8, String)> {
        let entry = self.entry(ScalarKind::of(value)?)?;
        entry.encode(value).map(|text| (entry.tag, text))
    }

    /// Canonical text for a custom scalar; `None` for native values.
    pub fn canonical_text(&self, value: &SqlValue) -> Option<String> {
        self.encode(value).map(|(_, text)| text)
    }

    /// Decode tagged canonical text.
    ///
    /// # Errors
    ///
    /// [`DumpError::UnknownTypeTag`] if no entry has `tag`, or a decode error
    /// if the text is malformed.
    pub fn decode(&self, tag: i8, text: &str) -> Result<SqlValue> {
        self.by_tag(tag)
            .ok_or(DumpError::UnknownTypeTag(tag))?
            .decode(text)
    }

    /// Decode a tagged payload carried as raw UTF-8 bytes.
    pub fn decode_bytes(&self, tag: i8, bytes: &[u8]) -> Result<SqlValue> {
        let entry = self.by_tag(tag).ok_or(DumpError::UnknownTypeTag(tag))?;
        let text = std::str::from_utf8(bytes).map_err(|e| {
            DumpError::decode(format!("{} payload is not UTF-8: {}", entry.class_name, e))
        })?;
        entry.decode(text)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Render an offset as `+HHMM`.
pub(crate) fn offset_hhmm(offset: &FixedOffset) -> String {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let abs = secs.abs();
    format!("{}{:02}{:02}", sign, abs / 3600, (abs % 3600) / 60)
}

/// Parse `+HHMM`, `+HH:MM`, `+HH`, `Z` or `UTC`.
pub(crate) fn parse_offset(text: &str) -> Option<FixedOffset> {
    if matches!(text, "Z" | "UTC" | "GMT") {
        return Some(utc_offset());
    }
    let (sign, digits) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    let digits: String = digits.chars().filter(|c| *c != ':').collect();
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn encode_timestamp(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Timestamp(ts) => Some(ts.format("%Y-%m-%dT%H:%M:%S%.f%:z").to_string()),
        _ => None,
    }
}

fn decode_timestamp(text: &str) -> Result<SqlValue> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f %z"))
        .or_else(|_| DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(SqlValue::Timestamp)
        .map_err(|e| DumpError::decode(format!("invalid timestamp '{}': {}", text, e)))
}

fn encode_time(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Time(t, offset) => Some(format!(
            "{} {}",
            t.format("%H:%M:%S%.f"),
            offset_hhmm(offset)
        )),
        _ => None,
    }
}

fn decode_time(text: &str) -> Result<SqlValue> {
    let invalid = || DumpError::decode(format!("invalid time '{}'", text));
    let mut parts: Vec<&str> = text.split_whitespace().collect();
    // A leading calendar date is accepted and discarded
    if parts.first().is_some_and(|p| p.contains('-') && !p.starts_with('-')) {
        parts.remove(0);
    }
    let (time_part, offset) = match parts.as_slice() {
        [time] => (*time, utc_offset()),
        [time, offset] => (*time, parse_offset(offset).ok_or_else(invalid)?),
        _ => return Err(invalid()),
    };
    let time = NaiveTime::parse_from_str(time_part, "%H:%M:%S%.f").map_err(|_| invalid())?;
    Ok(SqlValue::Time(time, offset))
}

fn encode_date(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        _ => None,
    }
}

fn decode_date(text: &str) -> Result<SqlValue> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map(SqlValue::Date)
        .map_err(|e| DumpError::decode(format!("invalid date '{}': {}", text, e)))
}

fn encode_decimal(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Decimal(d) => Some(d.to_string()),
        _ => None,
    }
}

fn decode_decimal(text: &str) -> Result<SqlValue> {
    parse_decimal(text).map(SqlValue::Decimal)
}

/// Parse a base-10 numeral without rounding.
///
/// `Decimal` holds 28 significant digits; wider numerals are an error
/// rather than a silently rounded value.
pub fn parse_decimal(text: &str) -> Result<Decimal> {
    let text = text.trim();
    let parsed = if text.contains(['e', 'E']) {
        Decimal::from_scientific(text)
    } else {
        Decimal::from_str_exact(text)
    };
    parsed.map_err(|e| DumpError::decode(format!("invalid decimal '{}': {}", text, e)))
}
