//! Tree document format (JSON).
//!
//! ```json
//! {"mytable":{"columns":["a","b"],"records":[[1,2],[3,4]]}}
//! ```
//!
//! The encoder streams: each page is appended to the open `records` array,
//! with explicit first-table / first-record state deciding where commas go.
//! Temporal and decimal scalars are written as objects discriminated by a
//! `json_class` key; every other object is a structured value.

use std::io::{Read, Write};
use std::sync::Arc;

use chrono::{Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike};
use serde_json::{Map, Number, Value};

use crate::core::schema::{Page, TableInfo, TableUnit};
use crate::core::value::SqlValue;
use crate::error::{DumpError, Result};
use crate::typemap::{ScalarKind, TypeRegistry};

use super::{Decoder, Encoder, TableUnits};

const CLASS_KEY: &str = "json_class";
const SECONDS_PER_DAY: i64 = 86_400;

/// Streaming JSON encoder.
pub struct JsonEncoder {
    registry: Arc<TypeRegistry>,
    first_table: bool,
    first_record: bool,
}

impl JsonEncoder {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            first_table: true,
            first_record: true,
        }
    }
}

impl Encoder for JsonEncoder {
    fn begin(&mut self, out: &mut dyn Write) -> Result<()> {
        self.first_table = true;
        out.write_all(b"{")?;
        Ok(())
    }

    fn table_header(&mut self, out: &mut dyn Write, table: &TableInfo) -> Result<()> {
        if !self.first_table {
            out.write_all(b",")?;
        }
        self.first_table = false;
        self.first_record = true;

        serde_json::to_writer(&mut *out, &table.name)?;
        out.write_all(br#":{"columns":"#)?;
        serde_json::to_writer(&mut *out, &table.column_names())?;
        out.write_all(br#","records":["#)?;
        Ok(())
    }

    fn table_rows(&mut self, out: &mut dyn Write, page: &Page) -> Result<()> {
        for row in &page.rows {
            if !self.first_record {
                out.write_all(b",")?;
            }
            self.first_record = false;
            let values: Vec<Value> = row.iter().map(|v| to_json(&self.registry, v)).collect();
            serde_json::to_writer(&mut *out, &values)?;
        }
        Ok(())
    }

    fn table_footer(&mut self, out: &mut dyn Write, _table: &TableInfo) -> Result<()> {
        out.write_all(b"]}")?;
        Ok(())
    }

    fn end(&mut self, out: &mut dyn Write) -> Result<()> {
        out.write_all(b"}")?;
        out.flush()?;
        Ok(())
    }
}

/// Convert a value to its JSON tree form.
pub fn to_json(registry: &TypeRegistry, value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Bool(*b),
        SqlValue::Int(i) => Value::from(*i),
        // JSON has no NaN or infinities
        SqlValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Bytes(b) => Value::String(SqlValue::hex_bytes(b)),
        SqlValue::Json(v) => v.clone(),
        SqlValue::Timestamp(ts) => tagged(
            registry,
            ScalarKind::Timestamp,
            [
                ("y", Value::from(ts.year())),
                ("m", Value::from(ts.month())),
                ("d", Value::from(ts.day())),
                ("H", Value::from(ts.hour())),
                ("M", Value::from(ts.minute())),
                ("S", Value::from(ts.second())),
                ("ns", Value::from(ts.nanosecond())),
                ("of", Value::from(ts.offset().local_minus_utc())),
            ],
        ),
        SqlValue::Time(t, offset) => tagged(
            registry,
            ScalarKind::Time,
            [
                ("H", Value::from(t.hour())),
                ("M", Value::from(t.minute())),
                ("S", Value::from(t.second())),
                ("ns", Value::from(t.nanosecond())),
                ("of", Value::from(offset.local_minus_utc())),
            ],
        ),
        SqlValue::Date(d) => tagged(
            registry,
            ScalarKind::Date,
            [
                ("y", Value::from(d.year())),
                ("m", Value::from(d.month())),
                ("d", Value::from(d.day())),
            ],
        ),
        SqlValue::Decimal(d) => tagged(registry, ScalarKind::Decimal, [("b", Value::from(d.to_string()))]),
    }
}

fn tagged<const N: usize>(
    registry: &TypeRegistry,
    kind: ScalarKind,
    fields: [(&str, Value); N],
) -> Value {
    let mut map = Map::new();
    if let Some(entry) = registry.entry(kind) {
        map.insert(CLASS_KEY.to_string(), Value::from(entry.class_name));
    }
    for (key, value) in fields {
        map.insert(key.to_string(), value);
    }
    Value::Object(map)
}

/// Rebuild a value from its JSON tree form.
pub fn from_json(registry: &TypeRegistry, value: Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Bool(b),
        Value::Number(n) => number_value(&n),
        Value::String(s) => SqlValue::Text(s),
        Value::Array(_) => SqlValue::Json(value),
        Value::Object(map) => {
            let kind = map
                .get(CLASS_KEY)
                .and_then(Value::as_str)
                .and_then(|class| registry.by_class(class))
                .map(|entry| entry.kind);
            match kind {
                Some(kind) => tagged_value(registry, kind, &map)?,
                None => SqlValue::Json(Value::Object(map)),
            }
        }
    })
}

fn number_value(n: &Number) -> SqlValue {
    if let Some(i) = n.as_i64() {
        SqlValue::Int(i)
    } else if n.is_u64() {
        // Beyond i64: keep the exact digits
        n.to_string()
            .parse()
            .map(SqlValue::Decimal)
            .unwrap_or_else(|_| SqlValue::Float(n.as_f64().unwrap_or_default()))
    } else {
        SqlValue::Float(n.as_f64().unwrap_or_default())
    }
}

fn tagged_value(registry: &TypeRegistry, kind: ScalarKind, map: &Map<String, Value>) -> Result<SqlValue> {
    let invalid = || DumpError::decode(format!("invalid {:?} object: {}", kind, Value::Object(map.clone())));
    let field = |key: &str| map.get(key).and_then(Value::as_u64).map(|v| v as u32);

    match kind {
        ScalarKind::Decimal => {
            let numeral = map.get("b").and_then(Value::as_str).ok_or_else(invalid)?;
            registry.decode(
                registry.entry(kind).ok_or_else(invalid)?.tag,
                numeral,
            )
        }
        ScalarKind::Date => {
            let year = map.get("y").and_then(Value::as_i64).ok_or_else(invalid)?;
            let date = NaiveDate::from_ymd_opt(
                year as i32,
                field("m").ok_or_else(invalid)?,
                field("d").ok_or_else(invalid)?,
            )
            .ok_or_else(invalid)?;
            Ok(SqlValue::Date(date))
        }
        ScalarKind::Time | ScalarKind::Timestamp => {
            let (second, fraction) = seconds(map.get("S")).ok_or_else(invalid)?;
            let nanos = field("ns").unwrap_or(fraction);
            let time = NaiveTime::from_hms_nano_opt(
                field("H").ok_or_else(invalid)?,
                field("M").ok_or_else(invalid)?,
                second,
                nanos,
            )
            .ok_or_else(invalid)?;
            let offset = offset(map.get("of")).ok_or_else(invalid)?;

            if kind == ScalarKind::Time {
                return Ok(SqlValue::Time(time, offset));
            }
            let year = map.get("y").and_then(Value::as_i64).ok_or_else(invalid)?;
            let date = NaiveDate::from_ymd_opt(
                year as i32,
                field("m").ok_or_else(invalid)?,
                field("d").ok_or_else(invalid)?,
            )
            .ok_or_else(invalid)?;
            let instant = date
                .and_time(time)
                .and_local_timezone(offset)
                .single()
                .ok_or_else(invalid)?;
            Ok(SqlValue::Timestamp(instant))
        }
    }
}

/// Whole seconds and the nanosecond fraction of an `S` field.
fn seconds(value: Option<&Value>) -> Option<(u32, u32)> {
    let value = value?;
    if let Some(s) = value.as_u64() {
        return Some((s as u32, 0));
    }
    let s = value.as_f64()?;
    Some((s.trunc() as u32, (s.fract() * 1e9).round() as u32))
}

/// UTC offset from seconds or a rational day fraction such as `"1/24"`.
fn offset(value: Option<&Value>) -> Option<FixedOffset> {
    let secs = match value {
        None => 0,
        Some(Value::Number(n)) => n.as_i64()?,
        Some(Value::String(s)) => match s.split_once('/') {
            Some((num, den)) => {
                let num: i64 = num.trim().parse().ok()?;
                let den: i64 = den.trim().parse().ok()?;
                if den == 0 {
                    return None;
                }
                num * SECONDS_PER_DAY / den
            }
            None => s.trim().parse().ok()?,
        },
        Some(_) => return None,
    };
    FixedOffset::east_opt(i32::try_from(secs).ok()?)
}

/// JSON document decoder; parses the whole document.
pub struct JsonDecoder {
    registry: Arc<TypeRegistry>,
}

impl JsonDecoder {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }
}

impl Decoder for JsonDecoder {
    fn units<'r>(
        &self,
        input: Box<dyn Read + Send + 'r>,
        _name_hint: Option<&str>,
    ) -> Result<TableUnits<'r>> {
        let document: Value = serde_json::from_reader(input)?;
        let Value::Object(tables) = document else {
            return Err(DumpError::decode("JSON document must be an object of tables"));
        };

        let mut units = Vec::with_capacity(tables.len());
        for (name, body) in tables {
            if body.is_null() {
                continue;
            }
            let columns = match body.get("columns") {
                Some(Value::Array(cols)) => cols
                    .iter()
                    .map(|c| {
                        c.as_str()
                            .map(str::to_string)
                            .ok_or_else(|| DumpError::decode(format!("{}: column names must be strings", name)))
                    })
                    .collect::<Result<Vec<_>>>()?,
                _ => Vec::new(),
            };
            let rows = match body.get("records") {
                Some(Value::Array(records)) => records
                    .iter()
                    .map(|record| match record {
                        Value::Array(values) => values
                            .iter()
                            .map(|v| from_json(&self.registry, v.clone()))
                            .collect::<Result<Vec<_>>>(),
                        _ => Err(DumpError::decode(format!("{}: each record must be an array", name))),
                    })
                    .collect::<Result<Vec<_>>>()?,
                _ => Vec::new(),
            };
            units.push(TableUnit::new(name, columns, rows));
        }
        Ok(Box::new(units.into_iter().map(Ok)))
    }
}
