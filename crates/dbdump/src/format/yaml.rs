//! Flow document format (YAML).
//!
//! Every table is its own document:
//!
//! ```yaml
//! ---
//! mytable:
//!   columns:
//!   - a
//!   - b
//!   records:
//!   - - 1
//!     - 2
//! ```
//!
//! Custom scalars are written as their canonical strings and come back as
//! text; the database coerces them on insert.

use std::io::{Read, Write};
use std::sync::Arc;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::core::schema::{Page, TableInfo, TableUnit};
use crate::core::value::SqlValue;
use crate::error::{DumpError, Result};
use crate::typemap::TypeRegistry;

use super::{Decoder, Encoder, TableUnits};

const INDENT: &str = "  ";

pub struct YamlEncoder {
    registry: Arc<TypeRegistry>,
}

impl YamlEncoder {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    fn to_yaml(&self, value: &SqlValue) -> Result<Value> {
        if let Some(text) = self.registry.canonical_text(value) {
            return Ok(Value::String(text));
        }
        Ok(match value {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::Int(i) => Value::from(*i),
            SqlValue::Float(f) => Value::from(*f),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Bytes(b) => Value::String(SqlValue::hex_bytes(b)),
            SqlValue::Json(v) => serde_yaml::to_value(v)?,
            other => Value::String(format!("{:?}", other)),
        })
    }
}

/// Write `text` with every line shifted right by one indent.
fn write_indented(out: &mut dyn Write, text: &str) -> Result<()> {
    for line in text.lines() {
        writeln!(out, "{}{}", INDENT, line)?;
    }
    Ok(())
}

impl Encoder for YamlEncoder {
    fn begin(&mut self, _out: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    fn table_header(&mut self, out: &mut dyn Write, table: &TableInfo) -> Result<()> {
        let name = serde_yaml::to_string(&table.name)?;
        writeln!(out, "---")?;
        writeln!(out, "{}:", name.trim_end())?;

        let columns = table.column_names();
        if columns.is_empty() {
            writeln!(out, "{}columns: []", INDENT)?;
        } else {
            writeln!(out, "{}columns:", INDENT)?;
            write_indented(out, &serde_yaml::to_string(&columns)?)?;
        }
        writeln!(out, "{}records:", INDENT)?;
        Ok(())
    }

    fn table_rows(&mut self, out: &mut dyn Write, page: &Page) -> Result<()> {
        if page.rows.is_empty() {
            return Ok(());
        }
        let rows = page
            .rows
            .iter()
            .map(|row| row.iter().map(|v| self.to_yaml(v)).collect::<Result<Vec<_>>>())
            .collect::<Result<Vec<_>>>()?;
        write_indented(out, &serde_yaml::to_string(&rows)?)
    }

    fn table_footer(&mut self, _out: &mut dyn Write, _table: &TableInfo) -> Result<()> {
        Ok(())
    }

    fn end(&mut self, out: &mut dyn Write) -> Result<()> {
        out.flush()?;
        Ok(())
    }
}

fn from_yaml(value: Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Bool(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                SqlValue::Decimal(u.into())
            } else {
                SqlValue::Float(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => SqlValue::Text(s),
        Value::Tagged(tagged) => from_yaml(tagged.value)?,
        nested @ (Value::Sequence(_) | Value::Mapping(_)) => SqlValue::Json(
            serde_json::to_value(&nested)
                .map_err(|e| DumpError::decode(format!("unsupported structured value: {}", e)))?,
        ),
    })
}

fn key_name(key: &Value) -> Result<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(DumpError::decode(format!("invalid table name: {:?}", other))),
    }
}

fn document_units(document: Mapping, units: &mut Vec<TableUnit>) -> Result<()> {
    for (key, body) in document {
        let name = key_name(&key)?;
        if body.is_null() {
            continue;
        }
        let columns = match body.get("columns") {
            Some(Value::Sequence(cols)) => cols
                .iter()
                .map(key_name)
                .collect::<Result<Vec<_>>>()?,
            _ => Vec::new(),
        };
        let rows = match body.get("records") {
            Some(Value::Sequence(records)) => records
                .iter()
                .map(|record| match record {
                    Value::Sequence(values) => values
                        .iter()
                        .map(|v| from_yaml(v.clone()))
                        .collect::<Result<Vec<_>>>(),
                    _ => Err(DumpError::decode(format!("{}: each record must be a sequence", name))),
                })
                .collect::<Result<Vec<_>>>()?,
            _ => Vec::new(),
        };
        units.push(TableUnit::new(name, columns, rows));
    }
    Ok(())
}

/// Multi-document YAML decoder; custom scalars come back as text.
#[derive(Debug, Default)]
pub struct YamlDecoder;

impl YamlDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for YamlDecoder {
    fn units<'r>(
        &self,
        input: Box<dyn Read + Send + 'r>,
        _name_hint: Option<&str>,
    ) -> Result<TableUnits<'r>> {
        let mut units = Vec::new();
        for document in serde_yaml::Deserializer::from_reader(input) {
            match Value::deserialize(document)? {
                Value::Null => {}
                Value::Mapping(tables) => document_units(tables, &mut units)?,
                _ => return Err(DumpError::decode("YAML document must be a mapping of tables")),
            }
        }
        Ok(Box::new(units.into_iter().map(Ok)))
    }
}
