//! Binary stream format (MessagePack).
//!
//! No enclosing envelope: the stream is a sequence of units.
//!
//! - table header: `ext(0x20, msgpack([name, [columns...], count]))`
//! - row batch: a plain array of row arrays, one per dumped page
//!
//! Custom scalars travel as `ext(tag, utf8 canonical text)`, binary data as
//! native `bin` and structured values as native maps and arrays. The decoder
//! walks the stream lazily; every row batch becomes its own [`TableUnit`].

use std::io::{BufReader, ErrorKind, Read, Write};
use std::sync::Arc;

use rmpv::decode::Error as DecodeError;
use rmpv::Value;
use rust_decimal::Decimal;

use crate::core::schema::{Page, TableInfo, TableUnit};
use crate::core::value::SqlValue;
use crate::error::{DumpError, Result};
use crate::typemap::{TypeRegistry, TABLE_HEADER_TAG};

use super::{Decoder, Encoder, TableUnits};

pub struct MsgPackEncoder {
    registry: Arc<TypeRegistry>,
}

impl MsgPackEncoder {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    fn to_value(&self, value: &SqlValue) -> Value {
        if let Some((tag, text)) = self.registry.encode(value) {
            return Value::Ext(tag, text.into_bytes());
        }
        match value {
            SqlValue::Null => Value::Nil,
            SqlValue::Bool(b) => Value::from(*b),
            SqlValue::Int(i) => Value::from(*i),
            SqlValue::Float(f) => Value::from(*f),
            SqlValue::Text(s) => Value::from(s.as_str()),
            SqlValue::Bytes(b) => Value::Binary(b.clone()),
            SqlValue::Json(v) => json_to_value(v),
            // Registered kinds are handled above
            SqlValue::Decimal(d) => Value::from(d.to_string()),
            SqlValue::Timestamp(_) | SqlValue::Date(_) | SqlValue::Time(..) => Value::Nil,
        }
    }
}

impl Encoder for MsgPackEncoder {
    fn begin(&mut self, _out: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    fn table_header(&mut self, mut out: &mut dyn Write, table: &TableInfo) -> Result<()> {
        let header = Value::Array(vec![
            Value::from(table.name.as_str()),
            Value::Array(table.columns.iter().map(|c| Value::from(c.name.as_str())).collect()),
            Value::from(table.row_count),
        ]);
        let mut payload = Vec::new();
        rmpv::encode::write_value(&mut payload, &header)?;
        rmpv::encode::write_value(&mut out, &Value::Ext(TABLE_HEADER_TAG, payload))?;
        Ok(())
    }

    fn table_rows(&mut self, mut out: &mut dyn Write, page: &Page) -> Result<()> {
        let batch = Value::Array(
            page.rows
                .iter()
                .map(|row| Value::Array(row.iter().map(|v| self.to_value(v)).collect()))
                .collect(),
        );
        rmpv::encode::write_value(&mut out, &batch)?;
        Ok(())
    }

    fn table_footer(&mut self, _out: &mut dyn Write, _table: &TableInfo) -> Result<()> {
        Ok(())
    }

    fn end(&mut self, out: &mut dyn Write) -> Result<()> {
        out.flush()?;
        Ok(())
    }
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::from(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::from(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => Value::from(s.as_str()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (Value::from(k.as_str()), json_to_value(v)))
                .collect(),
        ),
    }
}

fn value_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(b),
        Value::Integer(i) => match (i.as_i64(), i.as_u64()) {
            (Some(v), _) => serde_json::Value::from(v),
            (None, Some(v)) => serde_json::Value::from(v),
            _ => serde_json::Value::Null,
        },
        Value::F32(f) => serde_json::Value::from(f as f64),
        Value::F64(f) => serde_json::Value::from(f),
        Value::String(s) => serde_json::Value::String(s.as_str().map(str::to_string).unwrap_or_default()),
        Value::Binary(b) => serde_json::Value::String(SqlValue::hex_bytes(&b)),
        Value::Array(items) => serde_json::Value::Array(items.into_iter().map(value_to_json).collect()),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| {
                    let key = match k {
                        Value::String(s) => s.as_str().map(str::to_string).unwrap_or_default(),
                        other => other.to_string(),
                    };
                    (key, value_to_json(v))
                })
                .collect(),
        ),
        Value::Ext(_, data) => serde_json::Value::String(String::from_utf8_lossy(&data).into_owned()),
    }
}

fn from_value(registry: &TypeRegistry, value: Value) -> Result<SqlValue> {
    Ok(match value {
        Value::Nil => SqlValue::Null,
        Value::Boolean(b) => SqlValue::Bool(b),
        Value::Integer(i) => match (i.as_i64(), i.as_u64()) {
            (Some(v), _) => SqlValue::Int(v),
            // Above i64::MAX: exact as a decimal
            (None, Some(v)) => SqlValue::Decimal(Decimal::from(v)),
            _ => return Err(DumpError::decode(format!("integer out of range: {}", i))),
        },
        Value::F32(f) => SqlValue::Float(f as f64),
        Value::F64(f) => SqlValue::Float(f),
        Value::String(s) => match s.as_str() {
            Some(text) => SqlValue::Text(text.to_string()),
            None => SqlValue::Bytes(s.into_bytes()),
        },
        Value::Binary(b) => SqlValue::Bytes(b),
        Value::Ext(tag, data) => registry.decode_bytes(tag, &data)?,
        nested @ (Value::Array(_) | Value::Map(_)) => SqlValue::Json(value_to_json(nested)),
    })
}

struct Header {
    name: String,
    columns: Vec<String>,
    count: u64,
}

fn parse_header(payload: &[u8]) -> Result<Header> {
    let invalid = || DumpError::decode("malformed table header");
    let mut slice = payload;
    let fields = match rmpv::decode::read_value(&mut slice)? {
        Value::Array(fields) => fields,
        _ => return Err(invalid()),
    };
    let [name, columns, count] = <[Value; 3]>::try_from(fields).map_err(|_| invalid())?;

    let name = name.as_str().ok_or_else(invalid)?.to_string();
    let columns = match columns {
        Value::Array(cols) => cols
            .iter()
            .map(|c| c.as_str().map(str::to_string).ok_or_else(invalid))
            .collect::<Result<Vec<_>>>()?,
        Value::Nil => Vec::new(),
        _ => return Err(invalid()),
    };
    let count = count.as_u64().ok_or_else(invalid)?;
    Ok(Header { name, columns, count })
}

/// Lazy unit-by-unit walk over a MessagePack stream.
struct MsgPackUnits<'r> {
    reader: BufReader<Box<dyn Read + Send + 'r>>,
    registry: Arc<TypeRegistry>,
    current: Option<Header>,
    done: bool,
}

impl MsgPackUnits<'_> {
    fn next_unit(&mut self) -> Result<Option<TableUnit>> {
        loop {
            let value = match rmpv::decode::read_value(&mut self.reader) {
                Ok(value) => value,
                // A clean end of stream falls between units
                Err(DecodeError::InvalidMarkerRead(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            };

            match value {
                Value::Ext(TABLE_HEADER_TAG, payload) => {
                    self.current = Some(parse_header(&payload)?);
                }
                Value::Array(batch) => {
                    let header = self.current.as_ref().ok_or(DumpError::HeaderMissing)?;
                    let rows = batch
                        .into_iter()
                        .map(|row| match row {
                            Value::Array(values) => values
                                .into_iter()
                                .map(|v| from_value(&self.registry, v))
                                .collect::<Result<Vec<_>>>(),
                            _ => Err(DumpError::decode(format!(
                                "{}: each row must be an array",
                                header.name
                            ))),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    return Ok(Some(TableUnit {
                        name: header.name.clone(),
                        columns: header.columns.clone(),
                        count: header.count,
                        rows,
                    }));
                }
                other => {
                    return Err(DumpError::decode(format!(
                        "expected table header or row batch, found {}",
                        other
                    )))
                }
            }
        }
    }
}

impl Iterator for MsgPackUnits<'_> {
    type Item = Result<TableUnit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let unit = self.next_unit().transpose();
        if !matches!(unit, Some(Ok(_))) {
            self.done = true;
        }
        unit
    }
}

pub struct MsgPackDecoder {
    registry: Arc<TypeRegistry>,
}

impl MsgPackDecoder {
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }
}

impl Decoder for MsgPackDecoder {
    fn units<'r>(
        &self,
        input: Box<dyn Read + Send + 'r>,
        _name_hint: Option<&str>,
    ) -> Result<TableUnits<'r>> {
        Ok(Box::new(MsgPackUnits {
            reader: BufReader::new(input),
            registry: Arc::clone(&self.registry),
            current: None,
            done: false,
        }))
    }
}
