//! Flat tabular format (CSV).
//!
//! Per-table files start with the column-name record followed by one record
//! per row; the table name is the file stem. A combined stream repeats, per
//! table, a `[table, count]` record, the column-name record and exactly
//! `count` row records.
//!
//! NULL is an empty field and an empty field reads back as NULL, so empty
//! strings do not survive a round trip. Everything else comes back as text.

use std::io::{Read, Write};
use std::sync::Arc;

use csv::{ReaderBuilder, StringRecord, StringRecordsIntoIter, WriterBuilder};

use crate::core::schema::{Page, TableInfo, TableUnit};
use crate::core::value::SqlValue;
use crate::error::{DumpError, Result};
use crate::typemap::TypeRegistry;

use super::{Decoder, Encoder, OutputMode, TableUnits};

pub struct CsvEncoder {
    registry: Arc<TypeRegistry>,
    mode: OutputMode,
    /// Rows still owed to the current combined section.
    owed: u64,
}

impl CsvEncoder {
    pub fn new(registry: Arc<TypeRegistry>, mode: OutputMode) -> Self {
        Self {
            registry,
            mode,
            owed: 0,
        }
    }

    fn field(&self, value: &SqlValue) -> String {
        if let Some(text) = self.registry.canonical_text(value) {
            return text;
        }
        match value {
            SqlValue::Null => String::new(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Bytes(b) => SqlValue::hex_bytes(b),
            SqlValue::Json(v) => v.to_string(),
            other => format!("{:?}", other),
        }
    }
}

fn writer(out: &mut dyn Write) -> csv::Writer<&mut dyn Write> {
    WriterBuilder::new().flexible(true).from_writer(out)
}

impl Encoder for CsvEncoder {
    fn begin(&mut self, _out: &mut dyn Write) -> Result<()> {
        Ok(())
    }

    fn table_header(&mut self, out: &mut dyn Write, table: &TableInfo) -> Result<()> {
        let mut w = writer(out);
        if self.mode == OutputMode::Combined {
            let count = table.row_count.to_string();
            w.write_record([table.name.as_str(), count.as_str()])?;
            self.owed = table.row_count;
        }
        w.write_record(table.columns.iter().map(|c| c.name.as_str()))?;
        w.flush()?;
        Ok(())
    }

    fn table_rows(&mut self, out: &mut dyn Write, page: &Page) -> Result<()> {
        if self.mode == OutputMode::Combined {
            let rows = page.len() as u64;
            if rows > self.owed {
                return Err(DumpError::Encode(format!(
                    "section declares {} fewer rows than page {} carries",
                    rows - self.owed,
                    page.index
                )));
            }
            self.owed -= rows;
        }
        let mut w = writer(out);
        for row in &page.rows {
            w.write_record(row.iter().map(|v| self.field(v)))?;
        }
        w.flush()?;
        Ok(())
    }

    fn table_footer(&mut self, _out: &mut dyn Write, table: &TableInfo) -> Result<()> {
        if self.mode == OutputMode::Combined && self.owed > 0 {
            return Err(DumpError::Encode(format!(
                "{}: declared {} rows but {} were written",
                table.name,
                table.row_count,
                table.row_count - self.owed
            )));
        }
        Ok(())
    }

    fn end(&mut self, out: &mut dyn Write) -> Result<()> {
        out.flush()?;
        Ok(())
    }
}

fn row_of(record: &StringRecord) -> Vec<SqlValue> {
    record
        .iter()
        .map(|field| {
            if field.is_empty() {
                SqlValue::Null
            } else {
                SqlValue::Text(field.to_string())
            }
        })
        .collect()
}

fn names_of(record: &StringRecord) -> Vec<String> {
    record.iter().map(str::to_string).collect()
}

/// A data record must have one field per column.
fn checked_row(table: &str, columns: usize, record: &StringRecord) -> Result<Vec<SqlValue>> {
    if record.len() != columns {
        return Err(DumpError::decode(format!(
            "{}: record {:?} has {} fields, expected {}",
            table,
            record,
            record.len(),
            columns
        )));
    }
    Ok(row_of(record))
}

/// Lazily decodes one table at a time.
struct CsvUnits<'r> {
    records: StringRecordsIntoIter<Box<dyn Read + Send + 'r>>,
    /// Table name of a per-table file; `None` for a combined stream.
    name: Option<String>,
    done: bool,
}

impl CsvUnits<'_> {
    fn next_record(&mut self) -> Result<Option<StringRecord>> {
        self.records.next().transpose().map_err(Into::into)
    }

    fn single_table(&mut self, name: String) -> Result<Option<TableUnit>> {
        let Some(header) = self.next_record()? else {
            return Ok(None);
        };
        let mut rows = Vec::new();
        while let Some(record) = self.next_record()? {
            rows.push(checked_row(&name, header.len(), &record)?);
        }
        Ok(Some(TableUnit::new(name, names_of(&header), rows)))
    }

    fn next_section(&mut self) -> Result<Option<TableUnit>> {
        let Some(section) = self.next_record()? else {
            return Ok(None);
        };
        let (name, count) = match (section.get(0), section.get(1), section.len()) {
            (Some(name), Some(count), 2) => {
                let count: u64 = count.trim().parse().map_err(|_| {
                    DumpError::decode(format!("invalid row count '{}' for table {}", count, name))
                })?;
                (name.to_string(), count)
            }
            _ => {
                return Err(DumpError::decode(format!(
                    "expected a [table, count] record, found {:?}",
                    section
                )))
            }
        };

        let header = self
            .next_record()?
            .ok_or_else(|| DumpError::decode(format!("{}: missing column record", name)))?;
        let mut rows = Vec::with_capacity(count.min(1 << 16) as usize);
        for _ in 0..count {
            let record = self.next_record()?.ok_or_else(|| {
                DumpError::decode(format!("{}: expected {} rows, stream ended early", name, count))
            })?;
            rows.push(checked_row(&name, header.len(), &record)?);
        }
        Ok(Some(TableUnit {
            name,
            columns: names_of(&header),
            count,
            rows,
        }))
    }
}

impl Iterator for CsvUnits<'_> {
    type Item = Result<TableUnit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let unit = match self.name.take() {
            Some(name) => {
                self.done = true;
                self.single_table(name)
            }
            None => self.next_section(),
        };
        let unit = unit.transpose();
        if !matches!(unit, Some(Ok(_))) {
            self.done = true;
        }
        unit
    }
}

#[derive(Debug, Default)]
pub struct CsvDecoder;

impl CsvDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for CsvDecoder {
    fn units<'r>(
        &self,
        input: Box<dyn Read + Send + 'r>,
        name_hint: Option<&str>,
    ) -> Result<TableUnits<'r>> {
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(input);
        Ok(Box::new(CsvUnits {
            records: reader.into_records(),
            name: name_hint.map(str::to_string),
            done: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::testing;
    use chrono::NaiveDate;

    fn registry() -> Arc<TypeRegistry> {
        Arc::new(TypeRegistry::builtin())
    }

    fn text(s: &str) -> SqlValue {
        SqlValue::Text(s.to_string())
    }

    #[test]
    fn test_per_table_file() {
        let table = testing::table("people", &[("id", "int4"), ("name", "text"), ("ok", "bool")], 2);
        let out = testing::encode(
            &mut CsvEncoder::new(registry(), OutputMode::PerTable),
            &[(
                table,
                vec![vec![
                    vec![SqlValue::Int(1), text("Ann, Jr."), SqlValue::Bool(true)],
                    vec![SqlValue::Int(2), SqlValue::Null, SqlValue::Bool(false)],
                ]],
            )],
        );
        assert_eq!(
            String::from_utf8(out.clone()).unwrap(),
            "id,name,ok\n1,\"Ann, Jr.\",true\n2,,false\n"
        );

        let units = testing::decode(&CsvDecoder::new(), out, Some("people")).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].name, "people");
        assert_eq!(units[0].columns, vec!["id", "name", "ok"]);
        assert_eq!(
            units[0].rows,
            vec![
                vec![text("1"), text("Ann, Jr."), text("true")],
                vec![text("2"), SqlValue::Null, text("false")],
            ]
        );
    }

    #[test]
    fn test_combined_stream_sections() {
        let a = testing::table("a", &[("x", "int4")], 2);
        let b = testing::table("b", &[("d", "date"), ("j", "json")], 1);
        let out = testing::encode(
            &mut CsvEncoder::new(registry(), OutputMode::Combined),
            &[
                (a, vec![vec![vec![SqlValue::Int(1)]], vec![vec![SqlValue::Int(2)]]]),
                (
                    b,
                    vec![vec![vec![
                        SqlValue::Date(NaiveDate::from_ymd_opt(2014, 1, 1).unwrap()),
                        SqlValue::Json(serde_json::json!({"k": 1})),
                    ]]],
                ),
            ],
        );
        assert_eq!(
            String::from_utf8(out.clone()).unwrap(),
            "a,2\nx\n1\n2\nb,1\nd,j\n2014-01-01,\"{\"\"k\"\":1}\"\n"
        );

        let units = testing::decode(&CsvDecoder::new(), out, None).unwrap();
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].rows, vec![vec![text("1")], vec![text("2")]]);
        assert_eq!(units[1].count, 1);
        assert_eq!(units[1].rows, vec![vec![text("2014-01-01"), text(r#"{"k":1}"#)]]);
    }

    #[test]
    fn test_truncated_section_is_an_error() {
        let err = testing::decode(&CsvDecoder::new(), b"a,3\nx\n1\n".to_vec(), None).unwrap_err();
        assert!(matches!(err, DumpError::Decode(_)));
    }

    #[test]
    fn test_short_section_is_rejected_by_width() {
        // Declares three rows but only two follow before the next section
        let input = b"a,3\nx\n1\n2\nb,1\ny\n9\n".to_vec();
        let err = testing::decode(&CsvDecoder::new(), input, None).unwrap_err();
        match err {
            DumpError::Decode(message) => assert!(message.starts_with("a: record")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_ragged_per_table_record() {
        let err =
            testing::decode(&CsvDecoder::new(), b"id,name\n1,ann\n2\n".to_vec(), Some("people"))
                .unwrap_err();
        assert!(matches!(err, DumpError::Decode(_)));
    }

    #[test]
    fn test_combined_section_must_match_declared_count() {
        let table = testing::table("a", &[("x", "int4")], 3);
        let mut encoder = CsvEncoder::new(registry(), OutputMode::Combined);
        let mut out = Vec::new();
        encoder.table_header(&mut out, &table).unwrap();
        let page = Page {
            index: 0,
            rows: vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]],
            is_first: true,
            is_last: true,
        };
        encoder.table_rows(&mut out, &page).unwrap();
        let err = encoder.table_footer(&mut out, &table).unwrap_err();
        assert!(matches!(err, DumpError::Encode(_)));

        let table = testing::table("b", &[("x", "int4")], 1);
        encoder.table_header(&mut out, &table).unwrap();
        assert!(matches!(
            encoder.table_rows(&mut out, &page),
            Err(DumpError::Encode(_))
        ));
    }

    #[test]
    fn test_per_table_file_has_no_declared_count() {
        let table = testing::table("a", &[("x", "int4")], 3);
        let mut encoder = CsvEncoder::new(registry(), OutputMode::PerTable);
        let mut out = Vec::new();
        encoder.table_header(&mut out, &table).unwrap();
        let page = Page {
            index: 0,
            rows: vec![vec![SqlValue::Int(1)]],
            is_first: true,
            is_last: true,
        };
        encoder.table_rows(&mut out, &page).unwrap();
        encoder.table_footer(&mut out, &table).unwrap();
    }

    #[test]
    fn test_empty_input() {
        assert!(testing::decode(&CsvDecoder::new(), Vec::new(), None).unwrap().is_empty());
        assert!(testing::decode(&CsvDecoder::new(), Vec::new(), Some("t")).unwrap().is_empty());
    }
}
