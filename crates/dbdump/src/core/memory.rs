//! In-memory [`Connection`] for engine tests.
//!
//! Tables live in a sorted map so `list_tables` is stable. Statements built
//! by the real dialects are interpreted just far enough to exercise the dump
//! and load paths: multi-row `INSERT`, `TRUNCATE` and `DELETE FROM`. Every
//! statement is recorded in [`MemoryConnection::executed`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

use crate::drivers::DialectImpl;
use crate::error::{DumpError, Result};

use super::schema::{Column, ColumnKind};
use super::traits::{Backend, Connection, Dialect};
use super::value::{utc_offset, RawRow, Row, SqlValue};

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<Column>,
    rows: Vec<Row>,
    foreign_keys: Vec<String>,
}

pub struct MemoryConnection {
    dialect: DialectImpl,
    tables: BTreeMap<String, MemoryTable>,
    snapshot: Option<BTreeMap<String, MemoryTable>>,
    fail_on: Option<String>,
    pub executed: Vec<String>,
    pub sequence_resets: Vec<String>,
}

impl MemoryConnection {
    pub fn new(backend: Backend) -> Self {
        Self {
            dialect: DialectImpl::for_backend(backend),
            tables: BTreeMap::new(),
            snapshot: None,
            fail_on: None,
            executed: Vec::new(),
            sequence_resets: Vec::new(),
        }
    }

    /// Add a table; `columns` are `(name, storage type)` pairs.
    pub fn with_table(mut self, name: &str, columns: &[(&str, &str)], rows: Vec<Row>) -> Self {
        let columns = columns.iter().map(|(n, t)| Column::new(*n, *t)).collect();
        self.tables.insert(
            name.to_string(),
            MemoryTable {
                columns,
                rows,
                foreign_keys: Vec::new(),
            },
        );
        self
    }

    pub fn with_foreign_key(mut self, table: &str, constraint: &str) -> Self {
        if let Some(t) = self.tables.get_mut(table) {
            t.foreign_keys.push(constraint.to_string());
        }
        self
    }

    /// Fail every statement containing `needle`.
    pub fn fail_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    /// Current rows of a table in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Executed statements starting with `prefix`.
    pub fn statements(&self, prefix: &str) -> Vec<&str> {
        self.executed
            .iter()
            .filter(|s| s.starts_with(prefix))
            .map(String::as_str)
            .collect()
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| DumpError::load(name, "relation does not exist"))
    }

    fn apply(&mut self, sql: &str) -> Result<u64> {
        let backslash = self.dialect.backend() == Backend::Mysql;
        let mut scan = Scanner::new(sql, backslash);

        if scan.keyword("INSERT INTO") {
            let name = scan.ident()?;
            let columns = scan.ident_list()?;
            scan.expect_keyword("VALUES")?;
            let mut tuples = Vec::new();
            loop {
                tuples.push(scan.tuple()?);
                if !scan.eat(',') {
                    break;
                }
            }
            return self.insert(&name, &columns, tuples);
        }

        if scan.keyword("TRUNCATE") {
            let mut affected = 0;
            loop {
                let name = scan.ident()?;
                affected += self.clear(&name)?;
                if !scan.eat(',') {
                    break;
                }
            }
            return Ok(affected);
        }

        if scan.keyword("DELETE FROM") {
            let name = scan.ident()?;
            return self.clear(&name);
        }

        // ALTER TABLE / SET ... only change session state
        Ok(0)
    }

    fn clear(&mut self, name: &str) -> Result<u64> {
        let table = self
            .tables
            .get_mut(name)
            .ok_or_else(|| DumpError::load(name, "relation does not exist"))?;
        let affected = table.rows.len() as u64;
        table.rows.clear();
        Ok(affected)
    }

    fn insert(&mut self, name: &str, columns: &[String], tuples: Vec<Vec<Literal>>) -> Result<u64> {
        let table = self
            .tables
            .get_mut(name)
            .ok_or_else(|| DumpError::load(name, "relation does not exist"))?;

        let mut positions = Vec::with_capacity(columns.len());
        for column in columns {
            let index = table
                .columns
                .iter()
                .position(|c| &c.name == column)
                .ok_or_else(|| DumpError::load(name, format!("column \"{}\" does not exist", column)))?;
            positions.push(index);
        }

        let count = tuples.len() as u64;
        for tuple in tuples {
            if tuple.len() != positions.len() {
                return Err(DumpError::load(name, "INSERT has more expressions than target columns"));
            }
            let mut row = vec![SqlValue::Null; table.columns.len()];
            for (literal, &index) in tuple.into_iter().zip(&positions) {
                row[index] = literal
                    .into_value(&table.columns[index])
                    .map_err(|message| DumpError::load(name, message))?;
            }
            table.rows.push(row);
        }
        Ok(count)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        Ok(self.tables.keys().cloned().collect())
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<Column>> {
        Ok(self
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    async fn row_count(&mut self, table: &str) -> Result<u64> {
        Ok(self.table(table)?.rows.len() as u64)
    }

    async fn select_page(
        &mut self,
        table: &str,
        sort_key: &[String],
        offset: u64,
        limit: usize,
    ) -> Result<Vec<RawRow>> {
        let t = self.table(table)?;
        let keys: Vec<usize> = sort_key
            .iter()
            .filter_map(|k| t.columns.iter().position(|c| &c.name == k))
            .collect();

        let mut rows: Vec<&Row> = t.rows.iter().collect();
        rows.sort_by(|a, b| {
            keys.iter()
                .map(|&i| compare(&a[i], &b[i]))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });

        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit)
            .map(|row| {
                t.columns
                    .iter()
                    .map(|c| c.name.clone())
                    .zip(row.iter().cloned())
                    .collect::<HashMap<_, _>>()
            })
            .collect())
    }

    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<String>> {
        Ok(self
            .tables
            .get(table)
            .map(|t| t.foreign_keys.clone())
            .unwrap_or_default())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.executed.push(sql.to_string());
        if let Some(needle) = &self.fail_on {
            if sql.contains(needle.as_str()) {
                return Err(DumpError::connection("injected failure", sql));
            }
        }
        self.apply(sql)
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        self.executed.push("BEGIN".to_string());
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.executed.push("COMMIT".to_string());
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.executed.push("ROLLBACK".to_string());
        if let Some(snapshot) = self.snapshot.take() {
            self.tables = snapshot;
        }
        Ok(())
    }

    async fn reset_pk_sequence(&mut self, table: &str) -> Result<()> {
        self.sequence_resets.push(table.to_string());
        Ok(())
    }
}

/// Order values of one column; NULL sorts first.
fn compare(a: &SqlValue, b: &SqlValue) -> Ordering {
    use SqlValue::*;
    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Bool(x), Bool(y)) => x.cmp(y),
        (Int(x), Int(y)) => x.cmp(y),
        (Float(x), Float(y)) => x.total_cmp(y),
        (Decimal(x), Decimal(y)) => x.cmp(y),
        (Timestamp(x), Timestamp(y)) => x.cmp(y),
        (Date(x), Date(y)) => x.cmp(y),
        (Time(x, _), Time(y, _)) => x.cmp(y),
        (Text(x), Text(y)) => x.cmp(y),
        (Bytes(x), Bytes(y)) => x.cmp(y),
        _ => a.type_name().cmp(b.type_name()),
    }
}

/// One parsed SQL literal.
#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Null,
    Bool(bool),
    Number(String),
    Str(String),
    Bytes(Vec<u8>),
    Json(String),
}

impl Literal {
    /// Store the literal the way a server would for the column's type.
    ///
    /// Json columns only accept NULL or valid JSON text.
    fn into_value(self, column: &Column) -> std::result::Result<SqlValue, String> {
        if column.kind == ColumnKind::Json {
            return match self {
                Literal::Null => Ok(SqlValue::Null),
                Literal::Str(text) | Literal::Json(text) => serde_json::from_str(&text)
                    .map(SqlValue::Json)
                    .map_err(|e| format!("invalid input syntax for type json: {}", e)),
                other => Err(format!(
                    "column \"{}\" is of type {} but expression is {:?}",
                    column.name, column.data_type, other
                )),
            };
        }
        Ok(match self {
            Literal::Null => SqlValue::Null,
            Literal::Bool(b) => SqlValue::Bool(b),
            Literal::Bytes(b) => SqlValue::Bytes(b),
            Literal::Json(text) => serde_json::from_str(&text)
                .map(SqlValue::Json)
                .unwrap_or(SqlValue::Text(text)),
            Literal::Number(n) => number_value(&n, column.kind),
            Literal::Str(s) => string_value(s, column.kind),
        })
    }
}

fn number_value(text: &str, kind: ColumnKind) -> SqlValue {
    match kind {
        ColumnKind::Decimal => Decimal::from_str(text)
            .map(SqlValue::Decimal)
            .unwrap_or_else(|_| SqlValue::Text(text.to_string())),
        ColumnKind::Float => text
            .parse()
            .map(SqlValue::Float)
            .unwrap_or_else(|_| SqlValue::Text(text.to_string())),
        ColumnKind::Boolean => SqlValue::Bool(text != "0"),
        _ => text
            .parse()
            .map(SqlValue::Int)
            .or_else(|_| text.parse().map(SqlValue::Float))
            .unwrap_or_else(|_| SqlValue::Text(text.to_string())),
    }
}

fn string_value(s: String, kind: ColumnKind) -> SqlValue {
    let parsed = match kind {
        ColumnKind::Timestamp => DateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f%:z")
            .ok()
            .map(SqlValue::Timestamp)
            .or_else(|| {
                NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f")
                    .ok()
                    .map(|naive| SqlValue::Timestamp(naive.and_utc().fixed_offset()))
            }),
        ColumnKind::Date => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .ok()
            .map(SqlValue::Date),
        ColumnKind::Time => parse_time(&s),
        ColumnKind::Binary => s
            .strip_prefix("\\x")
            .and_then(|h| hex::decode(h).ok())
            .map(SqlValue::Bytes),
        ColumnKind::Float => s.parse().ok().map(SqlValue::Float),
        ColumnKind::Integer => s.parse().ok().map(SqlValue::Int),
        ColumnKind::Decimal => Decimal::from_str(&s).ok().map(SqlValue::Decimal),
        ColumnKind::Boolean => Some(SqlValue::Bool(matches!(s.as_str(), "t" | "true" | "1"))),
        _ => None,
    };
    parsed.unwrap_or(SqlValue::Text(s))
}

fn parse_time(s: &str) -> Option<SqlValue> {
    // Offset is the trailing `+HH:MM` / `-HH:MM`, when present
    let split = s.rfind(['+', '-']).filter(|&i| i >= 8);
    match split {
        Some(i) => {
            let time = NaiveTime::parse_from_str(&s[..i], "%H:%M:%S%.f").ok()?;
            let offset = crate::typemap::parse_offset(&s[i..])?;
            Some(SqlValue::Time(time, offset))
        }
        None => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
            .ok()
            .map(|t| SqlValue::Time(t, utc_offset())),
    }
}

/// Character cursor over one statement.
struct Scanner {
    chars: Vec<char>,
    pos: usize,
    backslash_escapes: bool,
}

impl Scanner {
    fn new(sql: &str, backslash_escapes: bool) -> Self {
        Self {
            chars: sql.chars().collect(),
            pos: 0,
            backslash_escapes,
        }
    }

    fn error(&self, what: &str) -> DumpError {
        let rest: String = self.chars[self.pos.min(self.chars.len())..].iter().take(20).collect();
        DumpError::load("memory", format!("syntax error: expected {} near '{}'", what, rest))
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, ch: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<()> {
        if self.eat(ch) {
            Ok(())
        } else {
            Err(self.error(&format!("'{}'", ch)))
        }
    }

    /// Consume a case-insensitive keyword sequence if present.
    fn keyword(&mut self, word: &str) -> bool {
        self.skip_ws();
        let start = self.pos;
        for expected in word.split_whitespace() {
            self.skip_ws();
            let end = self.pos + expected.chars().count();
            let matches = self
                .chars
                .get(self.pos..end)
                .is_some_and(|s| s.iter().collect::<String>().eq_ignore_ascii_case(expected));
            if !matches {
                self.pos = start;
                return false;
            }
            self.pos = end;
        }
        true
    }

    fn expect_keyword(&mut self, word: &str) -> Result<()> {
        if self.keyword(word) {
            Ok(())
        } else {
            Err(self.error(word))
        }
    }

    /// Quoted (`"x"` or `` `x` ``) or bare identifier.
    fn ident(&mut self) -> Result<String> {
        self.skip_ws();
        match self.peek() {
            Some(q @ ('"' | '`')) => {
                self.pos += 1;
                self.delimited(q, false)
            }
            Some(c) if c.is_alphanumeric() || c == '_' => {
                let mut out = String::new();
                while let Some(c) = self.peek().filter(|c| c.is_alphanumeric() || *c == '_') {
                    out.push(c);
                    self.pos += 1;
                }
                Ok(out)
            }
            _ => Err(self.error("identifier")),
        }
    }

    fn ident_list(&mut self) -> Result<Vec<String>> {
        self.expect('(')?;
        let mut names = vec![self.ident()?];
        while self.eat(',') {
            names.push(self.ident()?);
        }
        self.expect(')')?;
        Ok(names)
    }

    /// Body of a delimited token after its opening quote; doubled quotes escape.
    fn delimited(&mut self, quote: char, backslash: bool) -> Result<String> {
        let mut out = String::new();
        loop {
            let c = self.peek().ok_or_else(|| self.error("closing quote"))?;
            self.pos += 1;
            if backslash && c == '\\' {
                let next = self.peek().ok_or_else(|| self.error("escaped character"))?;
                self.pos += 1;
                out.push(next);
            } else if c == quote {
                if self.peek() == Some(quote) {
                    self.pos += 1;
                    out.push(quote);
                } else {
                    return Ok(out);
                }
            } else {
                out.push(c);
            }
        }
    }

    fn string(&mut self) -> Result<String> {
        self.expect('\'')?;
        self.delimited('\'', self.backslash_escapes)
    }

    fn tuple(&mut self) -> Result<Vec<Literal>> {
        self.expect('(')?;
        let mut values = vec![self.literal()?];
        while self.eat(',') {
            values.push(self.literal()?);
        }
        self.expect(')')?;
        Ok(values)
    }

    fn literal(&mut self) -> Result<Literal> {
        self.skip_ws();
        if self.peek() == Some('\'') {
            return self.string().map(Literal::Str);
        }
        if self.keyword("CAST") {
            self.expect('(')?;
            let text = self.string()?;
            self.expect_keyword("AS JSON")?;
            self.expect(')')?;
            return Ok(Literal::Json(text));
        }
        if matches!(self.peek(), Some('X' | 'x')) && self.chars.get(self.pos + 1) == Some(&'\'') {
            self.pos += 1;
            let text = self.string()?;
            return hex::decode(&text)
                .map(Literal::Bytes)
                .map_err(|_| self.error("hex literal"));
        }

        let mut word = String::new();
        while let Some(c) = self
            .peek()
            .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '+' | '_'))
        {
            word.push(c);
            self.pos += 1;
        }
        match word.to_ascii_uppercase().as_str() {
            "" => Err(self.error("value")),
            "NULL" => Ok(Literal::Null),
            "TRUE" => Ok(Literal::Bool(true)),
            "FALSE" => Ok(Literal::Bool(false)),
            _ => Ok(Literal::Number(word)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_statement_is_interpreted() {
        let mut conn = MemoryConnection::new(Backend::Postgres).with_table(
            "people",
            &[("id", "int4"), ("name", "text"), ("active", "bool")],
            Vec::new(),
        );
        let affected = conn
            .execute(r#"INSERT INTO "people" ("name","id") VALUES ('O''Brien', 2), (NULL, 1)"#)
            .await
            .unwrap();
        assert_eq!(affected, 2);
        assert_eq!(
            conn.rows("people"),
            vec![
                vec![SqlValue::Int(2), SqlValue::Text("O'Brien".into()), SqlValue::Null],
                vec![SqlValue::Int(1), SqlValue::Null, SqlValue::Null],
            ]
        );
    }

    #[tokio::test]
    async fn test_rollback_restores_snapshot() {
        let mut conn = MemoryConnection::new(Backend::Mysql).with_table(
            "t",
            &[("id", "int")],
            vec![vec![SqlValue::Int(1)]],
        );
        conn.begin_transaction().await.unwrap();
        conn.execute("DELETE FROM `t`").await.unwrap();
        assert!(conn.rows("t").is_empty());
        conn.rollback().await.unwrap();
        assert_eq!(conn.rows("t"), vec![vec![SqlValue::Int(1)]]);
    }

    #[tokio::test]
    async fn test_select_page_sorts_and_limits() {
        let mut conn = MemoryConnection::new(Backend::Postgres).with_table(
            "t",
            &[("id", "int4")],
            vec![vec![SqlValue::Int(3)], vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]],
        );
        let page = conn
            .select_page("t", &["id".to_string()], 1, 1)
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0]["id"], SqlValue::Int(2));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let mut conn = MemoryConnection::new(Backend::Postgres)
            .with_table("t", &[("id", "int4")], Vec::new())
            .fail_on("INSERT");
        assert!(conn.execute(r#"INSERT INTO "t" ("id") VALUES (1)"#).await.is_err());
        assert!(conn.rows("t").is_empty());
    }

    #[tokio::test]
    async fn test_json_columns_reject_non_json_literals() {
        let mut conn = MemoryConnection::new(Backend::Postgres).with_table(
            "docs",
            &[("id", "int4"), ("body", "jsonb")],
            Vec::new(),
        );
        assert!(conn.execute(r#"INSERT INTO "docs" ("id","body") VALUES (1, 'hello')"#).await.is_err());
        assert!(conn.execute(r#"INSERT INTO "docs" ("id","body") VALUES (1, 5)"#).await.is_err());
        conn.execute(r#"INSERT INTO "docs" ("id","body") VALUES (1, '"hello"')"#)
            .await
            .unwrap();
        assert_eq!(
            conn.rows("docs"),
            vec![vec![SqlValue::Int(1), SqlValue::Json(serde_json::json!("hello"))]]
        );
    }
}
