//! MySQL/MariaDB access layer over a single `mysql_async` connection.

use std::collections::HashMap;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder, SslOpts, Value};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::MysqlDialect;
use crate::config::DatabaseConfig;
use crate::core::schema::{Column, ColumnKind};
use crate::core::traits::{Connection, Dialect};
use crate::core::value::{utc_offset, RawRow, SqlValue};
use crate::drivers::common::SslMode;
use crate::error::{DumpError, Result};
use crate::typemap::parse_decimal;

/// One MySQL session on the configured database.
pub struct MysqlConnection {
    conn: Conn,
    dialect: MysqlDialect,
    columns: HashMap<String, Vec<Column>>,
}

impl MysqlConnection {
    /// Connect with utf8mb4 and the configured TLS mode.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let ssl_opts = match config.ssl_mode.parse::<SslMode>()? {
            SslMode::Disable => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            SslMode::Require => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
            SslMode::VerifyCa | SslMode::VerifyFull => Some(SslOpts::default()),
        };

        let builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port())
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            .init(vec!["SET NAMES utf8mb4"])
            .ssl_opts(ssl_opts);

        let conn = Conn::new(builder)
            .await
            .map_err(|e| DumpError::connection(e, "connecting to MySQL"))?;

        info!(
            "Connected to MySQL: {}:{}/{}",
            config.host,
            config.port(),
            config.database
        );

        Ok(Self {
            conn,
            dialect: MysqlDialect::new(),
            columns: HashMap::new(),
        })
    }
}

#[async_trait]
impl Connection for MysqlConnection {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let tables: Vec<String> = self
            .conn
            .query(
                "SELECT CAST(TABLE_NAME AS CHAR(255)) FROM INFORMATION_SCHEMA.TABLES
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'
                 ORDER BY TABLE_NAME",
            )
            .await?;
        Ok(tables)
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<Column>> {
        if let Some(cols) = self.columns.get(table) {
            return Ok(cols.clone());
        }
        let rows: Vec<(String, String)> = self
            .conn
            .exec(
                "SELECT CAST(COLUMN_NAME AS CHAR(255)), CAST(COLUMN_TYPE AS CHAR(255))
                 FROM INFORMATION_SCHEMA.COLUMNS
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
                 ORDER BY ORDINAL_POSITION",
                (table,),
            )
            .await?;
        let cols: Vec<Column> = rows
            .into_iter()
            .map(|(name, data_type)| Column::new(name, data_type))
            .collect();
        self.columns.insert(table.to_string(), cols.clone());
        Ok(cols)
    }

    async fn row_count(&mut self, table: &str) -> Result<u64> {
        let sql = self.dialect.build_count_query(table);
        let count: Option<u64> = self.conn.query_first(sql.as_str()).await?;
        Ok(count.unwrap_or(0))
    }

    async fn select_page(
        &mut self,
        table: &str,
        sort_key: &[String],
        offset: u64,
        limit: usize,
    ) -> Result<Vec<RawRow>> {
        let kinds: HashMap<String, ColumnKind> = self
            .columns(table)
            .await?
            .into_iter()
            .map(|c| (c.name, c.kind))
            .collect();
        let sql = self
            .dialect
            .build_page_query(table, &[], sort_key, offset, limit);
        debug!("{}", sql);

        let rows: Vec<mysql_async::Row> = self.conn.query(sql.as_str()).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let mut raw = RawRow::with_capacity(row.len());
            for (idx, col) in row.columns_ref().iter().enumerate() {
                let name = col.name_str().into_owned();
                let kind = kinds.get(&name).copied().unwrap_or(ColumnKind::String);
                let value = row.as_ref(idx).cloned().unwrap_or(Value::NULL);
                raw.insert(name, convert_mysql_value(value, kind));
            }
            out.push(raw);
        }
        Ok(out)
    }

    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<String>> {
        let names: Vec<String> = self
            .conn
            .exec(
                "SELECT CAST(CONSTRAINT_NAME AS CHAR(255)) FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS
                 WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?
                   AND CONSTRAINT_TYPE = 'FOREIGN KEY'
                 ORDER BY CONSTRAINT_NAME",
                (table,),
            )
            .await?;
        Ok(names)
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!("{}", sql);
        self.conn.query_drop(sql).await?;
        Ok(self.conn.affected_rows())
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        self.conn.query_drop("START TRANSACTION").await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn.query_drop("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn.query_drop("ROLLBACK").await?;
        Ok(())
    }

    async fn reset_pk_sequence(&mut self, _table: &str) -> Result<()> {
        // AUTO_INCREMENT follows explicit ids on insert; ALTER TABLE would commit
        Ok(())
    }
}

/// Convert a fetched value using the column's semantic kind.
///
/// Pages are read over the text protocol, which delivers every non-NULL
/// value as bytes, so the kind decides how they are parsed. The typed arms
/// cover values read through prepared statements.
fn convert_mysql_value(value: Value, kind: ColumnKind) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(i) => SqlValue::Int(i),
        Value::UInt(u) => i64::try_from(u)
            .map(SqlValue::Int)
            .unwrap_or_else(|_| SqlValue::Decimal(Decimal::from(u))),
        Value::Float(f) => SqlValue::Float(f64::from(f)),
        Value::Double(d) => SqlValue::Float(d),
        Value::Date(y, m, d, h, mi, s, us) => {
            let date = NaiveDate::from_ymd_opt(i32::from(y), u32::from(m), u32::from(d));
            match (kind, date) {
                (ColumnKind::Date, Some(date)) => SqlValue::Date(date),
                (_, Some(date)) => date
                    .and_hms_micro_opt(u32::from(h), u32::from(mi), u32::from(s), us)
                    .map(|ts| SqlValue::Timestamp(ts.and_utc().fixed_offset()))
                    .unwrap_or(SqlValue::Null),
                // Zero dates (0000-00-00) have no calendar value
                (_, None) => SqlValue::Null,
            }
        }
        Value::Time(neg, days, h, m, s, us) => {
            let hours = days * 24 + u32::from(h);
            if neg || hours >= 24 {
                let sign = if neg { "-" } else { "" };
                SqlValue::Text(format!("{}{:02}:{:02}:{:02}", sign, hours, m, s))
            } else {
                NaiveTime::from_hms_micro_opt(hours, u32::from(m), u32::from(s), us)
                    .map(|t| SqlValue::Time(t, utc_offset()))
                    .unwrap_or(SqlValue::Null)
            }
        }
        Value::Bytes(bytes) => convert_text_bytes(bytes, kind),
    }
}

fn convert_text_bytes(bytes: Vec<u8>, kind: ColumnKind) -> SqlValue {
    match (kind, bytes.as_slice()) {
        (ColumnKind::Binary, _) => return SqlValue::Bytes(bytes),
        // BIT(1) is sent as one raw byte, unlike tinyint(1)'s ASCII digit
        (ColumnKind::Boolean, [bit @ (0 | 1)]) => return SqlValue::Bool(*bit == 1),
        _ => {}
    }
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => return SqlValue::Bytes(e.into_bytes()),
    };
    if is_zero_date(kind, &text) {
        return SqlValue::Null;
    }
    let parsed = match kind {
        ColumnKind::Integer => text.parse::<i64>().ok().map(SqlValue::Int),
        ColumnKind::Float => text.parse::<f64>().ok().map(SqlValue::Float),
        // Numerals wider than Decimal stay exact as text
        ColumnKind::Decimal => parse_decimal(&text).ok().map(SqlValue::Decimal),
        ColumnKind::Timestamp => NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(|ts| SqlValue::Timestamp(ts.and_utc().fixed_offset())),
        ColumnKind::Date => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .ok()
            .map(SqlValue::Date),
        ColumnKind::Time => NaiveTime::parse_from_str(&text, "%H:%M:%S%.f")
            .ok()
            .map(|t| SqlValue::Time(t, utc_offset())),
        // Booleans and json stay textual; the row normalizer handles them
        _ => None,
    };
    parsed.unwrap_or(SqlValue::Text(text))
}

/// Zero dates (`0000-00-00`, `0000-00-00 00:00:00`) have no calendar value.
fn is_zero_date(kind: ColumnKind, text: &str) -> bool {
    matches!(kind, ColumnKind::Date | ColumnKind::Timestamp) && text.starts_with("0000-00-00")
}
