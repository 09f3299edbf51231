//! PostgreSQL access layer over a single `tokio-postgres` client.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, info, warn};

use super::PostgresDialect;
use crate::config::DatabaseConfig;
use crate::core::schema::Column;
use crate::core::traits::{Connection, Dialect};
use crate::core::value::{utc_offset, RawRow, SqlValue};
use crate::drivers::common::{SslMode, TlsBuilder};
use crate::error::{DumpError, Result};
use crate::typemap::{parse_decimal, parse_offset};

/// Storage types fetched in binary form; anything else is selected as `::text`.
///
/// `numeric` and `timetz` travel as text and are parsed by [`convert_text_column`].
const NATIVE_TYPES: &[&str] = &[
    "bool", "int2", "int4", "int8", "float4", "float8", "text", "varchar", "bpchar", "name",
    "timestamp", "timestamptz", "date", "time", "bytea", "json", "jsonb",
];

/// One PostgreSQL session, scoped to the configured schema.
pub struct PostgresConnection {
    client: Client,
    schema: String,
    dialect: PostgresDialect,
    columns: HashMap<String, Vec<Column>>,
}

impl PostgresConnection {
    /// Connect and set the session's `search_path` to the configured schema.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port())
            .dbname(&config.database)
            .user(&config.user)
            .password(&config.password);

        let ssl_mode: SslMode = config.ssl_mode.parse()?;
        let client = match TlsBuilder::new(ssl_mode).build()? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let (client, conn) = pg
                    .connect(NoTls)
                    .await
                    .map_err(|e| DumpError::connection(e, "connecting to PostgreSQL"))?;
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        warn!("PostgreSQL connection closed: {}", e);
                    }
                });
                client
            }
            Some(tls) => {
                let (client, conn) = pg
                    .connect(tls)
                    .await
                    .map_err(|e| DumpError::connection(e, "connecting to PostgreSQL over TLS"))?;
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        warn!("PostgreSQL connection closed: {}", e);
                    }
                });
                client
            }
        };

        let dialect = PostgresDialect::new();
        client
            .batch_execute(&format!("SET search_path TO {}", dialect.quote_ident(&config.schema)))
            .await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{} (schema {})",
            config.host,
            config.port(),
            config.database,
            config.schema
        );

        Ok(Self {
            client,
            schema: config.schema.clone(),
            dialect,
            columns: HashMap::new(),
        })
    }

    fn qualify(&self, table: &str) -> String {
        format!(
            "{}.{}",
            self.dialect.quote_ident(&self.schema),
            self.dialect.quote_ident(table)
        )
    }

    async fn primary_key(&self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT a.attname::text
                 FROM pg_index i
                 JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
                 WHERE i.indrelid = $1::text::regclass AND i.indisprimary
                 ORDER BY a.attnum",
                &[&self.qualify(table)],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT table_name::text FROM information_schema.tables
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE'
                 ORDER BY table_name",
                &[&self.schema],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn columns(&mut self, table: &str) -> Result<Vec<Column>> {
        if let Some(cols) = self.columns.get(table) {
            return Ok(cols.clone());
        }
        let rows = self
            .client
            .query(
                "SELECT column_name::text, udt_name::text FROM information_schema.columns
                 WHERE table_schema = $1 AND table_name = $2
                 ORDER BY ordinal_position",
                &[&self.schema, &table],
            )
            .await?;
        let cols: Vec<Column> = rows
            .iter()
            .map(|r| Column::new(r.get::<_, String>(0), r.get::<_, String>(1)))
            .collect();
        self.columns.insert(table.to_string(), cols.clone());
        Ok(cols)
    }

    async fn row_count(&mut self, table: &str) -> Result<u64> {
        let sql = self.dialect.build_count_query(table);
        let row = self.client.query_one(sql.as_str(), &[]).await?;
        let count: i64 = row.get(0);
        Ok(count.max(0) as u64)
    }

    async fn select_page(
        &mut self,
        table: &str,
        sort_key: &[String],
        offset: u64,
        limit: usize,
    ) -> Result<Vec<RawRow>> {
        let columns = self.columns(table).await?;
        let select: Vec<String> = columns
            .iter()
            .map(|c| {
                let ident = self.dialect.quote_ident(&c.name);
                if NATIVE_TYPES.contains(&c.data_type.as_str()) {
                    ident
                } else {
                    format!("{0}::text AS {0}", ident)
                }
            })
            .collect();
        let sql = self
            .dialect
            .build_page_query(table, &select, sort_key, offset, limit);
        debug!("{}", sql);

        let rows = self.client.query(sql.as_str(), &[]).await?;
        rows.iter()
            .map(|row| {
                let mut raw = raw_row(row)?;
                for column in &columns {
                    if let Some(value) = raw.remove(&column.name) {
                        raw.insert(column.name.clone(), convert_text_column(column, value));
                    }
                }
                Ok(raw)
            })
            .collect()
    }

    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .client
            .query(
                "SELECT constraint_name::text FROM information_schema.table_constraints
                 WHERE table_schema = $1 AND table_name = $2 AND constraint_type = 'FOREIGN KEY'
                 ORDER BY constraint_name",
                &[&self.schema, &table],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        debug!("{}", sql);
        Ok(self.client.execute(sql, &[]).await?)
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn reset_pk_sequence(&mut self, table: &str) -> Result<()> {
        let qualified = self.qualify(table);
        for pk_col in self.primary_key(table).await? {
            let row = self
                .client
                .query_one(
                    "SELECT pg_get_serial_sequence($1, $2)",
                    &[&qualified, &pk_col],
                )
                .await?;
            let Some(seq_name) = row.get::<_, Option<String>>(0) else {
                continue;
            };
            let reset = format!(
                "SELECT setval($1::text::regclass, COALESCE((SELECT MAX({}) FROM {}), 0) + 1, false)",
                self.dialect.quote_ident(&pk_col),
                qualified
            );
            self.client.query_one(reset.as_str(), &[&seq_name]).await?;
            debug!("Reset sequence {} for {}", seq_name, qualified);
        }
        Ok(())
    }
}

fn raw_row(row: &Row) -> Result<RawRow> {
    let mut out = RawRow::with_capacity(row.len());
    for (idx, col) in row.columns().iter().enumerate() {
        out.insert(col.name().to_string(), convert_pg_value(row, idx)?);
    }
    Ok(out)
}

/// Convert one fetched column to a [`SqlValue`] by its wire type.
fn convert_pg_value(row: &Row, idx: usize) -> Result<SqlValue> {
    let utc = utc_offset();
    let value = match row.columns()[idx].type_().name() {
        "bool" => row.try_get::<_, Option<bool>>(idx)?.into(),
        "int2" => row.try_get::<_, Option<i16>>(idx)?.map(i64::from).into(),
        "int4" => row.try_get::<_, Option<i32>>(idx)?.map(i64::from).into(),
        "int8" => row.try_get::<_, Option<i64>>(idx)?.into(),
        "float4" => row.try_get::<_, Option<f32>>(idx)?.map(f64::from).into(),
        "float8" => row.try_get::<_, Option<f64>>(idx)?.into(),
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|ts| SqlValue::Timestamp(ts.and_utc().fixed_offset()))
            .unwrap_or(SqlValue::Null),
        "timestamptz" => row.try_get::<_, Option<DateTime<FixedOffset>>>(idx)?.into(),
        "date" => row.try_get::<_, Option<NaiveDate>>(idx)?.into(),
        "time" => row
            .try_get::<_, Option<NaiveTime>>(idx)?
            .map(|t| SqlValue::Time(t, utc))
            .unwrap_or(SqlValue::Null),
        "bytea" => row.try_get::<_, Option<Vec<u8>>>(idx)?.into(),
        "json" | "jsonb" => row.try_get::<_, Option<serde_json::Value>>(idx)?.into(),
        _ => row.try_get::<_, Option<String>>(idx)?.into(),
    };
    Ok(value)
}

/// Parse columns that were selected as text into their typed value.
///
/// Numerals wider than `Decimal` and unparseable values keep their text.
fn convert_text_column(column: &Column, value: SqlValue) -> SqlValue {
    let SqlValue::Text(text) = value else {
        return value;
    };
    let parsed = match column.data_type.as_str() {
        "numeric" => parse_decimal(&text).ok().map(SqlValue::Decimal),
        "timetz" => parse_timetz(&text),
        _ => None,
    };
    parsed.unwrap_or(SqlValue::Text(text))
}

/// `12:20:00+02`, `08:05:03.25+05:30`
fn parse_timetz(text: &str) -> Option<SqlValue> {
    let split = text.rfind(['+', '-'])?;
    let (time, offset) = text.split_at(split);
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S%.f").ok()?;
    Some(SqlValue::Time(time, parse_offset(offset)?))
}
