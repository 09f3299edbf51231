//! Transactional loader.
//!
//! A load runs inside one transaction: foreign-key checks are deferred,
//! known tables are truncated once, every decoded [`TableUnit`] is inserted
//! in page-sized multi-row statements, and primary-key sequences are moved
//! past the loaded rows. Any failure rolls the whole load back.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{default_page_size, default_reserved_tables, Config};
use crate::core::schema::{Column, ColumnKind, TableUnit};
use crate::core::traits::Connection;
use crate::core::value::SqlValue;
use crate::error::{DumpError, Result};
use crate::format::{Format, TableUnits};
use crate::normalize::structured_scalar;
use crate::typemap::TypeRegistry;

/// Load tuning.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Rows per INSERT statement.
    pub page_size: usize,

    /// Empty every known table before inserting.
    pub truncate: bool,

    /// Tables that are never truncated or loaded.
    pub reserved_tables: Vec<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            truncate: true,
            reserved_tables: default_reserved_tables(),
        }
    }
}

impl From<&Config> for LoadOptions {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.dump.page_size,
            truncate: config.load.truncate,
            reserved_tables: config.dump.reserved_tables.clone(),
        }
    }
}

/// Counters for one load run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Distinct tables loaded.
    pub tables: usize,
    /// Rows inserted.
    pub rows: u64,
    /// INSERT statements executed.
    pub batches: u64,
}

/// Restores documents into a connection.
pub struct Loader<'c> {
    conn: &'c mut dyn Connection,
    registry: Arc<TypeRegistry>,
    options: LoadOptions,
    columns: HashMap<String, Vec<Column>>,
}

impl<'c> Loader<'c> {
    pub fn new(conn: &'c mut dyn Connection, registry: Arc<TypeRegistry>, options: LoadOptions) -> Self {
        Self {
            conn,
            registry,
            options,
            columns: HashMap::new(),
        }
    }

    /// Load one document or stream.
    pub async fn load_from_reader<'r, R>(&mut self, format: Format, reader: R) -> Result<LoadStats>
    where
        R: Read + Send + 'r,
    {
        info!("Loading {} document", format);
        let decoder = format.decoder(Arc::clone(&self.registry));

        self.conn.begin_transaction().await?;
        let mut stats = LoadStats::default();
        let result = match self.prepare().await {
            Ok(()) => match decoder.units(Box::new(reader), None) {
                Ok(units) => self.apply(format, units, &mut stats).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        self.finish(result).await?;

        info!("Load complete: {} tables, {} rows", stats.tables, stats.rows);
        Ok(stats)
    }

    /// Load every non-hidden file of a directory, in lexical order, as one
    /// transaction. Each file's stem names its table for formats that do not
    /// carry table names.
    pub async fn load_from_dir(&mut self, format: Format, dir: &Path) -> Result<LoadStats> {
        let files = dump_files(dir)?;
        info!("Loading {} {} files from {}", files.len(), format, dir.display());

        self.conn.begin_transaction().await?;
        let mut stats = LoadStats::default();
        let result = match self.prepare().await {
            Ok(()) => self.apply_files(format, &files, &mut stats).await,
            Err(e) => Err(e),
        };
        self.finish(result).await?;

        info!("Load complete: {} tables, {} rows", stats.tables, stats.rows);
        Ok(stats)
    }

    async fn apply_files(&mut self, format: Format, files: &[PathBuf], stats: &mut LoadStats) -> Result<()> {
        let decoder = format.decoder(Arc::clone(&self.registry));
        for path in files {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            debug!("Reading {}", path.display());
            let reader = BufReader::new(File::open(path)?);
            let units = decoder.units(Box::new(reader), Some(&stem))?;
            self.apply(format, units, stats).await?;
        }
        Ok(())
    }

    fn is_reserved(&self, table: &str) -> bool {
        self.options.reserved_tables.iter().any(|t| t == table)
    }

    /// Defer FK checks and truncate, inside the open transaction.
    async fn prepare(&mut self) -> Result<()> {
        let tables: Vec<String> = self
            .conn
            .list_tables()
            .await?
            .into_iter()
            .filter(|t| !self.is_reserved(t))
            .collect();

        if self.conn.dialect().supports_deferred_fk() {
            let mut foreign_keys = Vec::new();
            for table in &tables {
                for fk in self.conn.foreign_keys(table).await? {
                    foreign_keys.push((table.clone(), fk));
                }
            }
            debug!("Deferring {} foreign keys", foreign_keys.len());
            let statements = self.conn.dialect().build_defer_fk(&foreign_keys);
            self.execute_all(&statements).await?;
        }

        if self.options.truncate {
            info!("Truncating {} tables", tables.len());
            let statements = self.conn.dialect().build_truncate(&tables);
            self.execute_all(&statements).await?;
        }
        Ok(())
    }

    async fn execute_all(&mut self, statements: &[String]) -> Result<()> {
        for sql in statements {
            self.conn.execute(sql).await?;
        }
        Ok(())
    }

    async fn apply(&mut self, format: Format, units: TableUnits<'_>, stats: &mut LoadStats) -> Result<()> {
        // Table whose units are currently arriving, with its row total
        let mut current: Option<(String, u64)> = None;

        for unit in units {
            let unit = unit?;
            if self.is_reserved(&unit.name) {
                debug!("Skipping reserved table: {}", unit.name);
                continue;
            }
            if unit.columns.is_empty() {
                debug!("Skipping {}: no columns", unit.name);
                continue;
            }

            if current.as_ref().map(|(name, _)| name) != Some(&unit.name) {
                if let Some((name, rows)) = current.take() {
                    self.finish_table(&name, rows).await?;
                }
                current = Some((unit.name.clone(), 0));
                stats.tables += 1;
            }

            let inserted = self.insert_unit(&unit, format, stats).await?;
            if let Some((_, rows)) = current.as_mut() {
                *rows += inserted;
            }
        }

        if let Some((name, rows)) = current {
            self.finish_table(&name, rows).await?;
        }
        Ok(())
    }

    async fn finish_table(&mut self, table: &str, rows: u64) -> Result<()> {
        if self.conn.dialect().supports_sequence_reset() {
            self.conn.reset_pk_sequence(table).await?;
        }
        info!("{}: {} rows loaded", table, rows);
        Ok(())
    }

    async fn insert_unit(&mut self, unit: &TableUnit, format: Format, stats: &mut LoadStats) -> Result<u64> {
        if !self.columns.contains_key(&unit.name) {
            let columns = self.conn.columns(&unit.name).await?;
            self.columns.insert(unit.name.clone(), columns);
        }

        let width = unit.columns.len();
        let mut inserted = 0u64;
        for chunk in unit.rows.chunks(self.options.page_size.max(1)) {
            let sql = {
                let known = self.columns.get(&unit.name).map(Vec::as_slice).unwrap_or_default();
                let targets: Vec<Option<&Column>> = unit
                    .columns
                    .iter()
                    .map(|name| known.iter().find(|c| &c.name == name))
                    .collect();

                let mut tuples = Vec::with_capacity(chunk.len());
                for row in chunk {
                    if row.len() != width {
                        return Err(DumpError::load(
                            &unit.name,
                            format!("row has {} values, expected {}", row.len(), width),
                        ));
                    }
                    let values = row
                        .iter()
                        .zip(&targets)
                        .map(|(value, column)| match column {
                            // Tree formats decode a json string document as plain text
                            Some(c)
                                if c.kind == ColumnKind::Json
                                    && format.keeps_scalar_types()
                                    && matches!(value, SqlValue::Text(_)) =>
                            {
                                self.conn.quote_value(&structured_scalar(value.clone()), *column)
                            }
                            _ => self.conn.quote_value(value, *column),
                        })
                        .collect::<Result<Vec<_>>>()?;
                    tuples.push(format!("({})", values.join(", ")));
                }
                self.conn.dialect().build_insert(&unit.name, &unit.columns, &tuples)
            };

            self.conn.execute(&sql).await?;
            stats.batches += 1;
            stats.rows += chunk.len() as u64;
            inserted += chunk.len() as u64;
        }
        Ok(inserted)
    }

    async fn restore_fk(&mut self) -> Result<()> {
        if !self.conn.dialect().supports_deferred_fk() {
            return Ok(());
        }
        let statements = self.conn.dialect().build_restore_fk();
        self.execute_all(&statements).await
    }

    /// Commit on success; otherwise roll back and return the original error.
    async fn finish(&mut self, result: Result<()>) -> Result<()> {
        let error = match result {
            Ok(()) => match self.restore_fk().await {
                Ok(()) => return self.conn.commit().await,
                Err(e) => e,
            },
            Err(e) => {
                if let Err(restore) = self.restore_fk().await {
                    warn!("Failed to restore foreign key checks: {}", restore);
                }
                e
            }
        };

        warn!("Load failed, rolling back: {}", error);
        if let Err(rollback) = self.conn.rollback().await {
            warn!("Rollback failed: {}", rollback);
        }
        Err(error)
    }
}

/// Non-hidden regular files of `dir`, sorted by name.
fn dump_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::MemoryConnection;
    use crate::core::traits::Backend;
    use crate::core::value::Row;
    use crate::dump::{DumpOptions, Dumper};
    use chrono::{DateTime, NaiveDate, NaiveTime, FixedOffset};
    use rust_decimal::Decimal;
    use std::io::Cursor;
    use std::str::FromStr;

    fn registry() -> Arc<TypeRegistry> {
        Arc::new(TypeRegistry::builtin())
    }

    fn int_rows(rows: impl IntoIterator<Item = (i64, i64)>) -> Vec<Row> {
        rows.into_iter()
            .map(|(a, b)| vec![SqlValue::Int(a), SqlValue::Int(b)])
            .collect()
    }

    fn target(backend: Backend) -> MemoryConnection {
        MemoryConnection::new(backend)
            .with_table("a", &[("id", "int4"), ("n", "int4")], int_rows([(100, 100)]))
            .with_table("b", &[("id", "int4"), ("a_id", "int4")], Vec::new())
            .with_table("ar_internal_metadata", &[("key", "varchar")], vec![vec![SqlValue::Text("keep".into())]])
            .with_foreign_key("b", "fk_b_a")
    }

    async fn dump(conn: &mut MemoryConnection, format: Format) -> Vec<u8> {
        let mut out = Vec::new();
        Dumper::new(conn, registry(), DumpOptions::default())
            .dump_to_writer(format, &mut out)
            .await
            .unwrap();
        out
    }

    async fn load(conn: &mut MemoryConnection, format: Format, bytes: Vec<u8>) -> Result<LoadStats> {
        Loader::new(conn, registry(), LoadOptions::default())
            .load_from_reader(format, Cursor::new(bytes))
            .await
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order_across_pages() {
        let rows = int_rows((0..1001).map(|i| (i, 1000 - i)));
        let mut source = MemoryConnection::new(Backend::Postgres).with_table(
            "mytable",
            &[("a", "int4"), ("b", "int4")],
            rows.iter().rev().cloned().collect(),
        );
        let mut dest = MemoryConnection::new(Backend::Postgres).with_table(
            "mytable",
            &[("a", "int4"), ("b", "int4")],
            Vec::new(),
        );

        for format in [Format::Json, Format::MsgPack, Format::Yaml] {
            let bytes = dump(&mut source, format).await;
            let stats = load(&mut dest, format, bytes).await.unwrap();
            assert_eq!(stats.rows, 1001, "{}", format);
            assert_eq!(stats.batches, 2, "{}", format);
            assert_eq!(dest.rows("mytable"), rows, "{}", format);
        }
        assert_eq!(dest.sequence_resets, vec!["mytable"; 3]);
    }

    #[tokio::test]
    async fn test_custom_scalars_round_trip() {
        let columns = [
            ("id", "int4"),
            ("at", "timestamptz"),
            ("day", "date"),
            ("clock", "timetz"),
            ("price", "numeric"),
        ];
        let row = vec![
            SqlValue::Int(1),
            SqlValue::Timestamp(DateTime::parse_from_rfc3339("2014-01-01T12:20:00.25+01:00").unwrap()),
            SqlValue::Date(NaiveDate::from_ymd_opt(2014, 1, 1).unwrap()),
            SqlValue::Time(
                NaiveTime::from_hms_opt(12, 20, 0).unwrap(),
                FixedOffset::east_opt(0).unwrap(),
            ),
            SqlValue::Decimal(Decimal::from_str("1234.56").unwrap()),
        ];

        for format in [Format::Json, Format::MsgPack] {
            let mut source = MemoryConnection::new(Backend::Postgres).with_table("t", &columns, vec![row.clone()]);
            let mut dest = MemoryConnection::new(Backend::Postgres).with_table("t", &columns, Vec::new());
            let bytes = dump(&mut source, format).await;
            load(&mut dest, format, bytes).await.unwrap();
            assert_eq!(dest.rows("t"), vec![row.clone()], "{}", format);
        }
    }

    #[tokio::test]
    async fn test_postgres_defers_and_truncates() {
        let mut conn = target(Backend::Postgres);
        let doc = br#"{"b":{"columns":["id","a_id"],"records":[[1,7]]},"a":{"columns":["id","n"],"records":[[7,0]]}}"#;
        let stats = load(&mut conn, Format::Json, doc.to_vec()).await.unwrap();

        assert_eq!(stats.tables, 2);
        assert_eq!(
            conn.executed[..4],
            [
                "BEGIN",
                r#"ALTER TABLE "b" ALTER CONSTRAINT "fk_b_a" DEFERRABLE INITIALLY IMMEDIATE"#,
                "SET CONSTRAINTS ALL DEFERRED",
                r#"TRUNCATE "a","b" CASCADE"#,
            ]
        );
        assert_eq!(conn.executed.last().map(String::as_str), Some("COMMIT"));
        assert_eq!(conn.rows("a"), int_rows([(7, 0)]));
        assert_eq!(conn.rows("b"), int_rows([(1, 7)]));
        assert_eq!(conn.sequence_resets, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_mysql_disables_fk_checks() {
        let mut conn = target(Backend::Mysql);
        let doc = br#"{"a":{"columns":["id","n"],"records":[[1,2]]}}"#;
        load(&mut conn, Format::Json, doc.to_vec()).await.unwrap();

        assert_eq!(
            conn.executed,
            vec![
                "BEGIN",
                "SET foreign_key_checks = 0",
                "DELETE FROM `a`",
                "DELETE FROM `b`",
                "INSERT INTO `a` (`id`,`n`) VALUES (1, 2)",
                "SET foreign_key_checks = 1",
                "COMMIT",
            ]
        );
        assert!(conn.sequence_resets.is_empty());
    }

    #[tokio::test]
    async fn test_reserved_and_columnless_tables_are_skipped() {
        let mut conn = target(Backend::Postgres);
        let doc = br#"{"ar_internal_metadata":{"columns":["key"],"records":[["x"]]},"b":{"records":[[1,2]]}}"#;
        let stats = load(&mut conn, Format::Json, doc.to_vec()).await.unwrap();

        assert_eq!(stats, LoadStats::default());
        assert_eq!(conn.rows("ar_internal_metadata"), vec![vec![SqlValue::Text("keep".into())]]);
        assert!(conn.statements("INSERT").is_empty());
        assert!(conn.statements("TRUNCATE").iter().all(|s| !s.contains("ar_internal_metadata")));
    }

    #[tokio::test]
    async fn test_no_truncate_appends() {
        let mut conn = target(Backend::Postgres);
        let options = LoadOptions {
            truncate: false,
            ..LoadOptions::default()
        };
        Loader::new(&mut conn, registry(), options)
            .load_from_reader(Format::Json, Cursor::new(br#"{"a":{"columns":["id","n"],"records":[[1,1]]}}"#.to_vec()))
            .await
            .unwrap();
        assert!(conn.statements("TRUNCATE").is_empty());
        assert_eq!(conn.rows("a"), int_rows([(100, 100), (1, 1)]));
    }

    #[tokio::test]
    async fn test_header_missing_rolls_back() {
        let mut conn = target(Backend::Postgres);
        let mut bytes = Vec::new();
        rmpv::encode::write_value(
            &mut bytes,
            &rmpv::Value::Array(vec![rmpv::Value::Array(vec![rmpv::Value::from(1), rmpv::Value::from(2)])]),
        )
        .unwrap();

        let err = load(&mut conn, Format::MsgPack, bytes).await.unwrap_err();
        assert!(matches!(err, DumpError::HeaderMissing));
        assert_eq!(conn.executed.last().map(String::as_str), Some("ROLLBACK"));
        assert_eq!(conn.rows("a"), int_rows([(100, 100)]));
        assert!(conn.statements("INSERT").is_empty());
    }

    #[tokio::test]
    async fn test_failure_mid_load_rolls_back_everything() {
        let mut conn = target(Backend::Mysql).fail_on("INSERT INTO `b`");
        let doc = br#"{"a":{"columns":["id","n"],"records":[[1,1]]},"b":{"columns":["id","a_id"],"records":[[1,1]]}}"#;
        let err = load(&mut conn, Format::Json, doc.to_vec()).await.unwrap_err();

        assert!(matches!(err, DumpError::Connection { .. }));
        assert_eq!(conn.rows("a"), int_rows([(100, 100)]));
        assert!(conn.rows("b").is_empty());
        let tail: Vec<&str> = conn.executed.iter().rev().take(2).map(String::as_str).collect();
        assert_eq!(tail, vec!["ROLLBACK", "SET foreign_key_checks = 1"]);
    }

    #[tokio::test]
    async fn test_row_width_mismatch() {
        let mut conn = target(Backend::Postgres);
        let doc = br#"{"a":{"columns":["id","n"],"records":[[1]]}}"#;
        let err = load(&mut conn, Format::Json, doc.to_vec()).await.unwrap_err();
        assert!(matches!(err, DumpError::Load { ref table, .. } if table == "a"));
    }

    #[tokio::test]
    async fn test_directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = MemoryConnection::new(Backend::Postgres)
            .with_table("a", &[("id", "int4"), ("n", "int4")], int_rows([(2, 20), (1, 10)]))
            .with_table("b", &[("id", "int4"), ("a_id", "int4")], int_rows([(5, 1)]));
        Dumper::new(&mut source, registry(), DumpOptions::default())
            .dump_to_dir(Format::Csv, dir.path())
            .await
            .unwrap();
        fs::write(dir.path().join(".hidden"), "junk").unwrap();

        let mut dest = target(Backend::Postgres);
        let stats = Loader::new(&mut dest, registry(), LoadOptions::default())
            .load_from_dir(Format::Csv, dir.path())
            .await
            .unwrap();

        assert_eq!(stats.tables, 2);
        assert_eq!(dest.rows("a"), int_rows([(1, 10), (2, 20)]));
        assert_eq!(dest.rows("b"), int_rows([(5, 1)]));
        assert_eq!(dest.statements("BEGIN").len(), 1);
    }

    #[tokio::test]
    async fn test_json_scalar_documents_round_trip() {
        let columns = [("id", "int4"), ("doc", "jsonb")];
        let rows = vec![
            vec![SqlValue::Int(1), SqlValue::Json(serde_json::json!("hello"))],
            vec![SqlValue::Int(2), SqlValue::Json(serde_json::json!(5))],
            vec![SqlValue::Int(3), SqlValue::Json(serde_json::json!(true))],
            vec![SqlValue::Int(4), SqlValue::Json(serde_json::json!({"k": [1, 2]}))],
            vec![SqlValue::Int(5), SqlValue::Null],
        ];

        for format in [Format::Json, Format::MsgPack, Format::Yaml, Format::Csv] {
            let mut source = MemoryConnection::new(Backend::Postgres).with_table("docs", &columns, rows.clone());
            let mut dest = MemoryConnection::new(Backend::Postgres).with_table("docs", &columns, Vec::new());
            let bytes = dump(&mut source, format).await;
            load(&mut dest, format, bytes).await.unwrap();
            assert_eq!(dest.rows("docs"), rows, "{}", format);
        }
    }

    #[tokio::test]
    async fn test_unsupported_backend_only_inserts() {
        let mut conn = target(Backend::Unsupported);
        let doc = br#"{"b":{"columns":["id","a_id"],"records":[[1,7]]},"a":{"columns":["id","n"],"records":[[7,0]]}}"#;
        let stats = load(&mut conn, Format::Json, doc.to_vec()).await.unwrap();

        assert_eq!(stats.tables, 2);
        assert_eq!(
            conn.executed,
            vec![
                "BEGIN",
                r#"INSERT INTO "b" ("id","a_id") VALUES (1, 7)"#,
                r#"INSERT INTO "a" ("id","n") VALUES (7, 0)"#,
                "COMMIT",
            ]
        );
        // Nothing truncated: existing rows stay
        assert_eq!(conn.rows("a"), int_rows([(100, 100), (7, 0)]));
        assert_eq!(conn.rows("b"), int_rows([(1, 7)]));
        assert!(conn.sequence_resets.is_empty());
    }
}
