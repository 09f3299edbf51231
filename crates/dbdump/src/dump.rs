//! Dump driver.
//!
//! Walks every table of the source connection page by page and feeds the
//! pages to a format [`Encoder`], either into one combined document or into
//! one file per table. Memory use stays bounded to one page of rows.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::{default_page_size, default_reserved_tables, DumpConfig};
use crate::core::traits::Connection;
use crate::error::{DumpError, Result};
use crate::format::{Encoder, Format, OutputMode};
use crate::paginate::TablePaginator;
use crate::typemap::TypeRegistry;

/// Dump tuning.
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// Rows fetched and encoded per page.
    pub page_size: usize,

    /// Tables that are never dumped.
    pub reserved_tables: Vec<String>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            reserved_tables: default_reserved_tables(),
        }
    }
}

impl From<&DumpConfig> for DumpOptions {
    fn from(config: &DumpConfig) -> Self {
        Self {
            page_size: config.page_size,
            reserved_tables: config.reserved_tables.clone(),
        }
    }
}

/// Counters for one dump run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpStats {
    /// Tables written.
    pub tables: usize,
    /// Rows written across all tables.
    pub rows: u64,
    /// Tables skipped because they had no rows.
    pub skipped_empty: usize,
}

/// Dumps every table of a connection.
pub struct Dumper<'c> {
    conn: &'c mut dyn Connection,
    registry: Arc<TypeRegistry>,
    options: DumpOptions,
}

impl<'c> Dumper<'c> {
    pub fn new(conn: &'c mut dyn Connection, registry: Arc<TypeRegistry>, options: DumpOptions) -> Self {
        Self {
            conn,
            registry,
            options,
        }
    }

    async fn tables(&mut self) -> Result<Vec<String>> {
        let tables = self.conn.list_tables().await?;
        Ok(tables
            .into_iter()
            .filter(|t| !self.options.reserved_tables.contains(t))
            .collect())
    }

    /// Write all tables into one combined document.
    pub async fn dump_to_writer(&mut self, format: Format, out: &mut dyn Write) -> Result<DumpStats> {
        let tables = self.tables().await?;
        info!("Dumping {} tables as {}", tables.len(), format);

        let mut encoder = format.encoder(Arc::clone(&self.registry), OutputMode::Combined);
        let mut stats = DumpStats::default();

        encoder.begin(out)?;
        for table in &tables {
            let mut pager = TablePaginator::new(&mut *self.conn, table, self.options.page_size).await?;
            if pager.table().is_empty() {
                debug!("Skipping empty table: {}", table);
                stats.skipped_empty += 1;
                continue;
            }
            stats.rows += write_table(encoder.as_mut(), out, &mut pager).await?;
            stats.tables += 1;
        }
        encoder.end(out)?;

        info!(
            "Dump complete: {} tables, {} rows, {} empty tables skipped",
            stats.tables, stats.rows, stats.skipped_empty
        );
        Ok(stats)
    }

    /// Write one standalone `<table>.<ext>` file per non-empty table.
    pub async fn dump_to_dir(&mut self, format: Format, dir: &Path) -> Result<DumpStats> {
        if dir.exists() && !dir.is_dir() {
            return Err(DumpError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} exists and is not a directory", dir.display()),
            )));
        }
        fs::create_dir_all(dir)?;

        let tables = self.tables().await?;
        info!("Dumping {} tables as {} into {}", tables.len(), format, dir.display());

        let mut stats = DumpStats::default();
        for table in &tables {
            let mut pager = TablePaginator::new(&mut *self.conn, table, self.options.page_size).await?;
            if pager.table().is_empty() {
                debug!("Skipping empty table: {}", table);
                stats.skipped_empty += 1;
                continue;
            }

            let path = dir.join(format!("{}.{}", table, format.extension()));
            let mut out = BufWriter::new(File::create(&path)?);
            let mut encoder = format.encoder(Arc::clone(&self.registry), OutputMode::PerTable);

            encoder.begin(&mut out)?;
            stats.rows += write_table(encoder.as_mut(), &mut out, &mut pager).await?;
            encoder.end(&mut out)?;
            out.flush()?;

            stats.tables += 1;
        }

        info!(
            "Dump complete: {} files, {} rows, {} empty tables skipped",
            stats.tables, stats.rows, stats.skipped_empty
        );
        Ok(stats)
    }
}

/// Encode one non-empty table; returns the number of rows written.
async fn write_table(
    encoder: &mut dyn Encoder,
    out: &mut dyn Write,
    pager: &mut TablePaginator<'_>,
) -> Result<u64> {
    let info = pager.table().clone();
    let pages = pager.page_count();

    encoder.table_header(out, &info)?;
    let mut rows = 0u64;
    while let Some(page) = pager.next_page().await? {
        rows += page.len() as u64;
        encoder.table_rows(out, &page)?;
    }
    encoder.table_footer(out, &info)?;

    info!("{}: {} rows in {} pages", info.name, rows, pages);
    Ok(rows)
}
