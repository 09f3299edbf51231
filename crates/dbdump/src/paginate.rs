//! Table pagination.
//!
//! A [`TablePaginator`] walks one table in fixed-size pages ordered by a
//! deterministic sort key, normalizing each page before handing it out.
//! Only one page of rows is held at a time.

use tracing::{debug, warn};

use crate::core::schema::{Page, TableInfo};
use crate::core::traits::Connection;
use crate::error::Result;
use crate::normalize::RowNormalizer;

/// Suffix marking foreign-key style columns for the join-table heuristic.
const ID_SUFFIX: &str = "_id";

/// Sort key for a table's columns.
///
/// A table with exactly two columns that both end in `_id` looks like a
/// many-to-many join table and sorts by both; anything else sorts by its
/// first column.
pub fn sort_key(columns: &[String]) -> Vec<String> {
    match columns {
        [first, second] if first.ends_with(ID_SUFFIX) && second.ends_with(ID_SUFFIX) => {
            vec![first.clone(), second.clone()]
        }
        [first, ..] => vec![first.clone()],
        [] => Vec::new(),
    }
}

/// Number of pages for `total` rows: `ceil(total / page_size)`.
pub fn page_count(total: u64, page_size: usize) -> u64 {
    let size = page_size.max(1) as u64;
    total.div_ceil(size)
}

/// Fetch metadata for one table: columns, row count and sort key.
pub async fn describe_table(conn: &mut dyn Connection, table: &str) -> Result<TableInfo> {
    let columns = conn.columns(table).await?;
    let row_count = conn.row_count(table).await?;
    let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
    Ok(TableInfo {
        name: table.to_string(),
        sort_key: sort_key(&names),
        columns,
        row_count,
    })
}

/// Lazy, finite page sequence over one table.
///
/// Not restartable: a new paginator re-queries the row count.
pub struct TablePaginator<'c> {
    conn: &'c mut dyn Connection,
    table: TableInfo,
    normalizer: RowNormalizer,
    page_size: usize,
    pages: u64,
    next: u64,
    emitted: u64,
}

impl<'c> TablePaginator<'c> {
    /// Inspect `table` and prepare to page through it.
    pub async fn new(conn: &'c mut dyn Connection, table: &str, page_size: usize) -> Result<Self> {
        let info = describe_table(conn, table).await?;
        let boolean = conn.boolean_columns(table).await?;
        let structured = conn.structured_columns(table).await?;
        let normalizer = RowNormalizer::new(table, info.column_names(), &boolean, &structured);
        let page_size = page_size.max(1);
        let pages = page_count(info.row_count, page_size);

        debug!(
            table,
            rows = info.row_count,
            pages,
            sort_key = ?info.sort_key,
            "paginating table"
        );

        Ok(Self {
            conn,
            table: info,
            normalizer,
            page_size,
            pages,
            next: 0,
            emitted: 0,
        })
    }

    /// Metadata of the table being paged.
    pub fn table(&self) -> &TableInfo {
        &self.table
    }

    /// Total number of pages.
    pub fn page_count(&self) -> u64 {
        self.pages
    }

    /// Fetch and normalize the next page, or `None` once all pages are out.
    ///
    /// Never yields more rows in total than the row count taken up front;
    /// rows inserted behind the paginator are dropped from the last page.
    pub async fn next_page(&mut self) -> Result<Option<Page>> {
        if self.next >= self.pages {
            return Ok(None);
        }
        let index = self.next;
        self.next += 1;

        let raw = self
            .conn
            .select_page(
                &self.table.name,
                &self.table.sort_key,
                index * self.page_size as u64,
                self.page_size,
            )
            .await?;
        let mut rows = self.normalizer.normalize_page(raw)?;

        let remaining = self.table.row_count.saturating_sub(self.emitted);
        if rows.len() as u64 > remaining {
            warn!(
                table = %self.table.name,
                extra = rows.len() as u64 - remaining,
                "table grew while paging, dropping rows past the counted total"
            );
            rows.truncate(remaining as usize);
        }
        self.emitted += rows.len() as u64;

        Ok(Some(Page {
            index,
            rows,
            is_first: index == 0,
            is_last: index + 1 == self.pages,
        }))
    }
}
