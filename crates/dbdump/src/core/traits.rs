//! Core traits for database-agnostic dump and restore.
//!
//! - [`Connection`]: the access layer the engine reads from and writes to
//! - [`Dialect`]: SQL syntax and capability flags for one backend
//!
//! Backend-specific behavior is selected once, when a connection is built,
//! through the [`Dialect`] it exposes. The engine never inspects the concrete
//! connection type.

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;

use super::schema::{names_of_kind, Column, ColumnKind};
use super::value::{RawRow, SqlValue};

/// Backend family of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// PostgreSQL and wire-compatible servers.
    Postgres,
    /// MySQL and MariaDB.
    Mysql,
    /// Anything else: no truncation, no FK deferral, no sequence reset.
    Unsupported,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Postgres => write!(f, "postgres"),
            Backend::Mysql => write!(f, "mysql"),
            Backend::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// SQL syntax strategy and capability flags for one backend.
///
/// This is a **Strategy** pattern: each backend provides interchangeable
/// quoting and statement-building rules, and advertises which restore-time
/// safety features it can provide.
pub trait Dialect: Send + Sync {
    /// Dialect identifier (e.g. "postgres", "mysql").
    fn name(&self) -> &str;

    /// Backend family.
    fn backend(&self) -> Backend;

    /// Quote an identifier (table or column name).
    fn quote_ident(&self, name: &str) -> String;

    /// Render a value as a SQL literal suitable for the given column.
    ///
    /// `column` is `None` when the target table has no column by that name;
    /// the literal is then rendered from the value alone.
    fn quote_value(&self, value: &SqlValue, column: Option<&Column>) -> Result<String>;

    /// A single statement can truncate many tables with CASCADE.
    fn supports_cascading_truncate(&self) -> bool;

    /// Foreign-key checks can be postponed until commit (or switched off).
    fn supports_deferred_fk(&self) -> bool;

    /// Primary-key sequences can be moved past the loaded rows.
    fn supports_sequence_reset(&self) -> bool;

    /// `SELECT COUNT(*)` for a table.
    fn build_count_query(&self, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", self.quote_ident(table))
    }

    /// Select one page of a table, ordered by the sort key.
    ///
    /// `select` holds ready-made select-list expressions; empty selects `*`.
    fn build_page_query(
        &self,
        table: &str,
        select: &[String],
        sort_key: &[String],
        offset: u64,
        limit: usize,
    ) -> String {
        let order = sort_key
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let list = if select.is_empty() {
            "*".to_string()
        } else {
            select.join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", list, self.quote_ident(table));
        if !order.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", order));
        }
        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset));
        sql
    }

    /// Statements that empty every given table.
    ///
    /// Returns nothing for backends that cannot truncate.
    fn build_truncate(&self, tables: &[String]) -> Vec<String>;

    /// Statements that put FK checks into deferred mode.
    ///
    /// `foreign_keys` lists `(table, constraint)` pairs of the target database.
    fn build_defer_fk(&self, foreign_keys: &[(String, String)]) -> Vec<String>;

    /// Statements that re-enable FK checks before commit.
    fn build_restore_fk(&self) -> Vec<String>;

    /// Multi-row INSERT from already-quoted row literals (`(v1, v2, ...)`).
    fn build_insert(&self, table: &str, columns: &[String], rows: &[String]) -> String {
        let cols = columns
            .iter()
            .map(|c| self.quote_ident(c))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.quote_ident(table),
            cols,
            rows.join(", ")
        )
    }
}

/// Access-layer collaborator: one open connection to one database.
///
/// A connection is exclusively owned by the single dump or load operation
/// using it. All calls are awaited strictly in sequence.
#[async_trait]
pub trait Connection: Send {
    /// SQL dialect and capabilities, fixed at construction.
    fn dialect(&self) -> &dyn Dialect;

    /// Table names in a stable order.
    async fn list_tables(&mut self) -> Result<Vec<String>>;

    /// Column metadata in table order.
    async fn columns(&mut self, table: &str) -> Result<Vec<Column>>;

    /// Total row count of a table.
    async fn row_count(&mut self, table: &str) -> Result<u64>;

    /// Fetch one page of raw rows, ordered by `sort_key`.
    async fn select_page(
        &mut self,
        table: &str,
        sort_key: &[String],
        offset: u64,
        limit: usize,
    ) -> Result<Vec<RawRow>>;

    /// Foreign-key constraint names declared on a table.
    async fn foreign_keys(&mut self, table: &str) -> Result<Vec<String>>;

    /// Execute a statement, returning affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Open a transaction.
    async fn begin_transaction(&mut self) -> Result<()>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Move the table's primary-key sequence past its current maximum.
    async fn reset_pk_sequence(&mut self, table: &str) -> Result<()>;

    /// Quote an identifier with the connection's dialect.
    fn quote_identifier(&self, name: &str) -> String {
        self.dialect().quote_ident(name)
    }

    /// Quote a value with the connection's dialect.
    fn quote_value(&self, value: &SqlValue, column: Option<&Column>) -> Result<String> {
        self.dialect().quote_value(value, column)
    }

    /// Names of the table's boolean columns.
    async fn boolean_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let columns = self.columns(table).await?;
        Ok(names_of_kind(&columns, ColumnKind::Boolean))
    }

    /// Names of the table's structured (json) columns.
    async fn structured_columns(&mut self, table: &str) -> Result<Vec<String>> {
        let columns = self.columns(table).await?;
        Ok(names_of_kind(&columns, ColumnKind::Json))
    }
}
