//! Database driver implementations.
//!
//! - [`postgres`]: PostgreSQL dialect and connection
//! - [`mysql`]: MySQL/MariaDB dialect and connection
//! - [`common`]: shared TLS and literal helpers
//!
//! # Architecture
//!
//! Each driver module provides a `Dialect` (SQL syntax and capability flags)
//! and, behind its feature flag, a `Connection` implementing the access layer.
//! [`connect`] picks the driver once from the configured database type.

pub mod common;
pub mod mysql;
pub mod postgres;

pub use common::SslMode;
pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;

#[cfg(feature = "mysql")]
pub use mysql::MysqlConnection;
#[cfg(feature = "postgres")]
pub use postgres::PostgresConnection;

use crate::config::DatabaseConfig;
use crate::core::schema::Column;
use crate::core::traits::{Backend, Connection, Dialect};
use crate::core::value::SqlValue;
use crate::error::{DumpError, Result};

use common::{quote_string, render_float};

/// Fallback dialect for backends without restore-time safety features.
///
/// ANSI identifier quoting; truncation, FK deferral and sequence reset are
/// all no-ops, so the caller is responsible for table ordering.
#[derive(Debug, Clone, Default)]
pub struct GenericDialect;

impl Dialect for GenericDialect {
    fn name(&self) -> &str {
        "generic"
    }

    fn backend(&self) -> Backend {
        Backend::Unsupported
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn quote_value(&self, value: &SqlValue, column: Option<&Column>) -> Result<String> {
        if let Some(json) = common::json_scalar_for(value, column.map(|c| c.kind)) {
            return self.quote_value(&SqlValue::Json(json), column);
        }
        let literal = match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => render_float(*f, false)?,
            SqlValue::Text(s) => quote_string(s, false),
            SqlValue::Bytes(b) => format!("X'{}'", hex::encode(b)),
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::Timestamp(ts) => format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.f%:z")),
            SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            SqlValue::Time(t, _) => format!("'{}'", t.format("%H:%M:%S%.f")),
            SqlValue::Json(v) => quote_string(&v.to_string(), false),
        };
        Ok(literal)
    }

    fn supports_cascading_truncate(&self) -> bool {
        false
    }

    fn supports_deferred_fk(&self) -> bool {
        false
    }

    fn supports_sequence_reset(&self) -> bool {
        false
    }

    fn build_truncate(&self, _tables: &[String]) -> Vec<String> {
        Vec::new()
    }

    fn build_defer_fk(&self, _foreign_keys: &[(String, String)]) -> Vec<String> {
        Vec::new()
    }

    fn build_restore_fk(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Enum-based static dispatch for dialects.
///
/// Every call goes through `dispatch!`, which expands to a match over the
/// variants instead of a vtable lookup.
#[derive(Debug, Clone)]
pub enum DialectImpl {
    Postgres(PostgresDialect),
    Mysql(MysqlDialect),
    Generic(GenericDialect),
}

macro_rules! dispatch {
    ($self:ident, $d:ident => $body:expr) => {
        match $self {
            DialectImpl::Postgres($d) => $body,
            DialectImpl::Mysql($d) => $body,
            DialectImpl::Generic($d) => $body,
        }
    };
}

impl Dialect for DialectImpl {
    fn name(&self) -> &str {
        dispatch!(self, d => d.name())
    }

    fn backend(&self) -> Backend {
        dispatch!(self, d => d.backend())
    }

    fn quote_ident(&self, name: &str) -> String {
        dispatch!(self, d => d.quote_ident(name))
    }

    fn quote_value(&self, value: &SqlValue, column: Option<&Column>) -> Result<String> {
        dispatch!(self, d => d.quote_value(value, column))
    }

    fn supports_cascading_truncate(&self) -> bool {
        dispatch!(self, d => d.supports_cascading_truncate())
    }

    fn supports_deferred_fk(&self) -> bool {
        dispatch!(self, d => d.supports_deferred_fk())
    }

    fn supports_sequence_reset(&self) -> bool {
        dispatch!(self, d => d.supports_sequence_reset())
    }

    fn build_page_query(
        &self,
        table: &str,
        select: &[String],
        sort_key: &[String],
        offset: u64,
        limit: usize,
    ) -> String {
        dispatch!(self, d => d.build_page_query(table, select, sort_key, offset, limit))
    }

    fn build_truncate(&self, tables: &[String]) -> Vec<String> {
        dispatch!(self, d => d.build_truncate(tables))
    }

    fn build_defer_fk(&self, foreign_keys: &[(String, String)]) -> Vec<String> {
        dispatch!(self, d => d.build_defer_fk(foreign_keys))
    }

    fn build_restore_fk(&self) -> Vec<String> {
        dispatch!(self, d => d.build_restore_fk())
    }
}

impl DialectImpl {
    /// Dialect for a backend family.
    pub fn for_backend(backend: Backend) -> Self {
        match backend {
            Backend::Postgres => DialectImpl::Postgres(PostgresDialect::new()),
            Backend::Mysql => DialectImpl::Mysql(MysqlDialect::new()),
            Backend::Unsupported => DialectImpl::Generic(GenericDialect),
        }
    }

    /// Create a dialect implementation from a database type string.
    ///
    /// # Errors
    ///
    /// Returns an error if the database type is not recognized.
    pub fn from_db_type(db_type: &str) -> Result<Self> {
        match db_type.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Self::for_backend(Backend::Postgres)),
            "mysql" | "mariadb" => Ok(Self::for_backend(Backend::Mysql)),
            "generic" => Ok(Self::for_backend(Backend::Unsupported)),
            other => Err(DumpError::Config(format!(
                "Unknown database type: '{}'. Supported types: postgres, mysql",
                other
            ))),
        }
    }
}

/// Open a connection for the configured database.
pub async fn connect(config: &DatabaseConfig) -> Result<Box<dyn Connection>> {
    match config.backend() {
        #[cfg(feature = "postgres")]
        Backend::Postgres => Ok(Box::new(PostgresConnection::connect(config).await?)),
        #[cfg(feature = "mysql")]
        Backend::Mysql => Ok(Box::new(MysqlConnection::connect(config).await?)),
        _ => Err(DumpError::Config(format!(
            "database type '{}' is not available in this build",
            config.r#type
        ))),
    }
}
