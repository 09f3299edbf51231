//! MySQL/MariaDB SQL dialect (Strategy pattern).
//!
//! MySQL has no cascading multi-table truncate and no deferrable constraints,
//! so restores empty tables with `DELETE FROM` and switch FK checks off for
//! the session instead.

use crate::core::schema::{Column, ColumnKind};
use crate::core::traits::{Backend, Dialect};
use crate::core::value::SqlValue;
use crate::error::Result;

use super::super::common::{json_scalar_for, quote_string, render_bool_for, render_float};

/// MySQL/MariaDB dialect implementation.
///
/// Compatible with MySQL 5.7+, 8.0+, and MariaDB 10.2+.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Create a new MySQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn backend(&self) -> Backend {
        Backend::Mysql
    }

    fn quote_ident(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn quote_value(&self, value: &SqlValue, column: Option<&Column>) -> Result<String> {
        let kind = column.map(|c| c.kind);
        if let Some(rendered) = render_bool_for(value, kind) {
            return Ok(rendered);
        }
        if let Some(json) = json_scalar_for(value, kind) {
            return self.quote_value(&SqlValue::Json(json), column);
        }

        let literal = match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => render_float(*f, false)?,
            SqlValue::Text(s) => quote_string(s, true),
            SqlValue::Bytes(b) => format!("X'{}'", hex::encode(b)),
            SqlValue::Decimal(d) => d.to_string(),
            // DATETIME carries no zone: keep the wall-clock time as written
            SqlValue::Timestamp(ts) => {
                format!("'{}'", ts.naive_local().format("%Y-%m-%d %H:%M:%S%.f"))
            }
            SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            SqlValue::Time(t, _) => format!("'{}'", t.format("%H:%M:%S%.f")),
            SqlValue::Json(v) => quote_string(&v.to_string(), true),
        };

        // Structured values stored in text columns keep their JSON text
        if matches!(kind, Some(ColumnKind::Json)) && matches!(value, SqlValue::Json(_)) {
            return Ok(format!("CAST({} AS JSON)", literal));
        }
        Ok(literal)
    }

    fn supports_cascading_truncate(&self) -> bool {
        false
    }

    fn supports_deferred_fk(&self) -> bool {
        true
    }

    fn supports_sequence_reset(&self) -> bool {
        false
    }

    fn build_truncate(&self, tables: &[String]) -> Vec<String> {
        // TRUNCATE is DDL in MySQL and would commit the open transaction
        tables
            .iter()
            .map(|t| format!("DELETE FROM {}", self.quote_ident(t)))
            .collect()
    }

    fn build_defer_fk(&self, _foreign_keys: &[(String, String)]) -> Vec<String> {
        vec!["SET foreign_key_checks = 0".to_string()]
    }

    fn build_restore_fk(&self) -> Vec<String> {
        vec!["SET foreign_key_checks = 1".to_string()]
    }
}
