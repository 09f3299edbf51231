//! PostgreSQL SQL dialect (Strategy pattern).
//!
//! Provides PostgreSQL-specific identifier quoting, literal rendering and the
//! restore-time statements: cascading truncate and deferrable FK constraints.

use crate::core::schema::{Column, ColumnKind};
use crate::core::traits::{Backend, Dialect};
use crate::core::value::SqlValue;
use crate::error::Result;

use super::super::common::{json_scalar_for, quote_string, render_bool_for, render_float};

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn quote_ident(&self, name: &str) -> String {
        // Embedded double quotes are doubled
        format!("\"{}\"", name.replace('"', "\"\""))
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
            SqlValue::Float(f) => render_float(*f, true)?,
            SqlValue::Text(s) => quote_string(s, false),
            // bytea hex input format
            SqlValue::Bytes(b) => format!("'\\x{}'", hex::encode(b)),
            SqlValue::Decimal(d) => d.to_string(),
            SqlValue::Timestamp(ts) => {
                format!("'{}'", ts.format("%Y-%m-%d %H:%M:%S%.f%:z"))
            }
            SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            SqlValue::Time(t, offset) => match kind {
                Some(ColumnKind::Time) | None => {
                    format!("'{}{}'", t.format("%H:%M:%S%.f"), offset)
                }
                _ => format!("'{}'", t.format("%H:%M:%S%.f")),
            },
            SqlValue::Json(v) => quote_string(&v.to_string(), false),
        };
        Ok(literal)
    }

    fn supports_cascading_truncate(&self) -> bool {
        true
    }

    fn supports_deferred_fk(&self) -> bool {
        true
    }

    fn supports_sequence_reset(&self) -> bool {
        true
    }

    fn build_truncate(&self, tables: &[String]) -> Vec<String> {
        if tables.is_empty() {
            return Vec::new();
        }
        let quoted = tables
            .iter()
            .map(|t| self.quote_ident(t))
            .collect::<Vec<_>>()
            .join(",");
        vec![format!("TRUNCATE {} CASCADE", quoted)]
    }

    fn build_defer_fk(&self, foreign_keys: &[(String, String)]) -> Vec<String> {
        let mut statements: Vec<String> = foreign_keys
            .iter()
            .map(|(table, constraint)| {
                format!(
                    "ALTER TABLE {} ALTER CONSTRAINT {} DEFERRABLE INITIALLY IMMEDIATE",
                    self.quote_ident(table),
                    self.quote_ident(constraint)
                )
            })
            .collect();
        statements.push("SET CONSTRAINTS ALL DEFERRED".to_string());
        statements
    }

    fn build_restore_fk(&self) -> Vec<String> {
        // Deferred constraints are checked by COMMIT itself
        Vec::new()
    }
}
