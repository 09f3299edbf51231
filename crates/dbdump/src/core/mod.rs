//! Core abstractions for database-agnostic dump and restore.
//!
//! - [`value`]: the scalar model shared by every wire format
//! - [`schema`]: table, column, page and load-unit metadata
//! - [`traits`]: the access-layer `Connection` and SQL `Dialect` contracts

pub mod schema;
pub mod traits;
pub mod value;

#[cfg(test)]
pub(crate) mod memory;

pub use schema::{Column, ColumnKind, Page, TableInfo, TableUnit};
pub use traits::{Backend, Connection, Dialect};
pub use value::{RawRow, Row, SqlValue};
