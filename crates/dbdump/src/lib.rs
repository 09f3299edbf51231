//! # dbdump
//!
//! Snapshot a relational database into a portable document and restore it.
//!
//! - **Paged extraction**: tables are read in fixed-size pages ordered by a
//!   deterministic sort key, so memory stays bounded to one page
//! - **Four wire formats**: JSON, MessagePack, YAML and CSV, combined into
//!   one document or written as one file per table
//! - **Type fidelity**: timestamps, times, dates and decimals survive the
//!   round trip through a shared type registry
//! - **Transactional restore**: one transaction per load with deferred
//!   foreign keys, truncation and primary-key sequence reset
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dbdump::{connect, Config, Dumper, DumpOptions, TypeRegistry};
//!
//! #[tokio::main]
//! async fn main() -> dbdump::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let mut conn = connect(&config.database).await?;
//!     let registry = Arc::new(TypeRegistry::builtin());
//!     let mut out = std::io::stdout();
//!     let stats = Dumper::new(conn.as_mut(), registry, DumpOptions::from(&config.dump))
//!         .dump_to_writer(config.dump.format, &mut out)
//!         .await?;
//!     eprintln!("dumped {} rows", stats.rows);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod dump;
pub mod error;
pub mod format;
pub mod load;
pub mod normalize;
pub mod paginate;
pub mod typemap;

// Re-exports for convenient access
pub use crate::config::{Config, DatabaseConfig, DumpConfig, LoadConfig};
pub use crate::core::{Backend, Column, ColumnKind, Connection, Dialect, Page, Row, SqlValue, TableInfo, TableUnit};
pub use crate::drivers::{connect, DialectImpl};
pub use crate::dump::{DumpOptions, DumpStats, Dumper};
pub use crate::error::{DumpError, Result};
pub use crate::format::{Format, OutputMode};
pub use crate::load::{LoadOptions, LoadStats, Loader};
pub use crate::normalize::RowNormalizer;
pub use crate::paginate::TablePaginator;
pub use crate::typemap::TypeRegistry;
