//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax strategy for PostgreSQL
//! - [`PostgresConnection`]: access layer (requires the `postgres` feature)

#[cfg(feature = "postgres")]
mod connection;
mod dialect;

#[cfg(feature = "postgres")]
pub use connection::PostgresConnection;
pub use dialect::PostgresDialect;
