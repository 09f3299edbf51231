//! MySQL/MariaDB database driver.
//!
//! - [`MysqlDialect`]: SQL syntax strategy
//! - [`MysqlConnection`]: access layer (requires the `mysql` feature)
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

#[cfg(feature = "mysql")]
mod connection;
mod dialect;

#[cfg(feature = "mysql")]
pub use connection::MysqlConnection;
pub use dialect::MysqlDialect;
