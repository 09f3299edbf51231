//! Configuration type definitions.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::traits::Backend;
use crate::format::Format;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database connection settings.
    pub database: DatabaseConfig,

    /// Dump behavior.
    #[serde(default)]
    pub dump: DumpConfig,

    /// Load behavior.
    #[serde(default)]
    pub load: LoadConfig,
}

/// Database connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database type: "postgres" or "mysql".
    #[serde(default = "default_db_type")]
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default depends on `type`).
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Schema holding the tables (PostgreSQL only).
    #[serde(default = "default_schema")]
    pub schema: String,

    /// SSL mode: disable, require, verify-ca, verify-full.
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

impl DatabaseConfig {
    /// Backend family named by `type`.
    pub fn backend(&self) -> Backend {
        match self.r#type.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Backend::Postgres,
            "mysql" | "mariadb" => Backend::Mysql,
            _ => Backend::Unsupported,
        }
    }

    /// Configured port, or the backend's standard port.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.backend() {
            Backend::Mysql => 3306,
            _ => 5432,
        })
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Dump configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpConfig {
    /// Wire format for dumps and the default for loads.
    #[serde(default)]
    pub format: Format,

    /// Rows per page (default: 1000).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Internal bookkeeping tables that are never dumped or loaded.
    #[serde(default = "default_reserved_tables")]
    pub reserved_tables: Vec<String>,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            format: Format::default(),
            page_size: default_page_size(),
            reserved_tables: default_reserved_tables(),
        }
    }
}

/// Load configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Empty every table before loading (default: true).
    #[serde(default = "default_true")]
    pub truncate: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self { truncate: true }
    }
}

fn default_db_type() -> String {
    "postgres".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

pub(crate) fn default_page_size() -> usize {
    1000
}

pub(crate) fn default_reserved_tables() -> Vec<String> {
    vec!["ar_internal_metadata".to_string()]
}

fn default_true() -> bool {
    true
}
