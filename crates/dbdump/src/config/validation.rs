//! Configuration validation.

use super::Config;
use crate::core::traits::Backend;
use crate::drivers::common::SslMode;
use crate::error::{DumpError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let db = &config.database;
    if db.host.is_empty() {
        return Err(DumpError::Config("database.host is required".into()));
    }
    if db.database.is_empty() {
        return Err(DumpError::Config("database.database is required".into()));
    }
    if db.user.is_empty() {
        return Err(DumpError::Config("database.user is required".into()));
    }
    if db.backend() == Backend::Unsupported {
        return Err(DumpError::Config(format!(
            "database.type must be 'postgres' or 'mysql', got '{}'",
            db.r#type
        )));
    }
    db.ssl_mode.parse::<SslMode>()?;

    if config.dump.page_size == 0 {
        return Err(DumpError::Config("dump.page_size must be at least 1".into()));
    }

    Ok(())
}
