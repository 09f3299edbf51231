//! Common utilities shared across database drivers.
//!
//! - [`tls`]: TLS configuration for PostgreSQL connections
//! - literal helpers used by every dialect's `quote_value`

#[cfg(feature = "postgres")]
pub mod tls;

#[cfg(feature = "postgres")]
pub use tls::TlsBuilder;

use std::str::FromStr;

use crate::core::schema::ColumnKind;
use crate::core::value::SqlValue;
use crate::normalize::structured_scalar;
use crate::error::{DumpError, Result};

/// SSL verification modes, matching PostgreSQL's `sslmode` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// TLS without certificate verification.
    Require,
    /// TLS, certificate checked against the CA roots.
    VerifyCa,
    /// TLS, certificate and hostname checked.
    VerifyFull,
}

impl SslMode {
    /// Check if this mode requires TLS.
    pub fn requires_tls(&self) -> bool {
        !matches!(self, SslMode::Disable)
    }
}

impl FromStr for SslMode {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "disable" | "" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(DumpError::Config(format!(
                "Invalid ssl_mode '{}'. Valid values: disable, require, verify-ca, verify-full",
                other
            ))),
        }
    }
}

/// Single-quote a string literal.
///
/// Quotes are doubled; with `escape_backslash` backslashes are doubled too
/// (MySQL treats `\` as an escape character inside literals).
pub(crate) fn quote_string(s: &str, escape_backslash: bool) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' if escape_backslash => out.push_str("\\\\"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// Render a float literal.
///
/// Non-finite values become quoted `'NaN'`/`'Infinity'` where the backend
/// accepts them, and an error otherwise.
pub(crate) fn render_float(f: f64, allow_special: bool) -> Result<String> {
    if f.is_finite() {
        return Ok(f.to_string());
    }
    if !allow_special {
        return Err(DumpError::Conversion(format!(
            "float value {} cannot be represented as a SQL literal",
            f
        )));
    }
    let text = if f.is_nan() {
        "'NaN'"
    } else if f.is_sign_positive() {
        "'Infinity'"
    } else {
        "'-Infinity'"
    };
    Ok(text.to_string())
}

/// Cross-render booleans and integers when the target column disagrees
/// with the value's own kind. Returns `None` when no coercion applies.
pub(crate) fn render_bool_for(value: &SqlValue, kind: Option<ColumnKind>) -> Option<String> {
    match (value, kind) {
        (SqlValue::Int(i), Some(ColumnKind::Boolean)) => {
            Some(if *i != 0 { "TRUE" } else { "FALSE" }.to_string())
        }
        (SqlValue::Bool(b), Some(ColumnKind::Integer)) => {
            Some(if *b { "1" } else { "0" }.to_string())
        }
        _ => None,
    }
}

/// JSON form of a non-text scalar bound for a json column.
///
/// Text is left alone: it is either a string already wrapped by the loader
/// or a text-format dump's verbatim JSON.
pub(crate) fn json_scalar_for(value: &SqlValue, kind: Option<ColumnKind>) -> Option<serde_json::Value> {
    if kind != Some(ColumnKind::Json) {
        return None;
    }
    match value {
        SqlValue::Bool(_) | SqlValue::Int(_) | SqlValue::Float(_) | SqlValue::Decimal(_) => {
            match structured_scalar(value.clone()) {
                SqlValue::Json(json) => Some(json),
                _ => None,
            }
        }
        _ => None,
    }
}
