//! Error types for the dump/load library.

use thiserror::Error;

/// Main error type for dump and load operations.
#[derive(Error, Debug)]
pub enum DumpError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection could not be established or was lost
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// PostgreSQL driver error
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL driver error
    #[cfg(feature = "mysql")]
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// A row batch appeared in a binary stream before any table header
    #[error("header missing")]
    HeaderMissing,

    /// A custom scalar tag that the type registry does not know
    #[error("Unknown custom type tag: 0x{0:02x}")]
    UnknownTypeTag(i8),

    /// Malformed input document
    #[error("Decode error: {0}")]
    Decode(String),

    /// A table section could not be written as declared
    #[error("Encode error: {0}")]
    Encode(String),

    /// A raw column value could not be normalized
    #[error("Cannot normalize {table}.{column}: {message}")]
    Normalize {
        table: String,
        column: String,
        message: String,
    },

    /// A value has no literal form in the target dialect
    #[error("Value conversion error: {0}")]
    Conversion(String),

    /// Loading a table failed
    #[error("Load failed for table {table}: {message}")]
    Load { table: String, message: String },

    /// The requested format cannot be used in this mode
    #[error("Unsupported format operation: {0}")]
    UnsupportedFormat(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// MessagePack decoding error
    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmpv::decode::Error),

    /// MessagePack encoding error
    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmpv::encode::Error),
}

impl DumpError {
    /// Create a Connection error with context about where it occurred
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        DumpError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Load error
    pub fn load(table: impl Into<String>, message: impl Into<String>) -> Self {
        DumpError::Load {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Decode error
    pub fn decode(message: impl Into<String>) -> Self {
        DumpError::Decode(message.into())
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            DumpError::Config(_) | DumpError::UnsupportedFormat(_) => 2,
            DumpError::Connection { .. } => 3,
            #[cfg(feature = "postgres")]
            DumpError::Postgres(_) => 3,
            #[cfg(feature = "mysql")]
            DumpError::Mysql(_) => 3,
            DumpError::HeaderMissing
            | DumpError::UnknownTypeTag(_)
            | DumpError::Decode(_)
            | DumpError::Json(_)
            | DumpError::Yaml(_)
            | DumpError::Csv(_)
            | DumpError::MsgPackDecode(_) => 4,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for dump/load operations.
pub type Result<T> = std::result::Result<T, DumpError>;
