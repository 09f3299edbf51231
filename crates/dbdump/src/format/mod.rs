//! Wire formats.
//!
//! Every format provides an [`Encoder`] driven table by table during a dump
//! and a [`Decoder`] that turns an input stream into [`TableUnit`]s.
//!
//! - [`json`]: one tree document, custom scalars as tagged objects
//! - [`msgpack`]: a stream of header and row-batch units with typed extensions
//! - [`yaml`]: one flow document per table
//! - [`csv`]: flat rows, one file per table or a sectioned combined file

pub mod csv;
pub mod json;
pub mod msgpack;
pub mod yaml;

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::schema::{Page, TableInfo, TableUnit};
use crate::error::{DumpError, Result};
use crate::typemap::TypeRegistry;

/// Supported wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,
    #[serde(alias = "mpk", alias = "messagepack")]
    MsgPack,
    #[serde(alias = "yml")]
    Yaml,
    Csv,
}

impl Format {
    /// File extension used in directory mode.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::MsgPack => "mpk",
            Format::Yaml => "yml",
            Format::Csv => "csv",
        }
    }

    /// Whether decoded scalars keep their native types.
    ///
    /// CSV yields text only, and a json column's text is already its JSON.
    pub fn keeps_scalar_types(&self) -> bool {
        !matches!(self, Format::Csv)
    }

    /// Build a fresh encoder.
    pub fn encoder(&self, registry: Arc<TypeRegistry>, mode: OutputMode) -> Box<dyn Encoder> {
        match self {
            Format::Json => Box::new(json::JsonEncoder::new(registry)),
            Format::MsgPack => Box::new(msgpack::MsgPackEncoder::new(registry)),
            Format::Yaml => Box::new(yaml::YamlEncoder::new(registry)),
            Format::Csv => Box::new(csv::CsvEncoder::new(registry, mode)),
        }
    }

    /// Build a decoder.
    pub fn decoder(&self, registry: Arc<TypeRegistry>) -> Box<dyn Decoder> {
        match self {
            Format::Json => Box::new(json::JsonDecoder::new(registry)),
            Format::MsgPack => Box::new(msgpack::MsgPackDecoder::new(registry)),
            Format::Yaml => Box::new(yaml::YamlDecoder::new()),
            Format::Csv => Box::new(csv::CsvDecoder::new()),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Json => "json",
            Format::MsgPack => "msgpack",
            Format::Yaml => "yaml",
            Format::Csv => "csv",
        };
        f.write_str(name)
    }
}

impl FromStr for Format {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Format::Json),
            "msgpack" | "messagepack" | "mpk" => Ok(Format::MsgPack),
            "yaml" | "yml" => Ok(Format::Yaml),
            "csv" => Ok(Format::Csv),
            other => Err(DumpError::UnsupportedFormat(format!(
                "unknown format '{}'. Valid formats: json, msgpack, yaml, csv",
                other
            ))),
        }
    }
}

/// Whether an encoder writes every table into one sink or one sink per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One document holding all tables.
    Combined,
    /// One standalone document per table (directory mode).
    PerTable,
}

/// Streaming dump encoder.
///
/// Call order: `begin`, then for each non-empty table `table_header`,
/// `table_rows` once per page and `table_footer`, then `end`. Tables with
/// zero rows receive no calls at all.
pub trait Encoder {
    fn begin(&mut self, out: &mut dyn Write) -> Result<()>;

    fn table_header(&mut self, out: &mut dyn Write, table: &TableInfo) -> Result<()>;

    fn table_rows(&mut self, out: &mut dyn Write, page: &Page) -> Result<()>;

    fn table_footer(&mut self, out: &mut dyn Write, table: &TableInfo) -> Result<()>;

    fn end(&mut self, out: &mut dyn Write) -> Result<()>;
}

/// Lazily decoded table units.
pub type TableUnits<'r> = Box<dyn Iterator<Item = Result<TableUnit>> + Send + 'r>;

/// Load decoder.
pub trait Decoder {
    /// Decode `input` into table units.
    ///
    /// `name_hint` is the table name implied by a per-table file (its stem);
    /// only formats that do not carry table names use it.
    fn units<'r>(
        &self,
        input: Box<dyn Read + Send + 'r>,
        name_hint: Option<&str>,
    ) -> Result<TableUnits<'r>>;
}
