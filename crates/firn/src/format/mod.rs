//! Format writers: streaming byte producers per storage format.
//!
//! A writer accepts records one at a time, exposes the bytes produced so
//! far for staging, and finalizes into trailing bytes (footers, final
//! blocks) on `finish`. Writers are single-file: rolling a file always
//! means a new writer.

mod avro;
mod bytes_raw;
mod csv;
mod json;
mod parquet;
mod text;

pub use avro::AvroFormatWriter;
pub use bytes_raw::BytesFormatWriter;
pub use csv::CsvFormatWriter;
pub use json::JsonFormatWriter;
pub use parquet::ParquetFormatWriter;
pub use text::TextFormatWriter;

use ::bytes::buf::Writer;
use ::bytes::{BufMut, Bytes, BytesMut};
use snafu::prelude::*;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::data::SchemaRef;
use crate::error::{BufferLockSnafu, FormatError, SchemaRequiredSnafu, UnknownFormatSnafu};
use crate::error::ConfigError;

/// Storage format selected by STOREAS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Avro,
    Parquet,
    Csv,
    CsvWithHeaders,
    Text,
    Bytes,
}

impl Format {
    /// Parse a STOREAS value (case-insensitive).
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_uppercase().as_str() {
            "JSON" => Ok(Format::Json),
            "AVRO" => Ok(Format::Avro),
            "PARQUET" => Ok(Format::Parquet),
            "CSV" => Ok(Format::Csv),
            "CSV_WITHHEADERS" => Ok(Format::CsvWithHeaders),
            "TEXT" => Ok(Format::Text),
            "BYTES" | "BYTES_VALUEONLY" => Ok(Format::Bytes),
            _ => UnknownFormatSnafu { value }.fail(),
        }
    }

    /// File extension for committed objects.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Avro => "avro",
            Format::Parquet => "parquet",
            Format::Csv | Format::CsvWithHeaders => "csv",
            Format::Text => "text",
            Format::Bytes => "bytes",
        }
    }

    /// Open a writer for one file. Columnar formats need the value schema of
    /// the first record.
    pub fn new_writer(
        &self,
        schema: Option<&SchemaRef>,
    ) -> Result<Box<dyn FormatWriter>, FormatError> {
        match self {
            Format::Json => Ok(Box::new(JsonFormatWriter::new())),
            Format::Text => Ok(Box::new(TextFormatWriter::new())),
            Format::Bytes => Ok(Box::new(BytesFormatWriter::new())),
            Format::Csv => Ok(Box::new(CsvFormatWriter::new(false))),
            Format::CsvWithHeaders => Ok(Box::new(CsvFormatWriter::new(true))),
            Format::Avro => {
                let schema = schema.context(SchemaRequiredSnafu { format: *self })?;
                Ok(Box::new(AvroFormatWriter::new(schema)?))
            }
            Format::Parquet => {
                let schema = schema.context(SchemaRequiredSnafu { format: *self })?;
                Ok(Box::new(ParquetFormatWriter::new(schema)?))
            }
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Json => "JSON",
            Format::Avro => "AVRO",
            Format::Parquet => "PARQUET",
            Format::Csv => "CSV",
            Format::CsvWithHeaders => "CSV_WITHHEADERS",
            Format::Text => "TEXT",
            Format::Bytes => "BYTES",
        };
        f.write_str(name)
    }
}

/// Streaming byte producer for one open file.
pub trait FormatWriter: Send {
    /// Append one record.
    fn write(&mut self, value: &crate::data::SinkData) -> Result<(), FormatError>;

    /// Take the bytes produced since the last drain. May be empty for
    /// formats that buffer internally until close.
    fn drain(&mut self) -> Result<Bytes, FormatError>;

    /// Best-effort total size of the file so far, drained bytes included.
    /// Monotonic; may undercount trailers written on close.
    fn size_estimate(&self) -> u64;

    /// Finalize the file, returning any remaining bytes.
    fn finish(self: Box<Self>) -> Result<Bytes, FormatError>;
}

/// A growable buffer with interior mutability, shared between an encoder
/// that implements `io::Write` and the owner draining encoded bytes.
#[derive(Clone)]
pub(crate) struct SharedBuffer {
    buffer: Arc<Mutex<Writer<BytesMut>>>,
}

impl SharedBuffer {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(BytesMut::new().writer())),
        }
    }

    /// Bytes currently buffered (not yet drained).
    pub(crate) fn len(&self) -> Result<usize, FormatError> {
        let guard = self.buffer.lock().map_err(|_| BufferLockSnafu.build())?;
        Ok(guard.get_ref().len())
    }

    /// Take everything buffered so far.
    pub(crate) fn take(&self) -> Result<Bytes, FormatError> {
        let mut guard = self.buffer.lock().map_err(|_| BufferLockSnafu.build())?;
        let len = guard.get_ref().len();
        Ok(guard.get_mut().split_to(len).freeze())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self.buffer.lock().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::Other, "format buffer lock poisoned")
        })?;
        Write::write(&mut *buffer, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
