//! CSV writer over flat structs.

use bytes::Bytes;
use snafu::prelude::*;

use crate::data::SinkData;
use crate::error::{CsvSnafu, FormatError, NonPrimitiveFieldSnafu};
use crate::format::Format;

use super::{FormatWriter, SharedBuffer};

/// Writes one row per record. Values must be structs whose fields are all
/// primitive; the header row (when enabled) comes from the first record's
/// field names and is written once per file.
pub struct CsvFormatWriter {
    writer: csv::Writer<SharedBuffer>,
    buffer: SharedBuffer,
    with_headers: bool,
    headers_written: bool,
    drained: u64,
}

impl CsvFormatWriter {
    pub fn new(with_headers: bool) -> Self {
        let buffer = SharedBuffer::new();
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(buffer.clone());
        Self {
            writer,
            buffer,
            with_headers,
            headers_written: false,
            drained: 0,
        }
    }

    fn format_of(&self) -> Format {
        if self.with_headers {
            Format::CsvWithHeaders
        } else {
            Format::Csv
        }
    }

    fn row_of(&self, value: &SinkData) -> Result<(Vec<String>, Vec<String>), FormatError> {
        let SinkData::Struct { fields, .. } = value else {
            return Err(FormatError::RecordType {
                format: self.format_of(),
                actual: value.type_name(),
            });
        };

        let mut names = Vec::with_capacity(fields.len());
        let mut cells = Vec::with_capacity(fields.len());
        for (name, field) in fields {
            let cell = match field {
                SinkData::Null => String::new(),
                other => {
                    other
                        .render()
                        .with_context(|| NonPrimitiveFieldSnafu {
                            format: self.format_of(),
                            field: name.clone(),
                            actual: other.type_name(),
                        })?
                }
            };
            names.push(name.clone());
            cells.push(cell);
        }
        Ok((names, cells))
    }
}

impl FormatWriter for CsvFormatWriter {
    fn write(&mut self, value: &SinkData) -> Result<(), FormatError> {
        let (names, cells) = self.row_of(value)?;

        if self.with_headers && !self.headers_written {
            self.writer.write_record(&names).context(CsvSnafu)?;
            self.headers_written = true;
        }
        self.writer.write_record(&cells).context(CsvSnafu)?;
        self.writer.flush().map_err(|source| FormatError::Csv {
            source: csv::Error::from(source),
        })?;
        Ok(())
    }

    fn drain(&mut self) -> Result<Bytes, FormatError> {
        let chunk = self.buffer.take()?;
        self.drained += chunk.len() as u64;
        Ok(chunk)
    }

    fn size_estimate(&self) -> u64 {
        self.drained + self.buffer.len().unwrap_or(0) as u64
    }

    fn finish(mut self: Box<Self>) -> Result<Bytes, FormatError> {
        self.writer.flush().map_err(|source| FormatError::Csv {
            source: csv::Error::from(source),
        })?;
        self.buffer.take()
    }
}
