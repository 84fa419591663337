//! Plain text writer: one line per record.

use bytes::{BufMut, Bytes, BytesMut};

use crate::data::SinkData;
use crate::error::FormatError;
use crate::format::Format;

use super::FormatWriter;

/// Accepts only string values.
pub struct TextFormatWriter {
    buf: BytesMut,
    total: u64,
}

impl TextFormatWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            total: 0,
        }
    }
}

impl Default for TextFormatWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatWriter for TextFormatWriter {
    fn write(&mut self, value: &SinkData) -> Result<(), FormatError> {
        let SinkData::Text(line) = value else {
            return Err(FormatError::RecordType {
                format: Format::Text,
                actual: value.type_name(),
            });
        };
        self.buf.put_slice(line.as_bytes());
        self.buf.put_u8(b'\n');
        self.total += line.len() as u64 + 1;
        Ok(())
    }

    fn drain(&mut self) -> Result<Bytes, FormatError> {
        Ok(self.buf.split().freeze())
    }

    fn size_estimate(&self) -> u64 {
        self.total
    }

    fn finish(mut self: Box<Self>) -> Result<Bytes, FormatError> {
        Ok(self.buf.split().freeze())
    }
}
