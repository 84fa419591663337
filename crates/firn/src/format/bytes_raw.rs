//! Raw bytes writer: record values concatenated verbatim.

use bytes::{BufMut, Bytes, BytesMut};

use crate::data::SinkData;
use crate::error::FormatError;
use crate::format::Format;

use super::FormatWriter;

/// Accepts only byte values.
pub struct BytesFormatWriter {
    buf: BytesMut,
    total: u64,
}

impl BytesFormatWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            total: 0,
        }
    }
}

impl Default for BytesFormatWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatWriter for BytesFormatWriter {
    fn write(&mut self, value: &SinkData) -> Result<(), FormatError> {
        let SinkData::Bytes(payload) = value else {
            return Err(FormatError::RecordType {
                format: Format::Bytes,
                actual: value.type_name(),
            });
        };
        self.buf.put_slice(payload);
        self.total += payload.len() as u64;
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
