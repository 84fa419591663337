//! Newline-delimited JSON writer.

use bytes::{BufMut, Bytes, BytesMut};
use snafu::prelude::*;

use crate::data::SinkData;
use crate::error::{FormatError, JsonSnafu};

use super::FormatWriter;

/// Writes one compact JSON document per line. Accepts any value shape.
pub struct JsonFormatWriter {
    buf: BytesMut,
    total: u64,
}

impl JsonFormatWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            total: 0,
        }
    }
}

impl Default for JsonFormatWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatWriter for JsonFormatWriter {
    fn write(&mut self, value: &SinkData) -> Result<(), FormatError> {
        let encoded = serde_json::to_vec(&value.to_json()).context(JsonSnafu)?;
        self.buf.put_slice(&encoded);
        self.buf.put_u8(b'\n');
        self.total += encoded.len() as u64 + 1;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FieldKind, FieldSchema, RecordSchema};

    fn person(name: &str, title: Option<&str>, salary: Option<f64>) -> SinkData {
        let schema = RecordSchema::new(
            "person",
            vec![
                FieldSchema::new("name", FieldKind::String, false),
                FieldSchema::new("title", FieldKind::String, true),
                FieldSchema::new("salary", FieldKind::Float64, true),
            ],
        );
        SinkData::record(
            schema,
            vec![
                ("name", SinkData::Text(name.into())),
                (
                    "title",
                    title.map(|t| SinkData::Text(t.into())).unwrap_or(SinkData::Null),
                ),
                (
                    "salary",
                    salary.map(SinkData::Float64).unwrap_or(SinkData::Null),
                ),
            ],
        )
    }

    #[test]
    fn writes_one_document_per_line() {
        let mut writer = JsonFormatWriter::new();
        writer.write(&person("sam", Some("mr"), Some(100.43))).unwrap();
        writer.write(&person("laura", Some("ms"), Some(429.06))).unwrap();

        let bytes = Box::new(writer).finish().unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(
            text,
            "{\"name\":\"sam\",\"title\":\"mr\",\"salary\":100.43}\n{\"name\":\"laura\",\"title\":\"ms\",\"salary\":429.06}\n"
        );
    }

    #[test]
    fn encoded_sizes_match_document_lengths() {
        let mut writer = JsonFormatWriter::new();
        writer.write(&person("sam", Some("mr"), Some(100.43))).unwrap();
        assert_eq!(writer.size_estimate(), 44);
        writer.write(&person("laura", Some("ms"), Some(429.06))).unwrap();
        assert_eq!(writer.size_estimate(), 90);
        writer.write(&person("tom", None, Some(395.44))).unwrap();
        assert_eq!(writer.size_estimate(), 134);
    }

    #[test]
    fn drain_then_finish_yields_all_bytes() {
        let mut writer = JsonFormatWriter::new();
        writer.write(&person("sam", Some("mr"), Some(100.43))).unwrap();
        let first = writer.drain().unwrap();
        assert_eq!(first.len(), 44);

        writer.write(&person("tom", None, Some(395.44))).unwrap();
        let rest = Box::new(writer).finish().unwrap();
        assert_eq!(rest.len(), 44);
    }
}
