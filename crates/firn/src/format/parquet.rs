//! Parquet writer over flat structs.

use arrow::array::{
    ArrayRef, BinaryArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    RecordBatch, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef as ArrowSchemaRef};
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use snafu::prelude::*;
use std::sync::Arc;

use crate::data::{FieldKind, SchemaRef, SinkData};
use crate::error::{
    ArrowSnafu, FormatError, NonPrimitiveFieldSnafu, ParquetSnafu, RecordTypeSnafu,
};
use crate::format::Format;

use super::{FormatWriter, SharedBuffer};

/// Writes schema-backed structs as Parquet.
///
/// Encoded bytes land in the shared buffer when the writer flushes a row
/// group and on close; the size estimate therefore combines buffered bytes
/// with the writer's in-progress accounting. The footer only exists after
/// `finish`, which is why committed files can exceed a byte threshold by up
/// to one record plus footer.
pub struct ParquetFormatWriter {
    writer: Option<ArrowWriter<SharedBuffer>>,
    buffer: SharedBuffer,
    arrow_schema: ArrowSchemaRef,
    record_schema: SchemaRef,
    drained: u64,
    high_water: u64,
}

impl ParquetFormatWriter {
    pub fn new(schema: &SchemaRef) -> Result<Self, FormatError> {
        let arrow_schema = to_arrow_schema(schema);
        let buffer = SharedBuffer::new();
        let writer = ArrowWriter::try_new(buffer.clone(), arrow_schema.clone(), None)
            .context(ParquetSnafu)?;
        Ok(Self {
            writer: Some(writer),
            buffer,
            arrow_schema,
            record_schema: schema.clone(),
            drained: 0,
            high_water: 0,
        })
    }

    fn batch_of(&self, value: &SinkData) -> Result<RecordBatch, FormatError> {
        let SinkData::Struct { fields, .. } = value else {
            return RecordTypeSnafu {
                format: Format::Parquet,
                actual: value.type_name(),
            }
            .fail();
        };

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.record_schema.fields.len());
        for field_schema in &self.record_schema.fields {
            let field_value = fields.get(&field_schema.name).unwrap_or(&SinkData::Null);
            ensure!(
                field_value.is_primitive()
                    || matches!(field_value, SinkData::Null | SinkData::Bytes(_)),
                NonPrimitiveFieldSnafu {
                    format: Format::Parquet,
                    field: field_schema.name.clone(),
                    actual: field_value.type_name(),
                }
            );

            let column: ArrayRef = match field_schema.kind {
                FieldKind::String => {
                    let cell = match field_value {
                        SinkData::Text(s) => Some(s.as_str()),
                        _ => None,
                    };
                    Arc::new(StringArray::from(vec![cell]))
                }
                FieldKind::Int32 => {
                    let cell = match field_value {
                        SinkData::Int32(v) => Some(*v),
                        _ => None,
                    };
                    Arc::new(Int32Array::from(vec![cell]))
                }
                FieldKind::Int64 => {
                    let cell = match field_value {
                        SinkData::Int64(v) => Some(*v),
                        SinkData::Int32(v) => Some(i64::from(*v)),
                        _ => None,
                    };
                    Arc::new(Int64Array::from(vec![cell]))
                }
                FieldKind::Float32 => {
                    let cell = match field_value {
                        SinkData::Float32(v) => Some(*v),
                        _ => None,
                    };
                    Arc::new(Float32Array::from(vec![cell]))
                }
                FieldKind::Float64 => {
                    let cell = match field_value {
                        SinkData::Float64(v) => Some(*v),
                        SinkData::Float32(v) => Some(f64::from(*v)),
                        _ => None,
                    };
                    Arc::new(Float64Array::from(vec![cell]))
                }
                FieldKind::Boolean => {
                    let cell = match field_value {
                        SinkData::Boolean(v) => Some(*v),
                        _ => None,
                    };
                    Arc::new(BooleanArray::from(vec![cell]))
                }
                FieldKind::Bytes => {
                    let cell = match field_value {
                        SinkData::Bytes(b) => Some(b.as_ref()),
                        _ => None,
                    };
                    Arc::new(BinaryArray::from(vec![cell]))
                }
            };
            columns.push(column);
        }

        RecordBatch::try_new(self.arrow_schema.clone(), columns).context(ArrowSnafu)
    }
}

fn to_arrow_schema(schema: &SchemaRef) -> ArrowSchemaRef {
    let fields: Vec<Field> = schema
        .fields
        .iter()
        .map(|field| {
            let data_type = match field.kind {
                FieldKind::String => DataType::Utf8,
                FieldKind::Int32 => DataType::Int32,
                FieldKind::Int64 => DataType::Int64,
                FieldKind::Float32 => DataType::Float32,
                FieldKind::Float64 => DataType::Float64,
                FieldKind::Boolean => DataType::Boolean,
                FieldKind::Bytes => DataType::Binary,
            };
            Field::new(&field.name, data_type, field.nullable)
        })
        .collect();
    Arc::new(ArrowSchema::new(fields))
}

impl FormatWriter for ParquetFormatWriter {
    fn write(&mut self, value: &SinkData) -> Result<(), FormatError> {
        let batch = self.batch_of(value)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| FormatError::BufferInUse)?;
        writer.write(&batch).context(ParquetSnafu)?;

        let in_progress = writer.in_progress_size() as u64;
        let buffered = self.buffer.len().unwrap_or(0) as u64;
        self.high_water = self.high_water.max(self.drained + buffered + in_progress);
        Ok(())
    }

    fn drain(&mut self) -> Result<Bytes, FormatError> {
        let chunk = self.buffer.take()?;
        self.drained += chunk.len() as u64;
        Ok(chunk)
    }

    fn size_estimate(&self) -> u64 {
        let in_progress = self
            .writer
            .as_ref()
            .map(|w| w.in_progress_size() as u64)
            .unwrap_or(0);
        let buffered = self.buffer.len().unwrap_or(0) as u64;
        std::cmp::max(self.high_water, self.drained + buffered + in_progress)
    }

    fn finish(mut self: Box<Self>) -> Result<Bytes, FormatError> {
        if let Some(writer) = self.writer.take() {
            writer.close().context(ParquetSnafu)?;
        }
        self.buffer.take()
    }
}
