//! Avro object container file writer.

use apache_avro::types::Value as AvroValue;
use apache_avro::Schema as AvroSchema;
use bytes::Bytes;
use serde_json::json;
use snafu::prelude::*;

use crate::data::{FieldKind, SchemaRef, SinkData};
use crate::error::{
    AvroSnafu, FormatError, NonPrimitiveFieldSnafu, RecordTypeSnafu, SchemaRequiredSnafu,
};
use crate::format::Format;

use super::FormatWriter;

/// Writes schema-backed structs into an Avro container file.
///
/// Records are converted (and therefore validated) on `write`; the container
/// itself is serialized in one pass on `finish`, so `drain` yields nothing
/// until the file rolls.
pub struct AvroFormatWriter {
    schema: AvroSchema,
    pending: Vec<AvroValue>,
    estimate: u64,
}

impl AvroFormatWriter {
    pub fn new(schema: &SchemaRef) -> Result<Self, FormatError> {
        let avro_schema = to_avro_schema(schema)?;
        Ok(Self {
            schema: avro_schema,
            pending: Vec::new(),
            estimate: 0,
        })
    }
}

/// Build the Avro record schema for a flat struct. Nullable fields become
/// `["null", <type>]` unions, matching how the connect runtimes encode
/// optional fields.
fn to_avro_schema(schema: &SchemaRef) -> Result<AvroSchema, FormatError> {
    let fields: Vec<serde_json::Value> = schema
        .fields
        .iter()
        .map(|field| {
            let base = match field.kind {
                FieldKind::String => json!("string"),
                FieldKind::Int32 => json!("int"),
                FieldKind::Int64 => json!("long"),
                FieldKind::Float32 => json!("float"),
                FieldKind::Float64 => json!("double"),
                FieldKind::Boolean => json!("boolean"),
                FieldKind::Bytes => json!("bytes"),
            };
            if field.nullable {
                json!({"name": field.name, "type": ["null", base], "default": null})
            } else {
                json!({"name": field.name, "type": base})
            }
        })
        .collect();

    let record = json!({
        "type": "record",
        "name": if schema.name.is_empty() { "record".to_string() } else { schema.name.clone() },
        "fields": fields,
    });

    AvroSchema::parse(&record).context(AvroSnafu)
}

fn to_avro_value(schema: &SchemaRef, value: &SinkData) -> Result<AvroValue, FormatError> {
    let SinkData::Struct { fields, .. } = value else {
        return RecordTypeSnafu {
            format: Format::Avro,
            actual: value.type_name(),
        }
        .fail();
    };

    let mut record_fields = Vec::with_capacity(schema.fields.len());
    for field_schema in &schema.fields {
        let field_value = fields.get(&field_schema.name).unwrap_or(&SinkData::Null);
        let base = match field_value {
            SinkData::Null => AvroValue::Null,
            SinkData::Text(s) => AvroValue::String(s.clone()),
            SinkData::Int32(v) => AvroValue::Int(*v),
            SinkData::Int64(v) => AvroValue::Long(*v),
            SinkData::Float32(v) => AvroValue::Float(*v),
            SinkData::Float64(v) => AvroValue::Double(*v),
            SinkData::Boolean(v) => AvroValue::Boolean(*v),
            SinkData::Bytes(b) => AvroValue::Bytes(b.to_vec()),
            other => {
                return NonPrimitiveFieldSnafu {
                    format: Format::Avro,
                    field: field_schema.name.clone(),
                    actual: other.type_name(),
                }
                .fail()
            }
        };
        let encoded = if field_schema.nullable {
            match base {
                AvroValue::Null => AvroValue::Union(0, Box::new(AvroValue::Null)),
                present => AvroValue::Union(1, Box::new(present)),
            }
        } else {
            base
        };
        record_fields.push((field_schema.name.clone(), encoded));
    }

    Ok(AvroValue::Record(record_fields))
}

/// Rough per-value size used for the byte-threshold policy while the
/// container is still unserialized.
fn value_estimate(value: &AvroValue) -> u64 {
    match value {
        AvroValue::Null => 1,
        AvroValue::Boolean(_) => 1,
        AvroValue::Int(_) | AvroValue::Float(_) => 4,
        AvroValue::Long(_) | AvroValue::Double(_) => 8,
        AvroValue::String(s) => s.len() as u64 + 1,
        AvroValue::Bytes(b) => b.len() as u64 + 1,
        AvroValue::Union(_, inner) => 1 + value_estimate(inner),
        AvroValue::Record(fields) => fields.iter().map(|(_, v)| value_estimate(v)).sum(),
        _ => 8,
    }
}

impl FormatWriter for AvroFormatWriter {
    fn write(&mut self, value: &SinkData) -> Result<(), FormatError> {
        let Some(schema_ref) = value.schema().cloned() else {
            return match value {
                SinkData::Struct { .. } => SchemaRequiredSnafu {
                    format: Format::Avro,
                }
                .fail(),
                other => RecordTypeSnafu {
                    format: Format::Avro,
                    actual: other.type_name(),
                }
                .fail(),
            };
        };
        let avro_value = to_avro_value(&schema_ref, value)?;
        self.estimate += value_estimate(&avro_value);
        self.pending.push(avro_value);
        Ok(())
    }

    fn drain(&mut self) -> Result<Bytes, FormatError> {
        Ok(Bytes::new())
    }

    fn size_estimate(&self) -> u64 {
        self.estimate
    }

    fn finish(self: Box<Self>) -> Result<Bytes, FormatError> {
        let AvroFormatWriter {
            schema, pending, ..
        } = *self;
        let mut writer = apache_avro::Writer::new(&schema, Vec::new());
        for value in pending {
            writer.append(value).context(AvroSnafu)?;
        }
        let encoded = writer.into_inner().context(AvroSnafu)?;
        Ok(Bytes::from(encoded))
    }
}
