//! Dynamic record payloads and their schema descriptors.
//!
//! Records cross the sink boundary untyped: a value may be a structured
//! record, a primitive, a map, an array or raw bytes. `SinkData` models that
//! as a tagged union; structured values optionally carry a `RecordSchema`
//! side-channel which drives the columnar formats and the schema-change
//! roll decision.

use bytes::Bytes;
use indexmap::IndexMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Kinds of fields a record schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    String,
    Int32,
    Int64,
    Float32,
    Float64,
    Boolean,
    Bytes,
}

/// One declared field: name, kind, nullability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, kind: FieldKind, nullable: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable,
        }
    }
}

/// Schema descriptor for a structured value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

/// Shared schema handle; cloned onto every record of the same shape.
pub type SchemaRef = Arc<RecordSchema>;

impl RecordSchema {
    pub fn new(name: impl Into<String>, fields: Vec<FieldSchema>) -> SchemaRef {
        Arc::new(Self {
            name: name.into(),
            fields,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Structural fingerprint. Two values may share a file only when their
    /// fingerprints match.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// A dynamically typed record value.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkData {
    /// Structured record, optionally schema-backed. Field order is the
    /// declaration order and is preserved.
    Struct {
        schema: Option<SchemaRef>,
        fields: IndexMap<String, SinkData>,
    },
    /// Schemaless string-keyed map.
    Map(IndexMap<String, SinkData>),
    Array(Vec<SinkData>),
    Text(String),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Boolean(bool),
    Bytes(Bytes),
    Null,
}

impl SinkData {
    /// Convenience constructor for a schema-backed struct.
    pub fn record(schema: SchemaRef, fields: Vec<(&str, SinkData)>) -> Self {
        SinkData::Struct {
            schema: Some(schema),
            fields: fields
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SinkData::Null)
    }

    /// Primitive values are the only ones allowed as partition values.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            SinkData::Text(_)
                | SinkData::Int32(_)
                | SinkData::Int64(_)
                | SinkData::Float32(_)
                | SinkData::Float64(_)
                | SinkData::Boolean(_)
        )
    }

    /// The schema descriptor, if this is a schema-backed struct.
    pub fn schema(&self) -> Option<&SchemaRef> {
        match self {
            SinkData::Struct { schema, .. } => schema.as_ref(),
            _ => None,
        }
    }

    /// Fingerprint of the carried schema; `None` for schemaless values.
    pub fn fingerprint(&self) -> Option<u64> {
        self.schema().map(|s| s.fingerprint())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SinkData::Struct { .. } => "struct",
            SinkData::Map(_) => "map",
            SinkData::Array(_) => "array",
            SinkData::Text(_) => "string",
            SinkData::Int32(_) => "int32",
            SinkData::Int64(_) => "int64",
            SinkData::Float32(_) => "float32",
            SinkData::Float64(_) => "float64",
            SinkData::Boolean(_) => "boolean",
            SinkData::Bytes(_) => "bytes",
            SinkData::Null => "null",
        }
    }

    /// Canonical scalar rendering used in object keys: strings as-is,
    /// numbers in plain decimal, booleans lowercased. Containers, bytes and
    /// nulls have no rendering.
    pub fn render(&self) -> Option<String> {
        match self {
            SinkData::Text(s) => Some(s.clone()),
            SinkData::Int32(v) => Some(v.to_string()),
            SinkData::Int64(v) => Some(v.to_string()),
            SinkData::Float32(v) => Some(v.to_string()),
            SinkData::Float64(v) => Some(v.to_string()),
            SinkData::Boolean(v) => Some(v.to_string()),
            _ => None,
        }
    }

    /// Convert to a JSON value for the JSON format writer.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{Map, Number, Value};
        match self {
            SinkData::Struct { fields, .. } => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<_, _>>(),
            ),
            SinkData::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<_, _>>(),
            ),
            SinkData::Array(items) => Value::Array(items.iter().map(SinkData::to_json).collect()),
            SinkData::Text(s) => Value::String(s.clone()),
            SinkData::Int32(v) => Value::Number((*v).into()),
            SinkData::Int64(v) => Value::Number((*v).into()),
            SinkData::Float32(v) => Number::from_f64(f64::from(*v))
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SinkData::Float64(v) => Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SinkData::Boolean(v) => Value::Bool(*v),
            SinkData::Bytes(b) => Value::Array(b.iter().map(|byte| Value::from(*byte)).collect()),
            SinkData::Null => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_schema() -> SchemaRef {
        RecordSchema::new(
            "person",
            vec![
                FieldSchema::new("name", FieldKind::String, false),
                FieldSchema::new("title", FieldKind::String, true),
                FieldSchema::new("salary", FieldKind::Float64, true),
            ],
        )
    }

    #[test]
    fn fingerprint_is_stable_and_structural() {
        let a = person_schema();
        let b = person_schema();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = RecordSchema::new(
            "person",
            vec![
                FieldSchema::new("name", FieldKind::String, false),
                FieldSchema::new("designation", FieldKind::String, true),
                FieldSchema::new("salary", FieldKind::Float64, true),
            ],
        );
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn render_is_canonical() {
        assert_eq!(SinkData::Text("sam".into()).render().unwrap(), "sam");
        assert_eq!(SinkData::Int32(1).render().unwrap(), "1");
        assert_eq!(SinkData::Int64(2).render().unwrap(), "2");
        assert_eq!(SinkData::Float64(100.43).render().unwrap(), "100.43");
        assert_eq!(SinkData::Boolean(true).render().unwrap(), "true");
        assert!(SinkData::Null.render().is_none());
        assert!(SinkData::Map(IndexMap::new()).render().is_none());
    }

    #[test]
    fn json_preserves_field_order_and_nulls() {
        let value = SinkData::record(
            person_schema(),
            vec![
                ("name", SinkData::Text("tom".into())),
                ("title", SinkData::Null),
                ("salary", SinkData::Float64(395.44)),
            ],
        );
        let encoded = serde_json::to_string(&value.to_json()).unwrap();
        assert_eq!(encoded, r#"{"name":"tom","title":null,"salary":395.44}"#);
    }
}
