//! Logical partition derivation.
//!
//! A PARTITIONBY clause is a list of selectors; evaluating them against a
//! record yields the ordered `(name, value)` tuple that identifies the
//! record's logical partition under the sink prefix.

use snafu::prelude::*;

use crate::data::SinkData;
use crate::error::{
    ConfigError, ExtractError, HeaderNotFoundSnafu, InvalidPartitionPathSnafu, MissingKeySnafu,
    NonPrimitiveKeySnafu, ValueContainsSlashSnafu,
};
use crate::extract::{extract_path, Extracted};
use crate::record::SinkRecord;

/// One PARTITIONBY selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionField {
    /// Dotted path into the record value (`name`, `user.name`).
    ValuePath(Vec<String>),
    /// Dotted path into a structured key (`_key.region`).
    KeyPath(Vec<String>),
    /// Header by name, optionally descending into a structured header value
    /// (`_header.phonePrefix`).
    Header { name: String, path: Vec<String> },
    /// The whole key (`_key`); must be primitive.
    WholeKey,
    /// The source topic name (`_topic`).
    Topic,
    /// The kafka partition number (`_partition`).
    Partition,
}

impl PartitionField {
    /// Parse a selector as written in PARTITIONBY. Path segments must not
    /// contain `/`; the rendered key would be ambiguous.
    pub fn parse(selector: &str) -> Result<Self, ConfigError> {
        ensure!(
            !selector.contains('/'),
            InvalidPartitionPathSnafu { path: selector }
        );
        ensure!(
            !selector.is_empty() && !selector.starts_with('.') && !selector.ends_with('.'),
            InvalidPartitionPathSnafu { path: selector }
        );

        let field = match selector {
            "_topic" => PartitionField::Topic,
            "_partition" => PartitionField::Partition,
            "_key" => PartitionField::WholeKey,
            other if other.starts_with("_key.") => {
                PartitionField::KeyPath(split_path(&other["_key.".len()..]))
            }
            other if other.starts_with("_header.") => {
                let mut segments = split_path(&other["_header.".len()..]);
                let name = segments.remove(0);
                PartitionField::Header {
                    name,
                    path: segments,
                }
            }
            other if other.starts_with("_value.") => {
                PartitionField::ValuePath(split_path(&other["_value.".len()..]))
            }
            other => PartitionField::ValuePath(split_path(other)),
        };

        Ok(field)
    }

    /// The display name used for `name=value` key segments.
    pub fn display_name(&self) -> String {
        match self {
            PartitionField::ValuePath(path) => path.join("."),
            PartitionField::KeyPath(path) => path.join("."),
            PartitionField::Header { name, path } => {
                if path.is_empty() {
                    name.clone()
                } else {
                    format!("{}.{}", name, path.join("."))
                }
            }
            PartitionField::WholeKey => "key".to_string(),
            PartitionField::Topic => "topic".to_string(),
            PartitionField::Partition => "partition".to_string(),
        }
    }

    /// Evaluate against a record, rendering the partition value.
    fn render(&self, record: &SinkRecord) -> Result<String, ExtractError> {
        match self {
            PartitionField::ValuePath(path) => extract_path(&record.value, path)?.render(),
            PartitionField::KeyPath(path) => match &record.key {
                Some(key) => extract_path(key, path)?.render(),
                None => MissingKeySnafu.fail(),
            },
            PartitionField::Header { name, path } => {
                let header = record
                    .header(name)
                    .context(HeaderNotFoundSnafu { header: name.clone() })?;
                extract_path(header, path)?.render()
            }
            PartitionField::WholeKey => match &record.key {
                Some(key) if key.is_primitive() => Extracted::Scalar(key).render(),
                Some(key) => NonPrimitiveKeySnafu {
                    actual: key.type_name(),
                }
                .fail(),
                None => MissingKeySnafu.fail(),
            },
            PartitionField::Topic => Ok(record.topic.clone()),
            PartitionField::Partition => Ok(record.partition.to_string()),
        }
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(|s| s.to_string()).collect()
}

/// Ordered `(display name, rendered value)` tuple identifying a logical
/// partition. Equality and hashing are by the full ordered tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LogicalPartitionKey(Vec<(String, String)>);

impl LogicalPartitionKey {
    pub fn segments(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for LogicalPartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (name, value) in &self.0 {
            if !first {
                write!(f, "/")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Evaluates a selector list against records.
#[derive(Debug, Clone, Default)]
pub struct PartitionKeyBuilder {
    fields: Vec<PartitionField>,
}

impl PartitionKeyBuilder {
    pub fn new(fields: Vec<PartitionField>) -> Self {
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Derive the logical partition key for a record.
    ///
    /// Rendered values may not contain `/`; a record whose partition value
    /// renders with one is rejected rather than silently splitting the key
    /// into extra path segments.
    pub fn build(&self, record: &SinkRecord) -> Result<LogicalPartitionKey, ExtractError> {
        let mut segments = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = field.render(record)?;
            ensure!(!value.contains('/'), ValueContainsSlashSnafu { value });
            segments.push((field.display_name(), value));
        }
        Ok(LogicalPartitionKey(segments))
    }
}
