//! Object key construction and recognition.
//!
//! Keys are deterministic functions of the record coordinates, so a
//! redelivered offset range produces the same key and overwrites rather
//! than duplicates. The same strategy that renders a key also recognizes
//! previously committed keys, which is how recovery works without any
//! local state.

use regex::Regex;

use crate::format::Format;
use crate::partition::LogicalPartitionKey;

/// How `name=value` segments are rendered in partitioned keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionDisplay {
    /// `name=value` segments.
    #[default]
    KeysAndValues,
    /// Bare `value` segments.
    Values,
}

/// Key layout under the configured prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectNaming {
    /// `<prefix>/<topic>/<partition>/<offset>.<ext>` - used when no
    /// PARTITIONBY is configured.
    Hierarchical,
    /// `<prefix>/<partition segments>/<topic>(<partition>_<offset>).<ext>`.
    Partitioned,
}

/// Renders and recognizes object keys for one sink binding.
#[derive(Debug, Clone)]
pub struct ObjectKeyBuilder {
    naming: ObjectNaming,
    display: PartitionDisplay,
    prefix: String,
    format: Format,
}

impl ObjectKeyBuilder {
    pub fn new(
        naming: ObjectNaming,
        display: PartitionDisplay,
        prefix: impl Into<String>,
        format: Format,
    ) -> Self {
        Self {
            naming,
            display,
            prefix: prefix.into(),
            format,
        }
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// Render the key for a finished file. `last_offset` is the offset of
    /// the final record in the file.
    pub fn object_key(
        &self,
        topic: &str,
        partition: i32,
        last_offset: i64,
        logical: &LogicalPartitionKey,
    ) -> String {
        let ext = self.format.extension();
        match self.naming {
            ObjectNaming::Hierarchical => {
                if self.prefix.is_empty() {
                    format!("{topic}/{partition}/{last_offset}.{ext}")
                } else {
                    format!("{}/{topic}/{partition}/{last_offset}.{ext}", self.prefix)
                }
            }
            ObjectNaming::Partitioned => {
                let mut key = self.prefix.clone();
                for (name, value) in logical.segments() {
                    if !key.is_empty() {
                        key.push('/');
                    }
                    match self.display {
                        PartitionDisplay::KeysAndValues => {
                            key.push_str(name);
                            key.push('=');
                            key.push_str(value);
                        }
                        PartitionDisplay::Values => key.push_str(value),
                    }
                }
                key.push('/');
                key.push_str(&format!("{topic}({partition}_{last_offset}).{ext}"));
                key
            }
        }
    }

    /// The listing prefix the seeker scans for one topic partition.
    pub fn seek_prefix(&self, topic: &str, partition: i32) -> String {
        match self.naming {
            ObjectNaming::Hierarchical if self.prefix.is_empty() => {
                format!("{topic}/{partition}")
            }
            ObjectNaming::Hierarchical => format!("{}/{topic}/{partition}", self.prefix),
            // Logical partition directories are arbitrary; scan the whole prefix.
            ObjectNaming::Partitioned => self.prefix.clone(),
        }
    }

    /// Regex matching committed keys of one topic partition, capturing the
    /// encoded offset.
    pub fn committed_key_pattern(&self, topic: &str, partition: i32) -> Regex {
        let prefix = if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", regex::escape(&self.prefix))
        };
        let topic = regex::escape(topic);
        let ext = regex::escape(self.format.extension());
        let pattern = match self.naming {
            ObjectNaming::Hierarchical => {
                format!(r"^{prefix}{topic}/{partition}/(\d+)\.{ext}$")
            }
            ObjectNaming::Partitioned => {
                format!(r"^{prefix}(?:[^/]+/)*{topic}\({partition}_(\d+)\)\.{ext}$")
            }
        };
        // The pattern is assembled from escaped literals and cannot fail.
        Regex::new(&pattern).unwrap_or_else(|_| unreachable!())
    }

    /// Parse the committed offset out of a key, if it belongs to the given
    /// topic partition under this strategy.
    pub fn committed_offset(&self, pattern: &Regex, key: &str) -> Option<i64> {
        pattern
            .captures(key)
            .and_then(|captures| captures.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{PartitionField, PartitionKeyBuilder};
    use crate::record::SinkRecord;
    use crate::data::SinkData;

    fn logical(selectors: &[(&str, &str)]) -> LogicalPartitionKey {
        // Build through the public API: a record with matching headers.
        let fields = selectors
            .iter()
            .map(|(name, _)| PartitionField::parse(&format!("_header.{name}")).unwrap())
            .collect();
        let mut record = SinkRecord::new("t", 0, 0, SinkData::Null);
        for (name, value) in selectors {
            record = record.with_header(*name, SinkData::Text((*value).to_string()));
        }
        PartitionKeyBuilder::new(fields).build(&record).unwrap()
    }

    #[test]
    fn hierarchical_key_layout() {
        let builder = ObjectKeyBuilder::new(
            ObjectNaming::Hierarchical,
            PartitionDisplay::KeysAndValues,
            "streamReactorBackups",
            Format::Json,
        );
        assert_eq!(
            builder.object_key("myTopic", 1, 0, &LogicalPartitionKey::default()),
            "streamReactorBackups/myTopic/1/0.json"
        );
    }

    #[test]
    fn partitioned_key_with_names() {
        let builder = ObjectKeyBuilder::new(
            ObjectNaming::Partitioned,
            PartitionDisplay::KeysAndValues,
            "streamReactorBackups",
            Format::Json,
        );
        let key = logical(&[("name", "first"), ("title", "primary")]);
        assert_eq!(
            builder.object_key("myTopic", 1, 0, &key),
            "streamReactorBackups/name=first/title=primary/myTopic(1_0).json"
        );
    }

    #[test]
    fn partitioned_key_values_only() {
        let builder = ObjectKeyBuilder::new(
            ObjectNaming::Partitioned,
            PartitionDisplay::Values,
            "backups",
            Format::Parquet,
        );
        let key = logical(&[("region", "emea")]);
        assert_eq!(
            builder.object_key("events", 3, 17, &key),
            "backups/emea/events(3_17).parquet"
        );
    }

    #[test]
    fn hierarchical_offsets_parse_back() {
        let builder = ObjectKeyBuilder::new(
            ObjectNaming::Hierarchical,
            PartitionDisplay::KeysAndValues,
            "backups",
            Format::Json,
        );
        let pattern = builder.committed_key_pattern("events", 1);

        assert_eq!(
            builder.committed_offset(&pattern, "backups/events/1/42.json"),
            Some(42)
        );
        // Different partition, topic or format must not match
        assert_eq!(
            builder.committed_offset(&pattern, "backups/events/2/42.json"),
            None
        );
        assert_eq!(
            builder.committed_offset(&pattern, "backups/other/1/42.json"),
            None
        );
        assert_eq!(
            builder.committed_offset(&pattern, "backups/events/1/42.avro"),
            None
        );
    }

    #[test]
    fn partitioned_offsets_parse_back_at_any_depth() {
        let builder = ObjectKeyBuilder::new(
            ObjectNaming::Partitioned,
            PartitionDisplay::KeysAndValues,
            "backups",
            Format::Json,
        );
        let pattern = builder.committed_key_pattern("events", 1);

        assert_eq!(
            builder.committed_offset(&pattern, "backups/name=first/title=x/events(1_7).json"),
            Some(7)
        );
        assert_eq!(
            builder.committed_offset(&pattern, "backups/emea/events(1_9).json"),
            Some(9)
        );
        assert_eq!(
            builder.committed_offset(&pattern, "backups/emea/events(2_9).json"),
            None
        );
    }

    #[test]
    fn dots_in_components_are_literal() {
        let builder = ObjectKeyBuilder::new(
            ObjectNaming::Hierarchical,
            PartitionDisplay::KeysAndValues,
            "v1.backups",
            Format::Json,
        );
        let pattern = builder.committed_key_pattern("my.topic", 0);
        assert_eq!(
            builder.committed_offset(&pattern, "v1.backups/my.topic/0/5.json"),
            Some(5)
        );
        assert_eq!(
            builder.committed_offset(&pattern, "v1xbackups/myxtopic/0/5.json"),
            None
        );
    }
}
