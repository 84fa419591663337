//! Per-partition open file.
//!
//! One `OpenFile` exists per `(topic, kafka-partition, logical-partition)`
//! with buffered records. It owns a format writer and a stage handle, tracks
//! the offset range it covers, and pins the value-schema fingerprint of its
//! first record; a record with a different fingerprint must roll the file.
//!
//! Flushing happens in two steps that can be retried independently: the
//! format writer is finalized into the stage exactly once, then the staged
//! bytes upload to the object key derived from the last offset. A transient
//! upload failure leaves the finalized stage (and the offset range) intact,
//! so the next attempt retries the upload without re-encoding.

use object_store::path::Path as ObjectPath;
use std::time::Instant;
use tracing::debug;

use firn_common::StorageProvider;

use crate::error::SinkError;
use crate::format::Format;
use crate::naming::ObjectKeyBuilder;
use crate::partition::LogicalPartitionKey;
use crate::policy::OpenFileStats;
use crate::record::{SinkRecord, TopicPartition};
use crate::staging::{StageCommitError, StageHandle, StagingStore};

/// A successfully committed object.
#[derive(Debug, Clone)]
pub struct CommittedObject {
    pub key: String,
    pub topic_partition: TopicPartition,
    pub first_offset: i64,
    pub last_offset: i64,
    pub records: u64,
    pub bytes: u64,
}

/// State machine for one open file.
pub struct OpenFile {
    topic_partition: TopicPartition,
    logical: LogicalPartitionKey,
    writer: Option<Box<dyn crate::format::FormatWriter>>,
    stage: StageHandle,
    stats: OpenFileStats,
    first_offset: i64,
    last_offset: i64,
    fingerprint: Option<u64>,
    /// Set once the format writer is finalized; holds the final object key.
    pending_upload: Option<String>,
}

impl OpenFile {
    /// Open a file for the record that creates it. The record itself is not
    /// appended here.
    pub fn open(
        record: &SinkRecord,
        logical: LogicalPartitionKey,
        format: Format,
        staging: &StagingStore,
    ) -> Result<Self, SinkError> {
        let writer = format.new_writer(record.value.schema())?;
        let discriminator = format!(
            "{}_{}_{}",
            record.topic, record.partition, record.offset
        );
        let stage = staging.open(&discriminator)?;

        debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            logical = %logical,
            %format,
            "Opened file"
        );

        Ok(Self {
            topic_partition: record.topic_partition(),
            logical,
            writer: Some(writer),
            stage,
            stats: OpenFileStats::new(Instant::now()),
            first_offset: record.offset,
            last_offset: record.offset,
            fingerprint: record.value_fingerprint(),
            pending_upload: None,
        })
    }

    /// Whether a record may be appended without rolling.
    pub fn accepts_schema_of(&self, record: &SinkRecord) -> bool {
        self.fingerprint == record.value_fingerprint()
    }

    /// True once the format writer is finalized and only the upload remains
    /// (a previous commit attempt failed). No further appends are possible.
    pub fn is_pending_upload(&self) -> bool {
        self.pending_upload.is_some()
    }

    pub fn stats(&self) -> &OpenFileStats {
        &self.stats
    }

    pub fn last_offset(&self) -> i64 {
        self.last_offset
    }

    pub fn topic_partition(&self) -> &TopicPartition {
        &self.topic_partition
    }

    pub fn record_count(&self) -> u64 {
        self.stats.records
    }

    /// Append one record: encode, drain, stage.
    pub fn append(&mut self, record: &SinkRecord) -> Result<(), SinkError> {
        debug_assert!(self.pending_upload.is_none());
        debug_assert!(record.offset >= self.last_offset);

        let writer = self.writer.as_mut().ok_or(SinkError::WriterUnavailable)?;
        writer.write(&record.value)?;
        let chunk = writer.drain()?;
        self.stage.append(&chunk)?;

        self.stats.records += 1;
        self.stats.bytes = std::cmp::max(self.stats.bytes, writer.size_estimate());
        self.last_offset = record.offset;
        Ok(())
    }

    /// Finalize (once) and upload the file; on success the caller reclaims
    /// the stage by consuming this `OpenFile`.
    pub async fn flush(
        &mut self,
        staging: &StagingStore,
        storage: &StorageProvider,
        keys: &ObjectKeyBuilder,
    ) -> Result<CommittedObject, SinkError> {
        if self.pending_upload.is_none() {
            let writer = self.writer.take().ok_or(SinkError::WriterUnavailable)?;
            let trailer = writer.finish()?;
            self.stage.append(&trailer)?;
            let key = keys.object_key(
                &self.topic_partition.topic,
                self.topic_partition.partition,
                self.last_offset,
                &self.logical,
            );
            self.pending_upload = Some(key);
        }

        // Invariant: set just above when absent.
        let key = self.pending_upload.clone().ok_or(SinkError::WriterUnavailable)?;
        let object_path = ObjectPath::from(key.as_str());
        let bytes = staging
            .commit(&self.stage, storage, &object_path)
            .await
            .map_err(|e| match e {
                StageCommitError::Stage { source } => SinkError::Stage { source },
                StageCommitError::Storage { source } => SinkError::Storage { source },
            })?;

        debug!(
            key = %key,
            records = self.stats.records,
            bytes,
            first_offset = self.first_offset,
            last_offset = self.last_offset,
            "Committed object"
        );

        Ok(CommittedObject {
            key,
            topic_partition: self.topic_partition.clone(),
            first_offset: self.first_offset,
            last_offset: self.last_offset,
            records: self.stats.records,
            bytes,
        })
    }

    /// Tear down without uploading, releasing local resources.
    pub fn discard(self, staging: &StagingStore) {
        staging.reclaim(self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FieldKind, FieldSchema, RecordSchema, SchemaRef, SinkData};
    use crate::naming::{ObjectNaming, PartitionDisplay};
    use crate::staging::WriteMode;
    use tempfile::TempDir;

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

    fn record(offset: i64, name: &str) -> SinkRecord {
        SinkRecord::new(
            "myTopic",
            1,
            offset,
            SinkData::record(
                person_schema(),
                vec![
                    ("name", SinkData::Text(name.into())),
                    ("title", SinkData::Text("mr".into())),
                    ("salary", SinkData::Float64(100.43)),
                ],
            ),
        )
    }

    fn keys() -> ObjectKeyBuilder {
        ObjectKeyBuilder::new(
            ObjectNaming::Hierarchical,
            PartitionDisplay::KeysAndValues,
            "backups",
            Format::Json,
        )
    }

    #[tokio::test]
    async fn append_flush_commits_offset_named_object() {
        let store_dir = TempDir::new().unwrap();
        let storage = StorageProvider::local(store_dir.path()).unwrap();
        let staging = StagingStore::new(WriteMode::Streamed, "/tmp").unwrap();

        let first = record(0, "sam");
        let mut file = OpenFile::open(
            &first,
            LogicalPartitionKey::default(),
            Format::Json,
            &staging,
        )
        .unwrap();
        file.append(&first).unwrap();
        file.append(&record(1, "laura")).unwrap();

        let committed = file.flush(&staging, &storage, &keys()).await.unwrap();
        assert_eq!(committed.key, "backups/myTopic/1/1.json");
        assert_eq!(committed.first_offset, 0);
        assert_eq!(committed.last_offset, 1);
        assert_eq!(committed.records, 2);
        file.discard(&staging);

        let bytes = storage
            .get(&ObjectPath::from("backups/myTopic/1/1.json"))
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[tokio::test]
    async fn schema_fingerprint_is_pinned_at_open() {
        let staging = StagingStore::new(WriteMode::Streamed, "/tmp").unwrap();
        let first = record(0, "sam");
        let file = OpenFile::open(
            &first,
            LogicalPartitionKey::default(),
            Format::Json,
            &staging,
        )
        .unwrap();

        assert!(file.accepts_schema_of(&record(1, "laura")));

        let other_schema = RecordSchema::new(
            "person",
            vec![
                FieldSchema::new("name", FieldKind::String, false),
                FieldSchema::new("designation", FieldKind::String, true),
                FieldSchema::new("salary", FieldKind::Float64, true),
            ],
        );
        let changed = SinkRecord::new(
            "myTopic",
            1,
            2,
            SinkData::record(
                other_schema,
                vec![("name", SinkData::Text("bobo".into()))],
            ),
        );
        assert!(!file.accepts_schema_of(&changed));
    }

    #[tokio::test]
    async fn byte_stats_grow_monotonically() {
        let staging = StagingStore::new(WriteMode::Streamed, "/tmp").unwrap();
        let first = record(0, "sam");
        let mut file = OpenFile::open(
            &first,
            LogicalPartitionKey::default(),
            Format::Json,
            &staging,
        )
        .unwrap();

        file.append(&first).unwrap();
        let after_one = file.stats().bytes;
        assert_eq!(after_one, 44);
        file.append(&record(1, "laura")).unwrap();
        assert!(file.stats().bytes > after_one);
    }
}
