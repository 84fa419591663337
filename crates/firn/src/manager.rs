//! Writer manager: fan-out dispatcher over open files.
//!
//! The manager owns the table of open files keyed by
//! `(topic, kafka-partition, logical-partition)` and drives the full record
//! path: dedup against committed offsets, logical partition derivation,
//! schema-change rolls, appends, and policy-driven commits.
//!
//! Commit ordering: a policy hit flushes its file immediately (so count and
//! byte thresholds hold exactly); after each batch a sweep re-evaluates
//! every open file - this is how time-based rolls happen and how half-full
//! files of a fanned-out partition get committed - with due files flushed
//! in ascending last-offset order per kafka partition.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use firn_common::emit;
use firn_common::metrics::events::{
    FlushTriggered, ObjectCommitted, RecordsSkipped, RecordsWritten, StageDiscarded,
};
use firn_common::StorageProviderRef;

use crate::error::{ConfigError, SinkError};
use crate::format::Format;
use crate::naming::ObjectKeyBuilder;
use crate::partition::{LogicalPartitionKey, PartitionKeyBuilder};
use crate::policy::{CommitPolicy, FlushTrigger};
use crate::record::{SinkRecord, TopicPartition};
use crate::staging::StagingStore;
use crate::writer::{CommittedObject, OpenFile};

/// Everything needed to sink one topic: where, how encoded, when to roll.
#[derive(Clone)]
pub struct TopicRoute {
    pub format: Format,
    pub policy: CommitPolicy,
    pub partitioner: PartitionKeyBuilder,
    pub keys: ObjectKeyBuilder,
    pub storage: StorageProviderRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WriterKey {
    tp: TopicPartition,
    logical: LogicalPartitionKey,
}

/// Dispatches records to open files and commits them.
pub struct WriterManager {
    routes: HashMap<String, Arc<TopicRoute>>,
    staging: StagingStore,
    writers: IndexMap<WriterKey, OpenFile>,
    committed: HashMap<TopicPartition, i64>,
}

impl WriterManager {
    pub fn new(routes: HashMap<String, Arc<TopicRoute>>, staging: StagingStore) -> Self {
        Self {
            routes,
            staging,
            writers: IndexMap::new(),
            committed: HashMap::new(),
        }
    }

    /// Seed committed offsets discovered by the seeker. Never rolls an
    /// already-known offset backwards.
    pub fn seed_committed(&mut self, offsets: impl IntoIterator<Item = (TopicPartition, i64)>) {
        for (tp, offset) in offsets {
            self.committed
                .entry(tp)
                .and_modify(|current| *current = (*current).max(offset))
                .or_insert(offset);
        }
    }

    /// Next offset to commit per partition (`last committed + 1`), only for
    /// partitions with at least one committed object.
    pub fn offsets_to_commit(&self) -> HashMap<TopicPartition, i64> {
        self.committed
            .iter()
            .map(|(tp, last)| (tp.clone(), last + 1))
            .collect()
    }

    /// Number of currently open files.
    pub fn open_file_count(&self) -> usize {
        self.writers.len()
    }

    /// Process one delivered batch. An empty batch still runs the policy
    /// sweep, which is what makes interval-based commits fire without new
    /// records.
    pub async fn put(&mut self, records: &[SinkRecord]) -> Result<Vec<CommittedObject>, SinkError> {
        let mut committed = Vec::new();

        for record in records {
            let Some(route) = self.routes.get(&record.topic).cloned() else {
                return Err(ConfigError::UnroutedTopic {
                    topic: record.topic.clone(),
                }
                .into());
            };

            let tp = record.topic_partition();
            if let Some(&last) = self.committed.get(&tp) {
                if record.offset <= last {
                    emit!(RecordsSkipped {
                        count: 1,
                        topic: record.topic.clone(),
                    });
                    continue;
                }
            }

            let logical = route.partitioner.build(record)?;
            let key = WriterKey {
                tp,
                logical: logical.clone(),
            };

            // A put aborted by a retriable failure preserves its open files,
            // so redelivery replays offsets the file already buffered. Those
            // are duplicates too, not just offsets below the committed mark.
            let already_buffered = self
                .writers
                .get(&key)
                .is_some_and(|file| record.offset <= file.last_offset());
            if already_buffered {
                emit!(RecordsSkipped {
                    count: 1,
                    topic: record.topic.clone(),
                });
                continue;
            }

            // Commit the open file before this record when its schema
            // changed, or when the file is already finalized awaiting a
            // retried upload and cannot take appends.
            let blocked = self.writers.get(&key).and_then(|file| {
                if file.is_pending_upload() {
                    Some(None)
                } else if !file.accepts_schema_of(record) {
                    Some(Some(FlushTrigger::SchemaChange))
                } else {
                    None
                }
            });
            if let Some(trigger) = blocked {
                if let Some(trigger) = trigger {
                    emit!(FlushTriggered {
                        trigger: trigger.as_str(),
                        topic: record.topic.clone(),
                    });
                }
                self.flush_one(&key, &mut committed).await?;
            }

            if !self.writers.contains_key(&key) {
                let file = OpenFile::open(record, logical, route.format, &self.staging)?;
                self.writers.insert(key.clone(), file);
            }

            let append_result = match self.writers.get_mut(&key) {
                Some(file) => file.append(record),
                None => continue,
            };
            match append_result {
                Ok(()) => {
                    emit!(RecordsWritten {
                        count: 1,
                        topic: record.topic.clone(),
                    });
                }
                Err(SinkError::Stage { source }) if source.is_corruption() => {
                    warn!(
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %source,
                        "Stage corrupted; dropping open file, offsets will redeliver"
                    );
                    emit!(StageDiscarded {
                        topic: record.topic.clone(),
                    });
                    if let Some(file) = self.writers.shift_remove(&key) {
                        file.discard(&self.staging);
                    }
                    continue;
                }
                Err(other) => return Err(other),
            }

            let due = self
                .writers
                .get(&key)
                .and_then(|file| route.policy.should_flush(file.stats(), Instant::now()));
            if let Some(trigger) = due {
                emit!(FlushTriggered {
                    trigger: trigger.as_str(),
                    topic: record.topic.clone(),
                });
                self.flush_one(&key, &mut committed).await?;
            }
        }

        self.sweep(&mut committed).await?;
        Ok(committed)
    }

    /// Flush every open file whose policy now fires, smallest last offset
    /// first within each kafka partition.
    async fn sweep(&mut self, committed: &mut Vec<CommittedObject>) -> Result<(), SinkError> {
        let now = Instant::now();
        let mut due: Vec<(WriterKey, i64)> = Vec::new();
        for (key, file) in &self.writers {
            let Some(route) = self.routes.get(&key.tp.topic) else {
                continue;
            };
            if let Some(trigger) = route.policy.should_flush(file.stats(), now) {
                emit!(FlushTriggered {
                    trigger: trigger.as_str(),
                    topic: key.tp.topic.clone(),
                });
                due.push((key.clone(), file.last_offset()));
            }
        }
        due.sort_by(|(a, a_off), (b, b_off)| a.tp.cmp(&b.tp).then(a_off.cmp(b_off)));

        for (key, _) in due {
            self.flush_one(&key, committed).await?;
        }
        Ok(())
    }

    /// Commit all open files of the given partitions regardless of policy.
    pub async fn close(
        &mut self,
        partitions: &[TopicPartition],
    ) -> Result<Vec<CommittedObject>, SinkError> {
        let mut due: Vec<(WriterKey, i64)> = self
            .writers
            .iter()
            .filter(|(key, _)| partitions.contains(&key.tp))
            .map(|(key, file)| (key.clone(), file.last_offset()))
            .collect();
        due.sort_by(|(a, a_off), (b, b_off)| a.tp.cmp(&b.tp).then(a_off.cmp(b_off)));

        let mut committed = Vec::new();
        for (key, _) in &due {
            emit!(FlushTriggered {
                trigger: FlushTrigger::Close.as_str(),
                topic: key.tp.topic.clone(),
            });
            self.flush_one(key, &mut committed).await?;
        }
        info!(
            partitions = partitions.len(),
            objects = committed.len(),
            "Closed partitions"
        );
        Ok(committed)
    }

    /// Drop all open files without committing anything.
    pub fn stop(&mut self) {
        let open = std::mem::take(&mut self.writers);
        let count = open.len();
        for (_, file) in open {
            file.discard(&self.staging);
        }
        if count > 0 {
            info!(discarded = count, "Discarded open files on stop");
        }
    }

    async fn flush_one(
        &mut self,
        key: &WriterKey,
        committed: &mut Vec<CommittedObject>,
    ) -> Result<(), SinkError> {
        let Some(route) = self.routes.get(&key.tp.topic).cloned() else {
            return Err(ConfigError::UnroutedTopic {
                topic: key.tp.topic.clone(),
            }
            .into());
        };
        let is_empty = match self.writers.get(key) {
            None => return Ok(()),
            Some(file) => file.record_count() == 0,
        };
        if is_empty {
            if let Some(file) = self.writers.shift_remove(key) {
                file.discard(&self.staging);
            }
            return Ok(());
        }

        let result = {
            // Invariant: presence checked just above; appends are serialized
            // so nothing removed it in between.
            let Some(file) = self.writers.get_mut(key) else {
                return Ok(());
            };
            file.flush(&self.staging, &route.storage, &route.keys).await
        };

        match result {
            Ok(object) => {
                if let Some(file) = self.writers.shift_remove(key) {
                    file.discard(&self.staging);
                }
                self.committed
                    .entry(object.topic_partition.clone())
                    .and_modify(|current| *current = (*current).max(object.last_offset))
                    .or_insert(object.last_offset);
                emit!(ObjectCommitted {
                    records: object.records,
                    bytes: object.bytes,
                    topic: object.topic_partition.topic.clone(),
                });
                committed.push(object);
                Ok(())
            }
            Err(SinkError::Stage { source }) if source.is_corruption() => {
                warn!(
                    topic = %key.tp.topic,
                    partition = key.tp.partition,
                    error = %source,
                    "Stage corrupted during flush; dropping open file"
                );
                emit!(StageDiscarded {
                    topic: key.tp.topic.clone(),
                });
                if let Some(file) = self.writers.shift_remove(key) {
                    file.discard(&self.staging);
                }
                Ok(())
            }
            // Transient or fatal store errors propagate with the open file
            // preserved; the task layer decides between retry and abort.
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FieldKind, FieldSchema, RecordSchema, SchemaRef, SinkData};
    use crate::naming::{ObjectNaming, PartitionDisplay};
    use crate::partition::PartitionField;
    use crate::staging::WriteMode;
    use firn_common::StorageProvider;
    use std::time::Duration;
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

    fn person(offset: i64, name: &str, title: Option<&str>, salary: Option<f64>) -> SinkRecord {
        SinkRecord::new(
            "myTopic",
            1,
            offset,
            SinkData::record(
                person_schema(),
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
            ),
        )
    }

    fn manager_with(
        dir: &TempDir,
        policy: CommitPolicy,
        partition_by: &[&str],
    ) -> WriterManager {
        let storage = Arc::new(StorageProvider::local(dir.path()).unwrap());
        let partitioner = PartitionKeyBuilder::new(
            partition_by
                .iter()
                .map(|s| PartitionField::parse(s).unwrap())
                .collect(),
        );
        let naming = if partition_by.is_empty() {
            ObjectNaming::Hierarchical
        } else {
            ObjectNaming::Partitioned
        };
        let route = TopicRoute {
            format: Format::Json,
            policy,
            partitioner,
            keys: ObjectKeyBuilder::new(
                naming,
                PartitionDisplay::KeysAndValues,
                "streamReactorBackups",
                Format::Json,
            ),
            storage,
        };
        let staging = StagingStore::new(WriteMode::Streamed, "/tmp").unwrap();
        WriterManager::new(
            HashMap::from([("myTopic".to_string(), Arc::new(route))]),
            staging,
        )
    }

    #[tokio::test]
    async fn flush_count_one_commits_every_record() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_with(&dir, CommitPolicy::new(Some(1), None, None), &[]);

        let committed = manager
            .put(&[
                person(0, "sam", Some("mr"), Some(100.43)),
                person(1, "laura", Some("ms"), Some(429.06)),
                person(2, "tom", None, Some(395.44)),
            ])
            .await
            .unwrap();

        let keys: Vec<_> = committed.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "streamReactorBackups/myTopic/1/0.json",
                "streamReactorBackups/myTopic/1/1.json",
                "streamReactorBackups/myTopic/1/2.json",
            ]
        );
        assert!(committed.iter().all(|o| o.records == 1));
        assert_eq!(manager.open_file_count(), 0);
    }

    #[tokio::test]
    async fn flush_size_commits_when_bytes_reached() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_with(&dir, CommitPolicy::new(None, Some(80), None), &[]);

        let committed = manager
            .put(&[
                person(0, "sam", Some("mr"), Some(100.43)),
                person(1, "laura", Some("ms"), Some(429.06)),
                person(2, "tom", None, Some(395.44)),
            ])
            .await
            .unwrap();

        // 44 + 46 bytes cross the 80-byte threshold; the third record stays
        // open.
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].key, "streamReactorBackups/myTopic/1/1.json");
        assert_eq!(committed[0].records, 2);
        assert_eq!(manager.open_file_count(), 1);

        // stop discards the open remainder without committing
        manager.stop();
        assert_eq!(manager.open_file_count(), 0);
    }

    #[tokio::test]
    async fn close_commits_remainder_regardless_of_policy() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_with(&dir, CommitPolicy::new(None, Some(80), None), &[]);

        manager
            .put(&[
                person(0, "sam", Some("mr"), Some(100.43)),
                person(1, "laura", Some("ms"), Some(429.06)),
                person(2, "tom", None, Some(395.44)),
            ])
            .await
            .unwrap();

        let committed = manager
            .close(&[TopicPartition::new("myTopic", 1)])
            .await
            .unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].key, "streamReactorBackups/myTopic/1/2.json");
        assert_eq!(committed[0].records, 1);
    }

    #[tokio::test]
    async fn schema_change_rolls_the_open_file() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_with(&dir, CommitPolicy::new(Some(2), None, None), &[]);

        let other_schema = RecordSchema::new(
            "person",
            vec![
                FieldSchema::new("name", FieldKind::String, false),
                FieldSchema::new("designation", FieldKind::String, true),
                FieldSchema::new("salary", FieldKind::Float64, true),
            ],
        );
        let reshaped = |offset: i64, name: &str| {
            SinkRecord::new(
                "myTopic",
                1,
                offset,
                SinkData::record(
                    other_schema.clone(),
                    vec![
                        ("name", SinkData::Text(name.into())),
                        ("designation", SinkData::Text("chief".into())),
                        ("salary", SinkData::Float64(1.0)),
                    ],
                ),
            )
        };

        let committed = manager
            .put(&[
                person(1, "sam", Some("mr"), Some(100.43)),
                person(2, "laura", Some("ms"), Some(429.06)),
                person(3, "tom", None, Some(395.44)),
                reshaped(4, "bobo"),
                reshaped(5, "momo"),
                reshaped(6, "coco"),
            ])
            .await
            .unwrap();

        let keys: Vec<_> = committed.iter().map(|o| o.key.as_str()).collect();
        // offsets 1-2 by count, 3 alone via the schema roll, 4-5 by count;
        // 6 stays open
        assert_eq!(
            keys,
            vec![
                "streamReactorBackups/myTopic/1/2.json",
                "streamReactorBackups/myTopic/1/3.json",
                "streamReactorBackups/myTopic/1/5.json",
            ]
        );
        assert_eq!(committed[1].records, 1);
        assert_eq!(manager.open_file_count(), 1);
    }

    #[tokio::test]
    async fn dedup_skips_already_committed_offsets() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_with(&dir, CommitPolicy::new(Some(1), None, None), &[]);
        manager.seed_committed([(TopicPartition::new("myTopic", 1), 1)]);

        let committed = manager
            .put(&[
                person(0, "sam", Some("mr"), Some(100.43)),
                person(1, "laura", Some("ms"), Some(429.06)),
                person(2, "tom", None, Some(395.44)),
            ])
            .await
            .unwrap();

        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].key, "streamReactorBackups/myTopic/1/2.json");
        assert_eq!(
            manager.offsets_to_commit(),
            HashMap::from([(TopicPartition::new("myTopic", 1), 3)])
        );
    }

    #[tokio::test]
    async fn partitioned_records_fan_out_and_interleave() {
        let dir = TempDir::new().unwrap();
        let mut manager =
            manager_with(&dir, CommitPolicy::new(Some(1), None, None), &["name", "title", "salary"]);

        let committed = manager
            .put(&[person(0, "first", Some("primary"), None)])
            .await
            .unwrap();

        assert_eq!(
            committed[0].key,
            "streamReactorBackups/name=first/title=primary/salary=[missing]/myTopic(1_0).json"
        );
    }

    #[tokio::test]
    async fn fanned_out_offsets_may_interleave_across_logical_partitions() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_with(&dir, CommitPolicy::new(Some(2), None, None), &["name"]);

        let committed = manager
            .put(&[
                person(0, "a", None, None),
                person(1, "b", None, None),
                person(2, "a", None, None),
            ])
            .await
            .unwrap();

        // logical partition "a" fills first with offsets 0 and 2
        assert_eq!(committed.len(), 1);
        assert_eq!(
            committed[0].key,
            "streamReactorBackups/name=a/myTopic(1_2).json"
        );
        assert_eq!(manager.open_file_count(), 1);

        // "b" commits later with the in-between offset; recovery uses the
        // maximum so this interleaving is harmless
        let committed = manager
            .close(&[TopicPartition::new("myTopic", 1)])
            .await
            .unwrap();
        assert_eq!(
            committed[0].key,
            "streamReactorBackups/name=b/myTopic(1_1).json"
        );
    }

    #[tokio::test]
    async fn empty_put_fires_interval_policy() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_with(
            &dir,
            CommitPolicy::new(None, None, Some(Duration::from_millis(20))),
            &[],
        );

        manager
            .put(&[person(0, "sam", Some("mr"), Some(100.43))])
            .await
            .unwrap();
        assert_eq!(manager.open_file_count(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let committed = manager.put(&[]).await.unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].key, "streamReactorBackups/myTopic/1/0.json");
    }

    #[tokio::test]
    async fn unrouted_topic_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_with(&dir, CommitPolicy::new(Some(1), None, None), &[]);

        let stray = SinkRecord::new("otherTopic", 0, 0, SinkData::Text("x".into()));
        let err = manager.put(&[stray]).await.unwrap_err();
        assert!(matches!(
            err,
            SinkError::Config {
                source: ConfigError::UnroutedTopic { .. }
            }
        ));
    }

    #[tokio::test]
    async fn committed_offsets_increase_per_partition() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_with(&dir, CommitPolicy::new(Some(1), None, None), &[]);

        let committed = manager
            .put(&[
                person(0, "a", None, None),
                person(1, "b", None, None),
                person(2, "c", None, None),
            ])
            .await
            .unwrap();

        let offsets: Vec<i64> = committed.iter().map(|o| o.last_offset).collect();
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(offsets, sorted, "commit order must follow offsets");
    }
}
