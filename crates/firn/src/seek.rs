//! Committed-offset recovery from the object store.
//!
//! The store is the only durable state the sink has: every committed object
//! encodes the last offset it covers in its name. On open (first start or
//! rebalance) the seeker lists the relevant prefix, parses offsets back out
//! of the keys, and reports the highest one per partition so the runtime can
//! rewind delivery to `last + 1`. Listing the same partitions again is
//! harmless; repeated seeks to the same offset are no-ops upstream.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use firn_common::emit;
use firn_common::metrics::events::SeekCompleted;

use crate::error::SinkError;
use crate::manager::TopicRoute;
use crate::record::TopicPartition;

/// Scans the store for committed offsets.
pub struct OffsetSeeker<'a> {
    routes: &'a HashMap<String, Arc<TopicRoute>>,
}

impl<'a> OffsetSeeker<'a> {
    pub fn new(routes: &'a HashMap<String, Arc<TopicRoute>>) -> Self {
        Self { routes }
    }

    /// Resolve the highest committed offset for each partition that has any
    /// committed objects. Partitions without a route or without objects are
    /// simply absent from the result.
    pub async fn seek(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<HashMap<TopicPartition, i64>, SinkError> {
        let mut offsets = HashMap::new();

        for tp in partitions {
            let Some(route) = self.routes.get(&tp.topic) else {
                debug!(topic = %tp.topic, "No route for assigned partition; skipping seek");
                continue;
            };

            let prefix = route.keys.seek_prefix(&tp.topic, tp.partition);
            let pattern = route.keys.committed_key_pattern(&tp.topic, tp.partition);

            let listed = route.storage.list(&prefix).await?;
            let last = listed
                .iter()
                .filter_map(|path| route.keys.committed_offset(&pattern, path.as_ref()))
                .max();

            match last {
                Some(last) => {
                    info!(
                        topic = %tp.topic,
                        partition = tp.partition,
                        last_committed = last,
                        objects = listed.len(),
                        "Recovered committed offset"
                    );
                    emit!(SeekCompleted {
                        topic: tp.topic.clone(),
                        partition: tp.partition,
                        offset: last,
                    });
                    offsets.insert(tp.clone(), last);
                }
                None => {
                    debug!(
                        topic = %tp.topic,
                        partition = tp.partition,
                        "No committed objects found"
                    );
                }
            }
        }

        Ok(offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Format;
    use crate::naming::{ObjectKeyBuilder, ObjectNaming, PartitionDisplay};
    use crate::partition::PartitionKeyBuilder;
    use crate::policy::CommitPolicy;
    use bytes::Bytes;
    use firn_common::StorageProvider;
    use object_store::path::Path as ObjectPath;
    use object_store::PutPayload;
    use tempfile::TempDir;

    fn routes(
        storage: Arc<StorageProvider>,
        naming: ObjectNaming,
    ) -> HashMap<String, Arc<TopicRoute>> {
        let route = TopicRoute {
            format: Format::Json,
            policy: CommitPolicy::default(),
            partitioner: PartitionKeyBuilder::default(),
            keys: ObjectKeyBuilder::new(
                naming,
                PartitionDisplay::KeysAndValues,
                "backups",
                Format::Json,
            ),
            storage,
        };
        HashMap::from([("events".to_string(), Arc::new(route))])
    }

    async fn put(storage: &StorageProvider, key: &str) {
        storage
            .put_payload(
                &ObjectPath::from(key),
                PutPayload::from(Bytes::from_static(b"{}\n")),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn finds_max_offset_per_partition() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageProvider::local(dir.path()).unwrap());
        put(&storage, "backups/events/0/3.json").await;
        put(&storage, "backups/events/0/7.json").await;
        put(&storage, "backups/events/1/5.json").await;

        let routes = routes(storage, ObjectNaming::Hierarchical);
        let seeker = OffsetSeeker::new(&routes);
        let offsets = seeker
            .seek(&[
                TopicPartition::new("events", 0),
                TopicPartition::new("events", 1),
                TopicPartition::new("events", 2),
            ])
            .await
            .unwrap();

        assert_eq!(offsets.get(&TopicPartition::new("events", 0)), Some(&7));
        assert_eq!(offsets.get(&TopicPartition::new("events", 1)), Some(&5));
        assert!(!offsets.contains_key(&TopicPartition::new("events", 2)));
    }

    #[tokio::test]
    async fn scans_logical_partition_subdirectories() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageProvider::local(dir.path()).unwrap());
        put(&storage, "backups/name=a/events(0_2).json").await;
        put(&storage, "backups/name=b/events(0_4).json").await;
        put(&storage, "backups/name=b/events(1_9).json").await;

        let routes = routes(storage, ObjectNaming::Partitioned);
        let seeker = OffsetSeeker::new(&routes);
        let offsets = seeker
            .seek(&[
                TopicPartition::new("events", 0),
                TopicPartition::new("events", 1),
            ])
            .await
            .unwrap();

        assert_eq!(offsets.get(&TopicPartition::new("events", 0)), Some(&4));
        assert_eq!(offsets.get(&TopicPartition::new("events", 1)), Some(&9));
    }

    #[tokio::test]
    async fn ignores_foreign_objects_under_the_prefix() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageProvider::local(dir.path()).unwrap());
        put(&storage, "backups/events/0/3.json").await;
        put(&storage, "backups/events/0/not-an-offset.json").await;
        put(&storage, "backups/events/0/9.avro").await;

        let routes = routes(storage, ObjectNaming::Hierarchical);
        let seeker = OffsetSeeker::new(&routes);
        let offsets = seeker
            .seek(&[TopicPartition::new("events", 0)])
            .await
            .unwrap();

        assert_eq!(offsets.get(&TopicPartition::new("events", 0)), Some(&3));
    }
}
