//! Task lifecycle: the bridge between the runtime's record-delivery
//! protocol and the writer manager.
//!
//! The runtime drives `start`, `open`, `put`, `close` and `stop` on a single
//! thread. `start` parses and validates configuration, `open` recovers
//! committed offsets from the store and rewinds the runtime, `put` feeds the
//! manager, `close` commits everything for revoked partitions, and `stop`
//! releases local resources. `stop` is a safe no-op if `start` never
//! succeeded.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use firn_common::emit;
use firn_common::metrics::events::PutRetried;
use firn_common::{StorageProvider, StorageProviderRef};

use crate::config::{ErrorPolicy, S3SinkConfig};
use crate::error::SinkError;
use crate::manager::{TopicRoute, WriterManager};
use crate::record::{SinkRecord, TopicPartition};
use crate::seek::OffsetSeeker;
use crate::staging::StagingStore;
use crate::writer::CommittedObject;

/// Callbacks into the upstream runtime.
pub trait SinkContext: Send {
    /// Request that delivery for `tp` resumes at `offset`.
    fn seek(&mut self, tp: &TopicPartition, offset: i64);
}

struct TaskState {
    config: S3SinkConfig,
    routes: HashMap<String, Arc<TopicRoute>>,
    manager: WriterManager,
}

/// The S3 sink task.
#[derive(Default)]
pub struct S3SinkTask {
    state: Option<TaskState>,
    context: Option<Box<dyn SinkContext>>,
    /// Test/embedding hook: use this provider for every bucket instead of
    /// building real S3 clients.
    store_override: Option<StorageProviderRef>,
    consecutive_failures: u32,
}

impl S3SinkTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach the runtime context used for seek requests.
    pub fn with_context(context: Box<dyn SinkContext>) -> Self {
        Self {
            context: Some(context),
            ..Self::default()
        }
    }

    /// Route every binding to the given provider (local stores in tests,
    /// pre-built clients in embeddings).
    pub fn with_store(mut self, store: StorageProviderRef) -> Self {
        self.store_override = Some(store);
        self
    }

    /// Parse configuration and construct the writer pipeline.
    pub async fn start(&mut self, props: &HashMap<String, String>) -> Result<(), SinkError> {
        let config = S3SinkConfig::from_props(props)?;

        let mut providers: HashMap<String, StorageProviderRef> = HashMap::new();
        let mut routes = HashMap::new();
        for binding in &config.bindings {
            let storage = match &self.store_override {
                Some(store) => store.clone(),
                None => match providers.get(&binding.bucket) {
                    Some(provider) => provider.clone(),
                    None => {
                        let provider =
                            Arc::new(StorageProvider::s3(&binding.bucket, &config.client)?);
                        providers.insert(binding.bucket.clone(), provider.clone());
                        provider
                    }
                },
            };

            let route = TopicRoute {
                format: binding.format,
                policy: binding.policy,
                partitioner: binding.partition_key_builder(),
                keys: binding.key_builder(),
                storage,
            };
            routes.insert(binding.topic.clone(), Arc::new(route));
        }

        let staging = StagingStore::new(config.write_mode, &config.tmp_dir)?;
        let manager = WriterManager::new(routes.clone(), staging);

        info!(
            bindings = config.bindings.len(),
            write_mode = ?config.write_mode,
            error_policy = ?config.error_policy,
            "Sink task started"
        );

        self.state = Some(TaskState {
            config,
            routes,
            manager,
        });
        self.consecutive_failures = 0;
        Ok(())
    }

    /// Recover committed offsets for newly assigned partitions and rewind
    /// the runtime to `last + 1`. Safe to repeat; re-seeking to the same
    /// offset is a no-op upstream.
    pub async fn open(&mut self, partitions: &[TopicPartition]) -> Result<(), SinkError> {
        let state = self.state.as_mut().ok_or(SinkError::NotStarted)?;

        let seeker = OffsetSeeker::new(&state.routes);
        let offsets = seeker.seek(partitions).await?;
        state.manager.seed_committed(offsets.clone());

        if let Some(context) = &mut self.context {
            for (tp, last) in &offsets {
                context.seek(tp, last + 1);
            }
        }
        Ok(())
    }

    /// Deliver a batch. Returns the objects committed while processing it.
    pub async fn put(
        &mut self,
        records: &[SinkRecord],
    ) -> Result<Vec<CommittedObject>, SinkError> {
        let state = self.state.as_mut().ok_or(SinkError::NotStarted)?;

        match state.manager.put(records).await {
            Ok(committed) => {
                self.consecutive_failures = 0;
                Ok(committed)
            }
            Err(e) => {
                let policy = state.config.error_policy;
                let retry_interval = state.config.retry_interval;
                let max_retries = state.config.max_retries;
                self.absorb_failure(e, policy, retry_interval, max_retries)
            }
        }
    }

    /// Commit every open file of the closing partitions regardless of
    /// policy.
    pub async fn close(&mut self, partitions: &[TopicPartition]) -> Result<(), SinkError> {
        let state = self.state.as_mut().ok_or(SinkError::NotStarted)?;

        match state.manager.close(partitions).await {
            Ok(_) => {
                self.consecutive_failures = 0;
                Ok(())
            }
            Err(e) => {
                let policy = state.config.error_policy;
                let retry_interval = state.config.retry_interval;
                let max_retries = state.config.max_retries;
                self.absorb_failure(e, policy, retry_interval, max_retries)
                    .map(|_| ())
            }
        }
    }

    /// Next offsets to commit upstream: `last committed + 1` per partition.
    pub fn offsets_to_commit(&self) -> HashMap<TopicPartition, i64> {
        self.state
            .as_ref()
            .map(|state| state.manager.offsets_to_commit())
            .unwrap_or_default()
    }

    /// Release local resources. Open files are discarded, not committed.
    pub async fn stop(&mut self) {
        if let Some(mut state) = self.state.take() {
            state.manager.stop();
            info!("Sink task stopped");
        }
    }

    fn absorb_failure(
        &mut self,
        e: SinkError,
        policy: ErrorPolicy,
        retry_interval: std::time::Duration,
        max_retries: u32,
    ) -> Result<Vec<CommittedObject>, SinkError> {
        if !e.is_transient() {
            error!(error = %e, "Fatal sink error");
            return Err(e);
        }

        match policy {
            ErrorPolicy::Throw => {
                error!(error = %e, "Store failure with THROW policy");
                Err(e)
            }
            ErrorPolicy::Noop => {
                warn!(error = %e, "Store failure swallowed by NOOP policy");
                Ok(Vec::new())
            }
            ErrorPolicy::Retry => {
                self.consecutive_failures += 1;
                let attempt = self.consecutive_failures;
                if attempt > max_retries {
                    error!(attempts = attempt, error = %e, "Retry budget exhausted");
                    return Err(SinkError::RetriesExhausted {
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                warn!(
                    attempt,
                    max_retries,
                    backoff_ms = retry_interval.as_millis() as u64,
                    error = %e,
                    "Store failure; requesting redelivery"
                );
                emit!(PutRetried { attempt });
                Err(SinkError::Retriable {
                    after: retry_interval,
                    attempt,
                    message: e.to_string(),
                })
            }
        }
    }
}
