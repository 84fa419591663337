//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the sink. Events
//! implement the `InternalEvent` trait which records the corresponding
//! metric through the `metrics` facade. Per-topic events carry a `topic`
//! label so multi-statement deployments stay observable per stream.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when records are appended to open files.
pub struct RecordsWritten {
    pub count: u64,
    pub topic: String,
}

impl InternalEvent for RecordsWritten {
    fn emit(self) {
        trace!(count = self.count, topic = %self.topic, "Records written");
        counter!("firn_records_written_total", "topic" => self.topic).increment(self.count);
    }
}

/// Event emitted when already-committed records are dropped on redelivery.
pub struct RecordsSkipped {
    pub count: u64,
    pub topic: String,
}

impl InternalEvent for RecordsSkipped {
    fn emit(self) {
        trace!(count = self.count, topic = %self.topic, "Records skipped");
        counter!("firn_records_skipped_total", "topic" => self.topic).increment(self.count);
    }
}

/// Event emitted when an object is committed to the store.
pub struct ObjectCommitted {
    pub records: u64,
    pub bytes: u64,
    pub topic: String,
}

impl InternalEvent for ObjectCommitted {
    fn emit(self) {
        trace!(
            records = self.records,
            bytes = self.bytes,
            topic = %self.topic,
            "Object committed"
        );
        counter!("firn_objects_committed_total", "topic" => self.topic.clone()).increment(1);
        counter!("firn_records_committed_total", "topic" => self.topic.clone())
            .increment(self.records);
        counter!("firn_bytes_written_total", "topic" => self.topic).increment(self.bytes);
    }
}

/// Event emitted when a commit policy fires.
pub struct FlushTriggered {
    /// The predicate that fired: "count", "bytes", "interval", "schema" or "close".
    pub trigger: &'static str,
    pub topic: String,
}

impl InternalEvent for FlushTriggered {
    fn emit(self) {
        trace!(trigger = self.trigger, topic = %self.topic, "Flush triggered");
        counter!("firn_flushes_total", "trigger" => self.trigger, "topic" => self.topic)
            .increment(1);
    }
}

/// Event emitted when a corrupted local stage forces an open file to be dropped.
pub struct StageDiscarded {
    pub topic: String,
}

impl InternalEvent for StageDiscarded {
    fn emit(self) {
        trace!(topic = %self.topic, "Stage discarded");
        counter!("firn_stages_discarded_total", "topic" => self.topic).increment(1);
    }
}

/// Event emitted when the seeker resolves a committed offset for a partition.
pub struct SeekCompleted {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl InternalEvent for SeekCompleted {
    fn emit(self) {
        trace!(
            topic = %self.topic,
            partition = self.partition,
            offset = self.offset,
            "Seek completed"
        );
        counter!("firn_seeks_total", "topic" => self.topic).increment(1);
    }
}

/// Event emitted when a put is aborted with a retriable error.
pub struct PutRetried {
    pub attempt: u32,
}

impl InternalEvent for PutRetried {
    fn emit(self) {
        trace!(attempt = self.attempt, "Put retried");
        counter!("firn_put_retries_total").increment(1);
    }
}

// ============================================================================
// Storage operation events
// ============================================================================

/// Storage operation types.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    Get,
    Put,
    Delete,
    List,
    CreateMultipart,
    PutPart,
    CompleteMultipart,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::Delete => "delete",
            StorageOperation::List => "list",
            StorageOperation::CreateMultipart => "create_multipart",
            StorageOperation::PutPart => "put_part",
            StorageOperation::CompleteMultipart => "complete_multipart",
        }
    }
}

/// Status of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted when a storage request completes.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "firn_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted when a storage request completes with duration.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            duration_ms = self.duration.as_millis(),
            "Storage request duration"
        );
        histogram!(
            "firn_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}

/// Event emitted when a multipart upload completes.
pub struct MultipartUploadCompleted;

impl InternalEvent for MultipartUploadCompleted {
    fn emit(self) {
        trace!("Multipart upload completed");
        counter!("firn_multipart_uploads_total").increment(1);
    }
}
