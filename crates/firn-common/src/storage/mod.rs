//! Object store abstraction for S3-compatible backends.
//!
//! Provides a unified interface over `object_store` for the remote half of
//! the sink: uploading finished objects, listing committed objects during
//! recovery, and removing leftovers in tests. A `LocalFileSystem` backend
//! exists so the full pipeline can run against a temp directory.

mod local;
mod s3;

pub use s3::{S3ClientSettings, S3Credentials};

use bytes::Bytes;
use futures::StreamExt;
use object_store::multipart::{MultipartStore, PartId};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::emit;
use crate::error::{ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    MultipartUploadCompleted, RequestStatus, StorageOperation, StorageRequest,
    StorageRequestDuration,
};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Part size for multipart uploads (S3 minimum is 5 MiB for non-final parts).
const MULTIPART_PART_SIZE: usize = 8 * 1024 * 1024;

/// Payloads below this size skip multipart entirely.
const MULTIPART_THRESHOLD: usize = 16 * 1024 * 1024;

/// Storage provider bound to a single bucket (or local root).
#[derive(Clone)]
pub struct StorageProvider {
    object_store: Arc<dyn ObjectStore>,
    /// Some backends (S3) support explicit part numbering; local filesystem
    /// does not.
    multipart_store: Option<Arc<dyn MultipartStore>>,
    canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

impl StorageProvider {
    pub(crate) fn new(
        object_store: Arc<dyn ObjectStore>,
        multipart_store: Option<Arc<dyn MultipartStore>>,
        canonical_url: String,
    ) -> Self {
        Self {
            object_store,
            multipart_store,
            canonical_url,
        }
    }

    /// Wrap a pre-built object store. Used by embeddings that manage their
    /// own clients and by tests injecting fault-injecting stores.
    pub fn custom(object_store: Arc<dyn ObjectStore>, canonical_url: impl Into<String>) -> Self {
        Self::new(object_store, None, canonical_url.into())
    }

    /// The URL this provider was constructed for, used in logs.
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// List all object keys under a prefix.
    ///
    /// Recurses into sub-prefixes; paths come back fully qualified relative
    /// to the bucket root. A missing prefix yields an empty list.
    pub async fn list(&self, prefix: &str) -> Result<Vec<Path>, StorageError> {
        emit!(StorageRequest {
            operation: StorageOperation::List,
            status: RequestStatus::Success,
        });

        let prefix_path = if prefix.is_empty() {
            None
        } else {
            Some(Path::from(prefix))
        };

        let mut paths = Vec::new();
        let mut stream = self.object_store.list(prefix_path.as_ref());
        while let Some(meta) = stream.next().await {
            match meta {
                Ok(meta) => paths.push(meta.location),
                Err(object_store::Error::NotFound { .. }) => continue,
                Err(source) => return Err(StorageError::ObjectStore { source }),
            }
        }

        debug!(prefix, count = paths.len(), "Listed objects");
        Ok(paths)
    }

    /// Get the contents of an object.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let result = self.object_store.get(path).await;

        self.record(StorageOperation::Get, result.is_ok(), start);

        let bytes = result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)?;
        Ok(bytes)
    }

    /// Put a payload to a path in a single request.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.put(path, payload).await;

        self.record(StorageOperation::Put, result.is_ok(), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Delete the object at the given path.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.delete(path).await;

        self.record(StorageOperation::Delete, result.is_ok(), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Upload bytes via multipart, falling back to a single put for small
    /// payloads or backends without multipart support.
    ///
    /// Parts are uploaded sequentially with explicit numbering; a failure at
    /// any step aborts the multipart upload so no partial object becomes
    /// visible at the target key.
    pub async fn put_multipart_bytes(&self, path: &Path, bytes: Bytes) -> Result<(), StorageError> {
        let Some(multipart_store) = &self.multipart_store else {
            return self.put_payload(path, PutPayload::from(bytes)).await;
        };
        if bytes.len() < MULTIPART_THRESHOLD {
            return self.put_payload(path, PutPayload::from(bytes)).await;
        }

        let create_start = Instant::now();
        let create_result = multipart_store.create_multipart(path).await;
        self.record(
            StorageOperation::CreateMultipart,
            create_result.is_ok(),
            create_start,
        );
        let multipart_id = create_result.context(ObjectStoreSnafu)?;

        let total_parts = bytes.len().div_ceil(MULTIPART_PART_SIZE);
        debug!(
            path = %path,
            bytes = bytes.len(),
            parts = total_parts,
            "Starting multipart upload"
        );

        let mut part_ids: Vec<PartId> = Vec::with_capacity(total_parts);
        for (idx, offset) in (0..bytes.len()).step_by(MULTIPART_PART_SIZE).enumerate() {
            let end = std::cmp::min(offset + MULTIPART_PART_SIZE, bytes.len());
            let part_start = Instant::now();
            let result = multipart_store
                .put_part(path, &multipart_id, idx, bytes.slice(offset..end).into())
                .await;
            self.record(StorageOperation::PutPart, result.is_ok(), part_start);

            match result {
                Ok(part_id) => part_ids.push(part_id),
                Err(source) => {
                    // Best effort; an orphaned upload is reaped by bucket
                    // lifecycle rules if this also fails.
                    let _ = multipart_store.abort_multipart(path, &multipart_id).await;
                    return Err(StorageError::ObjectStore { source });
                }
            }
        }

        let complete_start = Instant::now();
        let complete_result = multipart_store
            .complete_multipart(path, &multipart_id, part_ids)
            .await;
        self.record(
            StorageOperation::CompleteMultipart,
            complete_result.is_ok(),
            complete_start,
        );
        complete_result.context(ObjectStoreSnafu)?;

        emit!(MultipartUploadCompleted);
        debug!(path = %path, "Completed multipart upload");
        Ok(())
    }

    fn record(&self, operation: StorageOperation, ok: bool, start: Instant) {
        let status = if ok {
            RequestStatus::Success
        } else {
            RequestStatus::Error
        };
        emit!(StorageRequest { operation, status });
        emit!(StorageRequestDuration {
            operation,
            duration: start.elapsed(),
        });
    }
}
