//! Storage error types shared across the sink crates.

use snafu::prelude::*;

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// S3 client configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },

    /// Local filesystem root is not usable.
    #[snafu(display("Invalid local storage root {root}: {source}"))]
    LocalConfig {
        root: String,
        source: object_store::Error,
    },

    /// Multipart uploads are not supported by this backend.
    #[snafu(display("Backend does not support multipart uploads"))]
    MultipartUnsupported,
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }

    /// Whether a retry can plausibly succeed.
    ///
    /// Connection failures, timeouts, throttling and 5xx responses all
    /// surface from `object_store` as `Generic` errors once its own retry
    /// budget is exhausted. Everything carrying a definite verdict from the
    /// store (missing bucket, bad credentials, invalid path) is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => matches!(
                source,
                object_store::Error::Generic { .. } | object_store::Error::JoinError { .. }
            ),
            StorageError::Io { .. } => true,
            _ => false,
        }
    }
}
