//! firn-common: Shared infrastructure for the firn S3 sink.
//!
//! This crate contains the pieces of the sink that are independent of the
//! record pipeline:
//!
//! - `storage/` - Object store abstraction (S3-compatible stores, local filesystem)
//! - `metrics/` - Internal metric events and the `emit!` macro
//! - `error` - Storage error types and transient/fatal classification

pub mod error;
pub mod metrics;
pub mod storage;

// Re-export commonly used items
pub use error::StorageError;
pub use storage::{S3ClientSettings, S3Credentials, StorageProvider, StorageProviderRef};
