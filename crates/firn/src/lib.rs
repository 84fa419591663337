//! Firn: a streaming sink that writes partitioned record streams to
//! S3-compatible object stores.
//!
//! This crate handles:
//! - Routing records by topic according to KCQL bindings
//! - Deriving logical partitions from record content (value/key/header paths)
//! - Rolling files by count, size, interval and schema changes
//! - Encoding as JSON, Avro, Parquet, CSV, text or raw bytes
//! - Staging bytes locally or in memory before multipart upload
//! - Recovering committed offsets from object names on restart
//!
//! Delivery is at-least-once with dedup by offset: committed object names
//! encode the last offset they contain, redelivered offsets at or below the
//! recovered high-water mark are dropped, and redelivered ranges above it
//! rewrite identical keys.

pub mod config;
pub mod data;
pub mod error;
pub mod extract;
pub mod format;
pub mod manager;
pub mod naming;
pub mod partition;
pub mod policy;
pub mod record;
pub mod seek;
pub mod staging;
pub mod task;
pub mod writer;

// Re-export commonly used items
pub use config::{ErrorPolicy, S3SinkConfig, SinkBinding};
pub use data::{FieldKind, FieldSchema, RecordSchema, SchemaRef, SinkData};
pub use error::SinkError;
pub use format::Format;
pub use manager::WriterManager;
pub use record::{SinkRecord, TopicPartition};
pub use staging::WriteMode;
pub use task::{S3SinkTask, SinkContext};
pub use writer::CommittedObject;

// Re-export from firn-common
pub use firn_common::{S3ClientSettings, S3Credentials, StorageProvider, StorageProviderRef};
