//! Error types for the firn sink.

use snafu::prelude::*;
use std::path::PathBuf;
use std::time::Duration;

// Re-export the storage error so callers only need this module
pub use firn_common::error::StorageError;

use crate::format::Format;

/// Errors raised while parsing and validating sink configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// No KCQL was supplied and no profile provides one.
    #[snafu(display("Missing required property '{key}'"))]
    MissingProperty { key: String },

    /// A KCQL statement could not be parsed.
    #[snafu(display("Invalid KCQL: {message}"))]
    KcqlSyntax { message: String },

    /// STOREAS names a format the sink does not know.
    #[snafu(display("Unknown storage format '{value}'"))]
    UnknownFormat { value: String },

    /// Nested prefixes are not supported; the prefix is a single path segment.
    #[snafu(display("Nested prefix '{prefix}' is unsupported: '/' is not allowed"))]
    NestedPrefixUnsupported { prefix: String },

    /// A PARTITIONBY path segment contains a '/'.
    #[snafu(display("Invalid partition path '{path}': '/' is not allowed"))]
    InvalidPartitionPath { path: String },

    /// A WITH_FLUSH_* clause has a malformed or non-positive value.
    #[snafu(display("Invalid {clause} value '{value}'"))]
    InvalidThreshold { clause: String, value: String },

    /// WITHPARTITIONER names an unknown mode.
    #[snafu(display("Unknown partitioner mode '{value}'"))]
    UnknownPartitionerMode { value: String },

    /// _topic/_partition selectors require WITHPARTITIONER=Values.
    #[snafu(display("Selector '{selector}' requires WITHPARTITIONER=Values"))]
    SelectorRequiresValuesMode { selector: String },

    /// An enum-valued property holds something unexpected.
    #[snafu(display("Invalid value '{value}' for property '{key}'"))]
    InvalidProperty { key: String, value: String },

    /// Two KCQL statements bind the same source topic.
    #[snafu(display("Duplicate KCQL statement for topic '{topic}'"))]
    DuplicateTopic { topic: String },

    /// A profile file could not be read.
    #[snafu(display("Failed to read profile {}: {source}", path.display()))]
    ProfileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A profile file is not a flat YAML map.
    #[snafu(display("Failed to parse profile {}: {source}", path.display()))]
    ProfileParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// A record arrived for a topic no KCQL statement covers.
    #[snafu(display("No KCQL statement routes topic '{topic}'"))]
    UnroutedTopic { topic: String },
}

/// Errors raised while deriving partition values from a record.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExtractError {
    /// A header referenced by PARTITIONBY is absent from the record.
    #[snafu(display("Header '{header}' not found on record"))]
    HeaderNotFound { header: String },

    /// PARTITIONBY _key needs a primitive key.
    #[snafu(display("Partitioning by key requires a primitive key, got {actual}"))]
    NonPrimitiveKey { actual: &'static str },

    /// PARTITIONBY _key on a record without a key.
    #[snafu(display("Partitioning by key but the record has no key"))]
    MissingKey,

    /// A whole-value selector resolved to a container.
    #[snafu(display("Partition value must be a primitive, got {actual}"))]
    NonPrimitiveValue { actual: &'static str },

    /// A dotted path descended into a non-traversable value.
    #[snafu(display("Cannot traverse '{segment}' into {actual}"))]
    NotAStruct {
        segment: String,
        actual: &'static str,
    },

    /// A rendered partition value would create a spurious path separator.
    #[snafu(display("Partition value '{value}' contains '/'"))]
    ValueContainsSlash { value: String },
}

/// Errors raised by the format writers.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FormatError {
    /// The record's value does not fit the configured format.
    #[snafu(display("{format} format cannot encode a {actual} value"))]
    RecordType {
        format: Format,
        actual: &'static str,
    },

    /// Columnar formats need a schema-carrying struct.
    #[snafu(display("{format} format requires a schema"))]
    SchemaRequired { format: Format },

    /// Columnar formats here only handle flat primitive fields.
    #[snafu(display("{format} format requires primitive fields, '{field}' is {actual}"))]
    NonPrimitiveField {
        format: Format,
        field: String,
        actual: &'static str,
    },

    /// JSON encoding failed.
    #[snafu(display("JSON encoding failed: {source}"))]
    Json { source: serde_json::Error },

    /// CSV encoding failed.
    #[snafu(display("CSV encoding failed: {source}"))]
    Csv { source: csv::Error },

    /// Avro encoding failed.
    #[snafu(display("Avro encoding failed: {source}"))]
    Avro { source: apache_avro::Error },

    /// Arrow conversion failed.
    #[snafu(display("Arrow conversion failed: {source}"))]
    Arrow { source: arrow::error::ArrowError },

    /// Parquet encoding failed.
    #[snafu(display("Parquet encoding failed: {source}"))]
    Parquet {
        source: parquet::errors::ParquetError,
    },

    /// The shared output buffer is still referenced elsewhere.
    #[snafu(display("Format buffer still in use"))]
    BufferInUse,

    /// The shared output buffer lock was poisoned.
    #[snafu(display("Failed to lock format buffer"))]
    BufferLock,
}

/// Errors raised by the local staging store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StageError {
    /// The stage file disappeared between writes. Recoverable: the owning
    /// open file is dropped and the offsets redeliver later.
    #[snafu(display("Stage file {} is gone", path.display()))]
    StageGone { path: PathBuf },

    /// IO failure on the stage file.
    #[snafu(display("Stage IO error on {}: {source}", path.display()))]
    StageIo {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The staging directory could not be created.
    #[snafu(display("Failed to create staging directory {}: {source}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl StageError {
    /// Stage corruption is the one silently recovered class; everything else
    /// on the local disk is treated like a store failure.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StageError::StageGone { .. })
    }
}

/// Top-level sink errors as surfaced to the embedding runtime.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Partition derivation failed for a record.
    #[snafu(display("Partition extraction error: {source}"))]
    Extract { source: ExtractError },

    /// Format writer error.
    #[snafu(display("Format error: {source}"))]
    FormatWrite { source: FormatError },

    /// Local staging error.
    #[snafu(display("Staging error: {source}"))]
    Stage { source: StageError },

    /// Remote store error.
    #[snafu(display("Storage error: {source}"))]
    Storage { source: StorageError },

    /// The current put was aborted; the runtime should redeliver after the
    /// backoff. Open file state is preserved.
    #[snafu(display("Retriable failure (attempt {attempt}), retry after {after:?}: {message}"))]
    Retriable {
        after: Duration,
        attempt: u32,
        message: String,
    },

    /// The retry budget is exhausted.
    #[snafu(display("Giving up after {attempts} consecutive failed attempts: {message}"))]
    RetriesExhausted { attempts: u32, message: String },

    /// Lifecycle misuse: `put`/`open` before a successful `start`.
    #[snafu(display("Sink task is not started"))]
    NotStarted,

    /// An open file was used after its writer was finalized.
    #[snafu(display("Open file writer unavailable (already finalized)"))]
    WriterUnavailable,
}

impl SinkError {
    /// True when the runtime should back off and redeliver the batch.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SinkError::Retriable { .. })
    }

    /// True when a retry could change the outcome (pre-policy view).
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::Storage { source } => source.is_transient(),
            SinkError::Retriable { .. } => true,
            _ => false,
        }
    }
}

impl From<ConfigError> for SinkError {
    fn from(source: ConfigError) -> Self {
        SinkError::Config { source }
    }
}

impl From<ExtractError> for SinkError {
    fn from(source: ExtractError) -> Self {
        SinkError::Extract { source }
    }
}

impl From<FormatError> for SinkError {
    fn from(source: FormatError) -> Self {
        SinkError::FormatWrite { source }
    }
}

impl From<StageError> for SinkError {
    fn from(source: StageError) -> Self {
        SinkError::Stage { source }
    }
}

impl From<StorageError> for SinkError {
    fn from(source: StorageError) -> Self {
        SinkError::Storage { source }
    }
}
