//! Error types for snowdrift using snafu.
//!
//! Each stage of the write path has its own error enum so callers can tell a
//! bad record apart from a failed upload or a failed commit:
//!
//! - [`ComputationError`]: a record could not be mapped to a partition.
//! - [`WriteError`]: bytes could not be encoded or staged.
//! - [`RecoveryError`]: a pending-file token does not match a readable staged file.
//! - [`CommitError`]: publishing or discarding a staged file failed.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// A stored path string is not a valid object path.
    #[snafu(display("Invalid object path '{path}': {source}"))]
    InvalidPath {
        path: String,
        source: object_store::path::Error,
    },

    /// The root directory of a local table could not be prepared.
    #[snafu(display("Failed to prepare table root {path}: {source}"))]
    PrepareRoot {
        path: String,
        source: std::io::Error,
    },
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
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Table URI is empty.
    #[snafu(display("Table URI cannot be empty"))]
    EmptyTableUri,

    /// A partitioned strategy was configured without partition columns.
    #[snafu(display("Strategy '{strategy}' requires at least one partition column"))]
    MissingPartitionColumns { strategy: String },

    /// Partition columns were given to the unpartitioned strategy.
    #[snafu(display("Strategy 'single' does not take partition columns"))]
    UnexpectedPartitionColumns,

    /// A static partition was given to a strategy that derives partitions.
    #[snafu(display("Strategy '{strategy}' does not take a static partition"))]
    UnexpectedStaticPartition { strategy: String },

    /// The same partition column was listed twice.
    #[snafu(display("Duplicate partition column: {column}"))]
    DuplicatePartitionColumn { column: String },

    /// A numeric setting that must be positive was zero.
    #[snafu(display("'{field}' must be greater than zero"))]
    ZeroValue { field: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file: {source}"))]
    ReadFile { source: std::io::Error },
}

// ============ Computation Errors ============

/// Errors raised while deriving partitions from a record.
///
/// These are data errors: the same record fails the same way every time, so
/// they are never retried.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ComputationError {
    /// The record is not a JSON object.
    #[snafu(display("Record is not a JSON object (found {kind})"))]
    NotAnObject { kind: String },

    /// A partition column holds a value that cannot name a directory.
    #[snafu(display("Partition column '{column}' has unsupported {kind} value"))]
    UnsupportedPartitionValue { column: String, kind: String },

    /// An input line is not valid JSON.
    #[snafu(display("Malformed record at line {line}: {source}"))]
    MalformedRecord {
        line: usize,
        source: serde_json::Error,
    },
}

// ============ Write Errors ============

/// Errors raised while appending to or closing a staged file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WriteError {
    /// The partition computer rejected the record.
    #[snafu(display("Failed to compute partition: {source}"))]
    Computation { source: ComputationError },

    /// Failed to encode a record into the file buffer.
    #[snafu(display("Failed to encode record for {path}: {source}"))]
    Encode {
        path: String,
        source: serde_json::Error,
    },

    /// Failed to upload staged bytes.
    #[snafu(display("Failed to stage {path}: {source}"))]
    Stage { path: String, source: StorageError },
}

// ============ Recovery Errors ============

/// Errors raised when a pending-file token cannot be turned back into a file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RecoveryError {
    /// Neither the staged file nor its committed counterpart exists.
    #[snafu(display("Staged file {path} is missing"))]
    MissingStagedFile { path: String },

    /// The staged file exists but its length differs from the token.
    #[snafu(display("Staged file {path} has {actual} bytes, expected {expected}"))]
    LengthMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    /// Storage failed while inspecting the staged file.
    #[snafu(display("Failed to inspect {path}: {source}"))]
    Inspect { path: String, source: StorageError },
}

// ============ Commit Errors ============

/// Errors raised while publishing or discarding a staged file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CommitError {
    /// Failed to move a staged file to its final path.
    #[snafu(display("Failed to publish {from} -> {to}: {source}"))]
    Publish {
        from: String,
        to: String,
        source: StorageError,
    },

    /// Failed to delete a staged file.
    #[snafu(display("Failed to discard {path}: {source}"))]
    Discard { path: String, source: StorageError },

    /// The staged file vanished and the final file is not there either.
    #[snafu(display("Neither {from} nor {to} exists"))]
    Vanished { from: String, to: String },
}

// ============ Per-committable failure ============

/// Why a single committable could not be finished.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CommitFailure {
    /// The pending file could not be recovered from its token.
    #[snafu(display("Recovery failed: {source}"))]
    Recovery { source: RecoveryError },

    /// The commit or cleanup call failed.
    #[snafu(display("Commit failed: {source}"))]
    Commit { source: CommitError },
}

// ============ Sink Error (top-level) ============

/// Top-level errors for the command line driver.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Configuration error.
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    /// Storage error.
    #[snafu(display("Storage error: {source}"))]
    SinkStorage { source: StorageError },

    /// Failed to read an input file.
    #[snafu(display("Failed to read input {path}: {source}"))]
    ReadInput {
        path: String,
        source: std::io::Error,
    },

    /// Record could not be partitioned.
    #[snafu(display("Computation error: {source}"))]
    SinkComputation { source: ComputationError },

    /// Record could not be written.
    #[snafu(display("Write error: {source}"))]
    SinkWrite { source: WriteError },

    /// Some committables in a batch could not be finished.
    #[snafu(display("{failed} committable(s) failed in batch {batch}"))]
    BatchFailed { batch: u64, failed: usize },
}

impl From<ConfigError> for SinkError {
    fn from(source: ConfigError) -> Self {
        SinkError::Config { source }
    }
}

impl From<StorageError> for SinkError {
    fn from(source: StorageError) -> Self {
        SinkError::SinkStorage { source }
    }
}

impl From<WriteError> for SinkError {
    fn from(source: WriteError) -> Self {
        SinkError::SinkWrite { source }
    }
}

impl From<ComputationError> for SinkError {
    fn from(source: ComputationError) -> Self {
        SinkError::SinkComputation { source }
    }
}
