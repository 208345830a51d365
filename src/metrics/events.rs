//! Internal events for snowdrift metrics emission.
//!
//! Each event struct represents a measurable occurrence on the write path.
//! Events implement the `InternalEvent` trait which records the corresponding
//! metric and a trace-level log line.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

// ============================================================================
// Writer events
// ============================================================================

/// Event emitted when records are appended to staged files.
pub struct RecordsWritten {
    pub count: u64,
}

impl InternalEvent for RecordsWritten {
    fn emit(self) {
        trace!(count = self.count, "Records written");
        counter!("snowdrift_records_written_total").increment(self.count);
    }
}

/// Event emitted when a new in-progress file is opened.
pub struct FileOpened;

impl InternalEvent for FileOpened {
    fn emit(self) {
        trace!("File opened");
        counter!("snowdrift_files_opened_total").increment(1);
    }
}

/// How an in-progress file was closed.
#[derive(Debug, Clone, Copy)]
pub enum CloseKind {
    /// Closed cleanly, ready to commit.
    Commit,
    /// Left behind at a boundary, only good for cleanup.
    Recovery,
}

impl CloseKind {
    fn as_str(&self) -> &'static str {
        match self {
            CloseKind::Commit => "commit",
            CloseKind::Recovery => "recovery",
        }
    }
}

/// Event emitted when an in-progress file's bytes are uploaded to staging.
pub struct FileStaged {
    pub bytes: u64,
    pub kind: CloseKind,
}

impl InternalEvent for FileStaged {
    fn emit(self) {
        trace!(bytes = self.bytes, kind = self.kind.as_str(), "File staged");
        counter!("snowdrift_files_staged_total", "kind" => self.kind.as_str()).increment(1);
        counter!("snowdrift_bytes_staged_total").increment(self.bytes);
    }
}

/// Gauge of per-partition writers currently open in one partition writer.
pub struct OpenPartitionWriters {
    pub count: usize,
}

impl InternalEvent for OpenPartitionWriters {
    fn emit(self) {
        gauge!("snowdrift_open_partition_writers").set(self.count as f64);
    }
}

// ============================================================================
// Commit events
// ============================================================================

/// Event emitted when a staged file becomes visible at its final path.
pub struct FileCommitted {
    /// Whether the commit went through the recovery path.
    pub recovered: bool,
}

impl InternalEvent for FileCommitted {
    fn emit(self) {
        let path = if self.recovered { "recovered" } else { "live" };
        trace!(path, "File committed");
        counter!("snowdrift_files_committed_total", "path" => path).increment(1);
    }
}

/// Event emitted when an in-progress file is cleaned up.
pub struct FileDiscarded {
    /// False when there was nothing left to delete.
    pub found: bool,
}

impl InternalEvent for FileDiscarded {
    fn emit(self) {
        trace!(found = self.found, "File discarded");
        let outcome = if self.found { "deleted" } else { "absent" };
        counter!("snowdrift_files_discarded_total", "outcome" => outcome).increment(1);
    }
}

/// Stage at which a committable failed.
#[derive(Debug, Clone, Copy)]
pub enum CommitStage {
    Recover,
    Commit,
    Cleanup,
}

impl CommitStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitStage::Recover => "recover",
            CommitStage::Commit => "commit",
            CommitStage::Cleanup => "cleanup",
        }
    }
}

/// Event emitted when a single committable fails.
pub struct CommitFailed {
    pub stage: CommitStage,
}

impl InternalEvent for CommitFailed {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), "Commit failed");
        counter!("snowdrift_commit_failures_total", "stage" => self.stage.as_str()).increment(1);
    }
}

/// Event emitted when the committer finishes a batch.
pub struct CommitBatchCompleted {
    pub duration: Duration,
}

impl InternalEvent for CommitBatchCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            "Commit batch completed"
        );
        histogram!("snowdrift_commit_batch_duration_seconds").record(self.duration.as_secs_f64());
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
    Head,
    List,
    Rename,
    Delete,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Get => "get",
            StorageOperation::Put => "put",
            StorageOperation::Head => "head",
            StorageOperation::List => "list",
            StorageOperation::Rename => "rename",
            StorageOperation::Delete => "delete",
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
            "snowdrift_storage_requests_total",
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
        histogram!(
            "snowdrift_storage_request_duration_seconds",
            "operation" => self.operation.as_str()
        )
        .record(self.duration.as_secs_f64());
    }
}
