//! snowdrift: the write path of an exactly-once, partition-aware file sink.
//!
//! Records are routed to per-partition files in a per-attempt staging
//! namespace. At a batch boundary every open file is closed into a
//! [`Committable`]; once the batch is known to have succeeded, a
//! [`FileCommitter`] publishes pending files by renaming them into place and
//! deletes files that were still in progress.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use snowdrift::{
//!     AnyPartitionWriter, FileCommitter, JsonLinesEncoder, JsonPartitionComputer,
//!     PartitionWriter, StagingPathAllocator, StorageBucketWriter, StorageProvider,
//!     TaskAttempt, WriterContext, WriterFactory, WriterStrategy,
//! };
//!
//! let storage = Arc::new(StorageProvider::for_url("/data/events").await?);
//! let bucket_writer = Arc::new(StorageBucketWriter::new(storage.clone()));
//! let context = WriterContext::new(
//!     JsonPartitionComputer::new(vec!["dt".into()]),
//!     StagingPathAllocator::new(storage, "_staging", TaskAttempt::new(0, 0)),
//!     WriterFactory::new(bucket_writer.clone(), JsonLinesEncoder),
//! );
//! let mut writer = AnyPartitionWriter::new(WriterStrategy::Dynamic, context);
//!
//! writer.write(serde_json::json!({"dt": "2024-01-01", "v": 1})).await?;
//! writer.close().await?;
//! let report = FileCommitter::new(bucket_writer)
//!     .commit(writer.drain_committables())
//!     .await;
//! ```

pub mod bucket;
pub mod committable;
pub mod committer;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod partition;
pub mod pipeline;
pub mod sink;
pub mod staging;
pub mod storage;

// Re-export main types
pub use bucket::{
    BucketWriter, InProgressFile, InProgressFileRecoverable, PendingFile, PendingFileRecoverable,
    Recoverable, StorageBucketWriter,
};
pub use committable::Committable;
pub use committer::{CommitReport, FailedCommit, FileCommitter};
pub use config::SinkConfig;
pub use partition::{JsonPartitionComputer, PartitionComputer, PartitionSpec};
pub use pipeline::{Sink, SinkStats, run_sink};
pub use sink::{
    AnyPartitionWriter, DynamicPartitionWriter, FileWriter, GroupedPartitionWriter,
    JsonLinesEncoder, PartitionWriter, RecordEncoder, SingleDirectoryWriter, WriterContext,
    WriterFactory, WriterStrategy,
};
pub use staging::{StagingFile, StagingPathAllocator, TaskAttempt};
pub use storage::{StorageProvider, StorageProviderRef};
