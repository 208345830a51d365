//! Batch driver for the command line tool.
//!
//! Stands in for the checkpointing engine the sink normally runs under: it
//! feeds NDJSON records to a partition writer, forms a batch boundary every
//! `batch_size` records and hands each batch of committables to the
//! committer.

use serde_json::Value;
use snafu::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::bucket::{BucketWriter, StorageBucketWriter};
use crate::committable::Committable;
use crate::committer::{CommitReport, FileCommitter};
use crate::config::SinkConfig;
use crate::error::{BatchFailedSnafu, MalformedRecordSnafu, ReadInputSnafu, SinkError};
use crate::partition::JsonPartitionComputer;
use crate::sink::{
    AnyPartitionWriter, JsonLinesEncoder, PartitionWriter, SingleDirectoryWriter, WriterContext,
    WriterFactory, WriterStrategy,
};
use crate::staging::StagingPathAllocator;
use crate::storage::StorageProvider;

/// Statistics about a sink run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub records_written: usize,
    pub batches_committed: u64,
    pub files_committed: usize,
    pub files_discarded: usize,
}

/// A partition writer and a committer wired up from a [`SinkConfig`].
pub struct Sink {
    writer: AnyPartitionWriter<JsonPartitionComputer, Value>,
    committer: FileCommitter,
    batch_size: usize,
    records_in_batch: usize,
    /// Committables of completed batches whose commit failed.
    retries: Vec<Committable>,
    stats: SinkStats,
}

impl Sink {
    /// Build a sink for a validated configuration.
    pub async fn new(config: &SinkConfig) -> Result<Self, SinkError> {
        let storage = Arc::new(
            StorageProvider::for_url_with_options(
                &config.table_uri,
                config.storage_options.clone(),
            )
            .await?,
        );

        let allocator =
            StagingPathAllocator::new(storage.clone(), &config.staging_dir, config.task_attempt())
                .with_output_file_config(config.output_file_config());
        let leftovers = allocator.list_staged().await?;
        if !leftovers.is_empty() {
            warn!(
                dir = %allocator.task_dir(),
                count = leftovers.len(),
                "Found files staged by an earlier run of this attempt"
            );
        }

        let bucket_writer: Arc<dyn BucketWriter> = Arc::new(StorageBucketWriter::new(storage));
        let factory = WriterFactory::new(bucket_writer.clone(), JsonLinesEncoder);
        let computer = JsonPartitionComputer::new(config.partition_columns.clone())
            .with_default_partition_name(config.default_partition_name.clone());
        let context = WriterContext::new(computer, allocator, factory);
        let writer = match config.strategy {
            WriterStrategy::Single => AnyPartitionWriter::Single(
                SingleDirectoryWriter::new(context)
                    .with_static_partition(config.static_partition.clone()),
            ),
            strategy => AnyPartitionWriter::new(strategy, context),
        };
        let committer =
            FileCommitter::new(bucket_writer).with_max_concurrent(config.max_concurrent_commits);

        info!(
            table_uri = %config.table_uri,
            strategy = %config.strategy,
            worker = config.worker_id,
            generation = config.generation,
            "Sink ready"
        );

        Ok(Self {
            writer,
            committer,
            batch_size: config.batch_size,
            records_in_batch: 0,
            retries: Vec::new(),
            stats: SinkStats::default(),
        })
    }

    /// Write one record, committing the batch when it is full.
    pub async fn write(&mut self, record: Value) -> Result<(), SinkError> {
        self.writer.write(record).await?;
        self.records_in_batch += 1;
        self.stats.records_written += 1;

        if self.records_in_batch >= self.batch_size {
            self.checkpoint().await?;
        }
        Ok(())
    }

    /// Close the current batch and commit it, together with any committables
    /// left over from earlier failed commits.
    ///
    /// If the batch cannot be closed, every file it staged is discarded. If
    /// the commit fails, the failed committables are kept and resubmitted by
    /// the next checkpoint.
    pub async fn checkpoint(&mut self) -> Result<(), SinkError> {
        self.records_in_batch = 0;
        if let Err(e) = PartitionWriter::<Value>::close(&mut self.writer).await {
            self.discard_open_batch().await;
            return Err(e.into());
        }

        let mut committables = std::mem::take(&mut self.retries);
        committables.extend(PartitionWriter::<Value>::drain_committables(
            &mut self.writer,
        ));
        if committables.is_empty() {
            return Ok(());
        }
        let batch = self.stats.batches_committed + 1;
        debug!(batch, committables = committables.len(), "Committing batch");

        let report = self.committer.commit(committables).await;
        self.record(&report);
        if !report.is_success() {
            let failed = report.failed.len();
            self.retries = report.into_retries();
            return BatchFailedSnafu { batch, failed }.fail();
        }
        self.stats.batches_committed = batch;
        Ok(())
    }

    /// Discard everything written since the last checkpoint.
    ///
    /// Committables of completed batches that are still waiting for a retry
    /// get one more commit attempt; they belong to batches that were closed
    /// successfully.
    pub async fn abort(&mut self) -> Result<(), SinkError> {
        self.records_in_batch = 0;
        let aborted = PartitionWriter::<Value>::abort(&mut self.writer).await;
        self.discard_open_batch().await;
        aborted?;

        if !self.retries.is_empty() {
            let retries = std::mem::take(&mut self.retries);
            let report = self.committer.commit(retries).await;
            self.record(&report);
            self.retries = report.into_retries();
        }
        Ok(())
    }

    pub fn stats(&self) -> &SinkStats {
        &self.stats
    }

    /// Committables waiting to be resubmitted by the next checkpoint.
    pub fn pending_retries(&self) -> &[Committable] {
        &self.retries
    }

    /// Delete whatever the open batch staged, pending files included.
    async fn discard_open_batch(&mut self) {
        let committables: Vec<Committable> =
            PartitionWriter::<Value>::drain_committables(&mut self.writer)
                .into_iter()
                .map(Committable::into_discard)
                .collect();
        if committables.is_empty() {
            return;
        }

        debug!(committables = committables.len(), "Discarding open batch");
        let report = self.committer.commit(committables).await;
        self.record(&report);
    }

    fn record(&mut self, report: &CommitReport) {
        self.stats.files_committed += report.committed;
        self.stats.files_discarded += report.discarded;
        for failed in &report.failed {
            warn!(
                bucket = %failed.committable.bucket_id(),
                error = %failed.error,
                "Committable failed"
            );
        }
    }
}

/// Write every record of the input files through a sink and commit them.
///
/// On a write failure the open batch is discarded before the error is
/// returned; batches that were already committed stay visible.
pub async fn run_sink(config: &SinkConfig, inputs: &[PathBuf]) -> Result<SinkStats, SinkError> {
    let mut sink = Sink::new(config).await?;

    if let Err(e) = feed(&mut sink, inputs).await {
        if let Err(abort_error) = sink.abort().await {
            warn!(error = %abort_error, "Failed to discard open batch");
        }
        return Err(e);
    }
    sink.checkpoint().await?;

    Ok(sink.stats().clone())
}

async fn feed(sink: &mut Sink, inputs: &[PathBuf]) -> Result<(), SinkError> {
    for input in inputs {
        let path = input.display().to_string();
        let file = tokio::fs::File::open(input)
            .await
            .context(ReadInputSnafu { path: path.clone() })?;
        let mut lines = BufReader::new(file).lines();

        let mut line_number: usize = 0;
        while let Some(line) = lines
            .next_line()
            .await
            .context(ReadInputSnafu { path: path.clone() })?
        {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record: Value = serde_json::from_str(&line).context(MalformedRecordSnafu {
                line: line_number,
            })?;
            sink.write(record).await?;
        }
        debug!(input = %path, lines = line_number, "Finished input");
    }
    Ok(())
}
