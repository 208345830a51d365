//! Partition writer strategies.
//!
//! All three strategies share the same contract: records go in through
//! [`PartitionWriter::write`], and at a batch boundary [`PartitionWriter::close`]
//! turns every open file into a [`Committable`] that is collected with
//! [`PartitionWriter::drain_committables`]. They differ in how many files may
//! be open at once:
//!
//! | Strategy  | Open files             | Input assumption             |
//! |-----------|------------------------|------------------------------|
//! | Single    | at most one            | no partitioning              |
//! | Grouped   | at most one            | clustered by partition       |
//! | Dynamic   | one per seen partition | none                         |

use async_trait::async_trait;
use indexmap::IndexMap;
use snafu::prelude::*;
use tracing::{debug, info, warn};

use super::WriterStrategy;
use super::writer::{FileWriter, WriterFactory};
use crate::committable::Committable;
use crate::emit;
use crate::error::{ComputationSnafu, WriteError};
use crate::metrics::events::OpenPartitionWriters;
use crate::partition::{PartitionComputer, PartitionSpec, partition_path};
use crate::staging::StagingPathAllocator;

/// Routes records to per-partition files.
#[async_trait]
pub trait PartitionWriter<T: Send + 'static>: Send {
    /// Append a record to the file of its partition, opening one if needed.
    async fn write(&mut self, record: T) -> Result<(), WriteError>;

    /// Close every open file for commit.
    async fn close(&mut self) -> Result<(), WriteError>;

    /// Close every open file for cleanup only.
    async fn abort(&mut self) -> Result<(), WriteError>;

    /// Take the committables produced since the last drain.
    fn drain_committables(&mut self) -> Vec<Committable>;
}

/// What every strategy needs to open files.
pub struct WriterContext<C, R> {
    computer: C,
    allocator: StagingPathAllocator,
    factory: WriterFactory<R>,
}

impl<C, R> WriterContext<C, R> {
    pub fn new(computer: C, allocator: StagingPathAllocator, factory: WriterFactory<R>) -> Self {
        Self {
            computer,
            allocator,
            factory,
        }
    }

    fn open(&mut self, spec: &PartitionSpec) -> FileWriter<R> {
        let file = self.allocator.new_file(spec);
        self.factory.create(file)
    }
}

// ============================================================================
// Single directory
// ============================================================================

/// Writes everything into one file per batch.
///
/// An optional static partition nests the file under fixed `column=value`
/// directories.
pub struct SingleDirectoryWriter<C, R> {
    context: WriterContext<C, R>,
    static_partition: PartitionSpec,
    current: Option<FileWriter<R>>,
    committables: Vec<Committable>,
}

impl<C, R> SingleDirectoryWriter<C, R> {
    pub fn new(context: WriterContext<C, R>) -> Self {
        Self {
            context,
            static_partition: PartitionSpec::new(),
            current: None,
            committables: Vec::new(),
        }
    }

    pub fn with_static_partition(mut self, static_partition: PartitionSpec) -> Self {
        self.static_partition = static_partition;
        self
    }
}

#[async_trait]
impl<T, C, R> PartitionWriter<T> for SingleDirectoryWriter<C, R>
where
    T: Send + 'static,
    C: PartitionComputer<T, Output = R> + 'static,
    R: Send + Sync + 'static,
{
    async fn write(&mut self, record: T) -> Result<(), WriteError> {
        let projected = self
            .context
            .computer
            .project_record(record)
            .context(ComputationSnafu)?;

        let writer = self
            .current
            .get_or_insert_with(|| self.context.open(&self.static_partition));
        if let Err(e) = writer.write(&projected) {
            self.current = None;
            return Err(e);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WriteError> {
        if let Some(writer) = self.current.take() {
            let records = writer.record_count();
            self.committables.push(writer.close().await?);
            debug!(records, "Closed single directory writer");
        }
        Ok(())
    }

    async fn abort(&mut self) -> Result<(), WriteError> {
        if let Some(writer) = self.current.take() {
            self.committables.push(writer.abort().await?);
        }
        Ok(())
    }

    fn drain_committables(&mut self) -> Vec<Committable> {
        std::mem::take(&mut self.committables)
    }
}

// ============================================================================
// Grouped
// ============================================================================

/// Keeps one file open and rolls to a new one whenever the partition changes.
///
/// Input is expected to be clustered by partition. A partition that shows up
/// again after another one simply gets a second file.
pub struct GroupedPartitionWriter<C, R> {
    context: WriterContext<C, R>,
    current: Option<FileWriter<R>>,
    committables: Vec<Committable>,
}

impl<C, R> GroupedPartitionWriter<C, R> {
    pub fn new(context: WriterContext<C, R>) -> Self {
        Self {
            context,
            current: None,
            committables: Vec::new(),
        }
    }
}

#[async_trait]
impl<T, C, R> PartitionWriter<T> for GroupedPartitionWriter<C, R>
where
    T: Send + 'static,
    C: PartitionComputer<T, Output = R> + 'static,
    R: Send + Sync + 'static,
{
    async fn write(&mut self, record: T) -> Result<(), WriteError> {
        let spec = self
            .context
            .computer
            .generate_partitions(&record)
            .context(ComputationSnafu)?;
        let projected = self
            .context
            .computer
            .project_record(record)
            .context(ComputationSnafu)?;

        let key = partition_path(&spec);
        let switching = self
            .current
            .as_ref()
            .is_some_and(|writer| writer.bucket_id() != key);
        if switching && let Some(previous) = self.current.take() {
            debug!(from = %previous.bucket_id(), to = %key, "Partition changed");
            self.committables.push(previous.close().await?);
        }

        let writer = self
            .current
            .get_or_insert_with(|| self.context.open(&spec));
        if let Err(e) = writer.write(&projected) {
            self.current = None;
            return Err(e);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), WriteError> {
        if let Some(writer) = self.current.take() {
            self.committables.push(writer.close().await?);
        }
        Ok(())
    }

    async fn abort(&mut self) -> Result<(), WriteError> {
        if let Some(writer) = self.current.take() {
            self.committables.push(writer.abort().await?);
        }
        Ok(())
    }

    fn drain_committables(&mut self) -> Vec<Committable> {
        std::mem::take(&mut self.committables)
    }
}

// ============================================================================
// Dynamic
// ============================================================================

/// Keeps one open file per partition seen in the batch.
///
/// There is no cap on the number of open files; memory grows with the number
/// of distinct partitions in a batch.
pub struct DynamicPartitionWriter<C, R> {
    context: WriterContext<C, R>,
    writers: IndexMap<String, FileWriter<R>>,
    committables: Vec<Committable>,
}

impl<C, R> DynamicPartitionWriter<C, R> {
    pub fn new(context: WriterContext<C, R>) -> Self {
        Self {
            context,
            writers: IndexMap::new(),
            committables: Vec::new(),
        }
    }

    /// Number of files currently open.
    pub fn open_writers(&self) -> usize {
        self.writers.len()
    }

    async fn close_all(&mut self, for_commit: bool) -> Result<(), WriteError> {
        let count = self.writers.len();
        let mut first_error = None;

        for (key, writer) in self.writers.drain(..) {
            let closed = if for_commit {
                writer.close().await
            } else {
                writer.abort().await
            };
            match closed {
                Ok(committable) => self.committables.push(committable),
                Err(e) => {
                    warn!(bucket = %key, error = %e, "Failed to close partition writer");
                    first_error.get_or_insert(e);
                }
            }
        }
        emit!(OpenPartitionWriters { count: 0 });

        if count > 0 {
            info!(writers = count, for_commit, "Closed partition writers");
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<T, C, R> PartitionWriter<T> for DynamicPartitionWriter<C, R>
where
    T: Send + 'static,
    C: PartitionComputer<T, Output = R> + 'static,
    R: Send + Sync + 'static,
{
    async fn write(&mut self, record: T) -> Result<(), WriteError> {
        let spec = self
            .context
            .computer
            .generate_partitions(&record)
            .context(ComputationSnafu)?;
        let projected = self
            .context
            .computer
            .project_record(record)
            .context(ComputationSnafu)?;

        let key = partition_path(&spec);
        let opened = !self.writers.contains_key(&key);
        let writer = self
            .writers
            .entry(key.clone())
            .or_insert_with(|| self.context.open(&spec));

        let result = writer.write(&projected);
        if result.is_err() {
            self.writers.shift_remove(&key);
        }
        if opened || result.is_err() {
            emit!(OpenPartitionWriters {
                count: self.writers.len()
            });
        }
        result
    }

    async fn close(&mut self) -> Result<(), WriteError> {
        self.close_all(true).await
    }

    async fn abort(&mut self) -> Result<(), WriteError> {
        self.close_all(false).await
    }

    fn drain_committables(&mut self) -> Vec<Committable> {
        std::mem::take(&mut self.committables)
    }
}

// ============================================================================
// Strategy selection
// ============================================================================

/// A partition writer chosen at construction time from a [`WriterStrategy`].
pub enum AnyPartitionWriter<C, R> {
    Single(SingleDirectoryWriter<C, R>),
    Grouped(GroupedPartitionWriter<C, R>),
    Dynamic(DynamicPartitionWriter<C, R>),
}

impl<C, R> AnyPartitionWriter<C, R> {
    pub fn new(strategy: WriterStrategy, context: WriterContext<C, R>) -> Self {
        match strategy {
            WriterStrategy::Single => Self::Single(SingleDirectoryWriter::new(context)),
            WriterStrategy::Grouped => Self::Grouped(GroupedPartitionWriter::new(context)),
            WriterStrategy::Dynamic => Self::Dynamic(DynamicPartitionWriter::new(context)),
        }
    }

    pub fn strategy(&self) -> WriterStrategy {
        match self {
            Self::Single(_) => WriterStrategy::Single,
            Self::Grouped(_) => WriterStrategy::Grouped,
            Self::Dynamic(_) => WriterStrategy::Dynamic,
        }
    }
}

#[async_trait]
impl<T, C, R> PartitionWriter<T> for AnyPartitionWriter<C, R>
where
    T: Send + 'static,
    C: PartitionComputer<T, Output = R> + 'static,
    R: Send + Sync + 'static,
{
    async fn write(&mut self, record: T) -> Result<(), WriteError> {
        match self {
            Self::Single(w) => PartitionWriter::<T>::write(w, record).await,
            Self::Grouped(w) => PartitionWriter::<T>::write(w, record).await,
            Self::Dynamic(w) => PartitionWriter::<T>::write(w, record).await,
        }
    }

    async fn close(&mut self) -> Result<(), WriteError> {
        match self {
            Self::Single(w) => PartitionWriter::<T>::close(w).await,
            Self::Grouped(w) => PartitionWriter::<T>::close(w).await,
            Self::Dynamic(w) => PartitionWriter::<T>::close(w).await,
        }
    }

    async fn abort(&mut self) -> Result<(), WriteError> {
        match self {
            Self::Single(w) => PartitionWriter::<T>::abort(w).await,
            Self::Grouped(w) => PartitionWriter::<T>::abort(w).await,
            Self::Dynamic(w) => PartitionWriter::<T>::abort(w).await,
        }
    }

    fn drain_committables(&mut self) -> Vec<Committable> {
        match self {
            Self::Single(w) => PartitionWriter::<T>::drain_committables(w),
            Self::Grouped(w) => PartitionWriter::<T>::drain_committables(w),
            Self::Dynamic(w) => PartitionWriter::<T>::drain_committables(w),
        }
    }
}
