//! File lifecycle: in-progress, pending, committed or discarded.
//!
//! A [`BucketWriter`] opens [`InProgressFile`]s, closes them into either a
//! committable pending file or a cleanup-only token, and rebuilds pending
//! files from their tokens after a restart. Committing an in-progress token
//! does not type-check: [`BucketWriter::recover_pending_file`] only accepts a
//! [`PendingFileRecoverable`].

mod recoverable;
mod storage;

pub use recoverable::{InProgressFileRecoverable, PendingFileRecoverable, Recoverable};
pub use storage::StorageBucketWriter;

use async_trait::async_trait;
use bytes::BytesMut;
use std::fmt::Debug;

use crate::error::{CommitError, RecoveryError, WriteError};
use crate::staging::StagingFile;

/// A file that is still being appended to.
///
/// Bytes accumulate in memory and are staged in one upload when the file is
/// closed, so nothing touches storage while records are being written.
#[derive(Debug)]
pub struct InProgressFile {
    file: StagingFile,
    buffer: BytesMut,
    records: u64,
}

impl InProgressFile {
    fn new(file: StagingFile) -> Self {
        Self {
            file,
            buffer: BytesMut::new(),
            records: 0,
        }
    }

    /// Append one encoded record.
    ///
    /// If `encode` fails, whatever it wrote is rolled back and the record is
    /// not counted.
    pub fn append<E>(
        &mut self,
        encode: impl FnOnce(&mut BytesMut) -> Result<(), E>,
    ) -> Result<(), E> {
        let mark = self.buffer.len();
        match encode(&mut self.buffer) {
            Ok(()) => {
                self.records += 1;
                Ok(())
            }
            Err(e) => {
                self.buffer.truncate(mark);
                Err(e)
            }
        }
    }

    pub fn staging_file(&self) -> &StagingFile {
        &self.file
    }

    /// Bytes buffered so far.
    pub fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Records appended so far.
    pub fn record_count(&self) -> u64 {
        self.records
    }

    pub(crate) fn into_parts(self) -> (StagingFile, BytesMut, u64) {
        (self.file, self.buffer, self.records)
    }
}

/// A cleanly closed file waiting to be published.
///
/// Both methods consume the handle, so a pending file is committed at most
/// once through any given handle.
#[async_trait]
pub trait PendingFile: Send + Debug {
    /// Publish a file that was just closed by this process.
    async fn commit(self: Box<Self>) -> Result<(), CommitError>;

    /// Publish a file rebuilt from its token. Succeeds if an earlier attempt
    /// already published it.
    async fn commit_after_recovery(self: Box<Self>) -> Result<(), CommitError>;
}

/// Creates, closes and recovers staged files.
#[async_trait]
pub trait BucketWriter: Send + Sync + Debug {
    /// Start a new file for an allocated staging slot. No I/O happens here.
    fn open_new(&self, file: StagingFile) -> InProgressFile {
        InProgressFile::new(file)
    }

    /// Stage the file's bytes and hand back a committable pending file.
    async fn close_for_commit(
        &self,
        file: InProgressFile,
    ) -> Result<(Box<dyn PendingFile>, PendingFileRecoverable), WriteError>;

    /// Stage whatever was written so far and return a cleanup-only token.
    async fn close_for_recovery(
        &self,
        file: InProgressFile,
    ) -> Result<InProgressFileRecoverable, WriteError>;

    /// Rebuild a pending file from its token.
    async fn recover_pending_file(
        &self,
        token: &PendingFileRecoverable,
    ) -> Result<Box<dyn PendingFile>, RecoveryError>;

    /// Delete the staged bytes behind an in-progress token.
    ///
    /// Returns `false` when there was nothing left to delete.
    async fn cleanup_in_progress_file_recoverable(
        &self,
        token: &InProgressFileRecoverable,
    ) -> Result<bool, CommitError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::PartitionSpec;
    use crate::staging::{StagingPathAllocator, TaskAttempt};
    use crate::storage::StorageProvider;
    use bytes::BufMut;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_failed_append_rolls_back() {
        let storage = StorageProvider::for_url("memory://bucket-append")
            .await
            .unwrap();
        let mut allocator =
            StagingPathAllocator::new(Arc::new(storage), "_staging", TaskAttempt::new(0, 0));
        let mut file = InProgressFile::new(allocator.new_file(&PartitionSpec::new()));

        file.append(|buf| {
            buf.put_slice(b"first\n");
            Ok::<_, ()>(())
        })
        .unwrap();
        let result = file.append(|buf| {
            buf.put_slice(b"half");
            Err(())
        });

        assert!(result.is_err());
        assert_eq!(file.size(), 6);
        assert_eq!(file.record_count(), 1);
    }
}
