//! Second phase of the two-phase commit.
//!
//! The committer takes a batch of [`Committable`]s, possibly from several
//! workers and possibly after a restart, and finishes each one on its own:
//! pending tokens are recovered and published, in-progress tokens are cleaned
//! up. A failure is reported for that committable alone and the rest of the
//! batch carries on. Nothing is retried here; the caller decides whether to
//! resubmit a failed committable, and resubmitting is always safe.

use futures::{StreamExt, stream};
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::bucket::{BucketWriter, InProgressFileRecoverable, PendingFileRecoverable, Recoverable};
use crate::committable::Committable;
use crate::emit;
use crate::error::{CommitFailure, CommitSnafu, RecoverySnafu};
use crate::metrics::events::{CommitBatchCompleted, CommitFailed, CommitStage};

/// Default number of committables processed concurrently.
pub const DEFAULT_MAX_CONCURRENT_COMMITS: usize = 4;

/// A committable that could not be finished, handed back for a later retry.
#[derive(Debug)]
pub struct FailedCommit {
    pub committable: Committable,
    pub error: CommitFailure,
}

/// Outcome of one committed batch.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Pending files now visible at their final path.
    pub committed: usize,
    /// In-progress files cleaned up, including ones already gone.
    pub discarded: usize,
    pub failed: Vec<FailedCommit>,
}

impl CommitReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Take the failed committables, each marked for another attempt.
    pub fn into_retries(self) -> Vec<Committable> {
        self.failed
            .into_iter()
            .map(|failed| {
                let mut committable = failed.committable;
                committable.retry_later();
                committable
            })
            .collect()
    }
}

enum Outcome {
    Committed,
    Discarded,
}

/// Drives committables through the commit protocol.
#[derive(Debug, Clone)]
pub struct FileCommitter {
    bucket_writer: Arc<dyn BucketWriter>,
    max_concurrent: usize,
}

impl FileCommitter {
    pub fn new(bucket_writer: Arc<dyn BucketWriter>) -> Self {
        Self {
            bucket_writer,
            max_concurrent: DEFAULT_MAX_CONCURRENT_COMMITS,
        }
    }

    /// Bound the number of committables in flight. Values below one are
    /// treated as one.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Commit or discard every committable in the batch.
    pub async fn commit(&self, batch: Vec<Committable>) -> CommitReport {
        let start = Instant::now();
        let total = batch.len();

        let results: Vec<_> = stream::iter(batch)
            .map(|committable| self.commit_one(committable))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut report = CommitReport::default();
        for result in results {
            match result {
                Ok(Outcome::Committed) => report.committed += 1,
                Ok(Outcome::Discarded) => report.discarded += 1,
                Err(failed) => report.failed.push(failed),
            }
        }

        emit!(CommitBatchCompleted {
            duration: start.elapsed(),
        });
        if report.is_success() {
            info!(
                total,
                committed = report.committed,
                discarded = report.discarded,
                "Commit batch completed"
            );
        } else {
            warn!(
                total,
                committed = report.committed,
                discarded = report.discarded,
                failed = report.failed.len(),
                "Commit batch completed with failures"
            );
        }
        report
    }

    async fn commit_one(&self, committable: Committable) -> Result<Outcome, FailedCommit> {
        let result = match committable.recoverable() {
            Recoverable::Pending(token) => {
                self.publish(token).await.map(|()| Outcome::Committed)
            }
            Recoverable::InProgress(token) => {
                self.discard(token).await.map(|_| Outcome::Discarded)
            }
        };

        result.map_err(|error| {
            warn!(
                bucket = %committable.bucket_id(),
                retries = committable.number_of_retries(),
                error = %error,
                "Failed to finish committable"
            );
            FailedCommit { committable, error }
        })
    }

    async fn publish(&self, token: &PendingFileRecoverable) -> Result<(), CommitFailure> {
        let pending = self
            .bucket_writer
            .recover_pending_file(token)
            .await
            .inspect_err(|_| {
                emit!(CommitFailed {
                    stage: CommitStage::Recover
                })
            })
            .context(RecoverySnafu)?;

        pending
            .commit_after_recovery()
            .await
            .inspect_err(|_| {
                emit!(CommitFailed {
                    stage: CommitStage::Commit
                })
            })
            .context(CommitSnafu)?;

        debug!(path = %token.target_path, "Committed pending file");
        Ok(())
    }

    async fn discard(&self, token: &InProgressFileRecoverable) -> Result<bool, CommitFailure> {
        let found = self
            .bucket_writer
            .cleanup_in_progress_file_recoverable(token)
            .await
            .inspect_err(|_| {
                emit!(CommitFailed {
                    stage: CommitStage::Cleanup
                })
            })
            .context(CommitSnafu)?;

        if !found {
            debug!(path = %token.staging_path, "In-progress file was already cleaned up");
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{InProgressFile, PendingFile};
    use crate::error::{CommitError, RecoveryError, WriteError};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls instead of touching storage.
    #[derive(Debug, Default)]
    struct RecordingBucketWriter {
        recovered: AtomicUsize,
        committed: Arc<AtomicUsize>,
        cleaned: AtomicUsize,
        missing: Mutex<HashSet<String>>,
    }

    #[derive(Debug)]
    struct RecordingPendingFile {
        committed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PendingFile for RecordingPendingFile {
        async fn commit(self: Box<Self>) -> Result<(), CommitError> {
            self.committed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn commit_after_recovery(self: Box<Self>) -> Result<(), CommitError> {
            self.committed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl BucketWriter for RecordingBucketWriter {
        async fn close_for_commit(
            &self,
            _file: InProgressFile,
        ) -> Result<(Box<dyn PendingFile>, PendingFileRecoverable), WriteError> {
            unreachable!("committer never closes files")
        }

        async fn close_for_recovery(
            &self,
            _file: InProgressFile,
        ) -> Result<InProgressFileRecoverable, WriteError> {
            unreachable!("committer never closes files")
        }

        async fn recover_pending_file(
            &self,
            token: &PendingFileRecoverable,
        ) -> Result<Box<dyn PendingFile>, RecoveryError> {
            if self.missing.lock().unwrap().contains(&token.staging_path) {
                return Err(RecoveryError::MissingStagedFile {
                    path: token.staging_path.clone(),
                });
            }
            self.recovered.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingPendingFile {
                committed: self.committed.clone(),
            }))
        }

        async fn cleanup_in_progress_file_recoverable(
            &self,
            _token: &InProgressFileRecoverable,
        ) -> Result<bool, CommitError> {
            self.cleaned.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn pending(seq: u64) -> Committable {
        Committable::pending(
            "p=p1",
            PendingFileRecoverable {
                staging_path: format!("_staging/task-0-0/p=p1/part-{seq}"),
                target_path: format!("p=p1/part-r-0-0-{seq}"),
                size: 1,
                record_count: 1,
            },
        )
    }

    fn in_progress(seq: u64) -> Committable {
        Committable::in_progress(
            "p=p2",
            InProgressFileRecoverable {
                staging_path: format!("_staging/task-0-0/p=p2/part-{seq}"),
                size: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_commit_pending_and_in_progress() {
        let writer = Arc::new(RecordingBucketWriter::default());
        let committer = FileCommitter::new(writer.clone());

        let batch = vec![
            pending(0),
            pending(1),
            pending(2),
            in_progress(0),
            in_progress(1),
        ];
        let report = committer.commit(batch).await;

        assert!(report.is_success());
        assert_eq!(report.committed, 3);
        assert_eq!(report.discarded, 2);
        assert_eq!(writer.recovered.load(Ordering::SeqCst), 3);
        assert_eq!(writer.committed.load(Ordering::SeqCst), 3);
        assert_eq!(writer.cleaned.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_returned() {
        let writer = Arc::new(RecordingBucketWriter::default());
        writer
            .missing
            .lock()
            .unwrap()
            .insert("_staging/task-0-0/p=p1/part-1".to_string());
        let committer = FileCommitter::new(writer.clone()).with_max_concurrent(1);

        let report = committer
            .commit(vec![pending(0), pending(1), in_progress(0)])
            .await;

        assert_eq!(report.committed, 1);
        assert_eq!(report.discarded, 1);
        assert_eq!(report.failed.len(), 1);
        let failed = &report.failed[0];
        assert_eq!(failed.committable.number_of_retries(), 0);
        assert!(matches!(
            failed.error,
            CommitFailure::Recovery {
                source: RecoveryError::MissingStagedFile { .. }
            }
        ));

        let retries = report.into_retries();
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].number_of_retries(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let committer = FileCommitter::new(Arc::new(RecordingBucketWriter::default()));
        let report = committer.commit(Vec::new()).await;

        assert!(report.is_success());
        assert_eq!(report.committed + report.discarded, 0);
    }
}
