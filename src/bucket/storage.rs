//! [`BucketWriter`] backed by a [`StorageProvider`].
//!
//! Closing a file uploads its bytes to the staging path. Committing is a
//! server-side rename from the staging path to the final path, which either
//! fully happens or leaves the staged file where it was.

use async_trait::async_trait;
use object_store::PutPayload;
use object_store::path::Path;
use snafu::prelude::*;
use tracing::{debug, warn};

use super::{
    BucketWriter, InProgressFile, InProgressFileRecoverable, PendingFile, PendingFileRecoverable,
};
use crate::emit;
use crate::error::{
    CommitError, DiscardSnafu, InspectSnafu, LengthMismatchSnafu, MissingStagedFileSnafu,
    PublishSnafu, RecoveryError, StageSnafu, StorageError, VanishedSnafu, WriteError,
};
use crate::metrics::events::{CloseKind, FileCommitted, FileDiscarded, FileStaged};
use crate::storage::StorageProviderRef;

/// Stages and publishes files through an object store.
#[derive(Debug, Clone)]
pub struct StorageBucketWriter {
    storage: StorageProviderRef,
}

impl StorageBucketWriter {
    pub fn new(storage: StorageProviderRef) -> Self {
        Self { storage }
    }

    async fn stage(&self, file: InProgressFile, kind: CloseKind) -> Result<Staged, WriteError> {
        let (file, buffer, records) = file.into_parts();
        let size = buffer.len() as u64;

        self.storage
            .put_payload(&file.staging_path, PutPayload::from(buffer.freeze()))
            .await
            .context(StageSnafu {
                path: file.staging_path.to_string(),
            })?;

        emit!(FileStaged { bytes: size, kind });
        debug!(
            path = %file.staging_path,
            bytes = size,
            records,
            "Staged file"
        );

        Ok(Staged {
            staging_path: file.staging_path,
            target_path: file.target_path,
            size,
            records,
        })
    }
}

struct Staged {
    staging_path: Path,
    target_path: Path,
    size: u64,
    records: u64,
}

#[async_trait]
impl BucketWriter for StorageBucketWriter {
    async fn close_for_commit(
        &self,
        file: InProgressFile,
    ) -> Result<(Box<dyn PendingFile>, PendingFileRecoverable), WriteError> {
        let staged = self.stage(file, CloseKind::Commit).await?;

        let token = PendingFileRecoverable {
            staging_path: staged.staging_path.to_string(),
            target_path: staged.target_path.to_string(),
            size: staged.size,
            record_count: staged.records,
        };
        let pending: Box<dyn PendingFile> = Box::new(StagedPendingFile {
            storage: self.storage.clone(),
            staging_path: staged.staging_path,
            target_path: staged.target_path,
        });

        Ok((pending, token))
    }

    async fn close_for_recovery(
        &self,
        file: InProgressFile,
    ) -> Result<InProgressFileRecoverable, WriteError> {
        let staged = self.stage(file, CloseKind::Recovery).await?;

        Ok(InProgressFileRecoverable {
            staging_path: staged.staging_path.to_string(),
            size: staged.size,
        })
    }

    async fn recover_pending_file(
        &self,
        token: &PendingFileRecoverable,
    ) -> Result<Box<dyn PendingFile>, RecoveryError> {
        let staging_path = token.staging_path().context(InspectSnafu {
            path: token.staging_path.clone(),
        })?;
        let target_path = token.target_path().context(InspectSnafu {
            path: token.target_path.clone(),
        })?;

        match self.storage.head(&staging_path).await {
            Ok(meta) => {
                let actual = meta.size as u64;
                ensure!(
                    actual == token.size,
                    LengthMismatchSnafu {
                        path: token.staging_path.clone(),
                        expected: token.size,
                        actual,
                    }
                );
                Ok(Box::new(StagedPendingFile {
                    storage: self.storage.clone(),
                    staging_path,
                    target_path,
                }))
            }
            Err(e) if e.is_not_found() => {
                // A previous attempt may have published the file before it
                // could report success.
                match self.storage.head(&target_path).await {
                    Ok(meta) if meta.size as u64 == token.size => {
                        debug!(path = %target_path, "Pending file was already committed");
                        Ok(Box::new(CommittedPendingFile { target_path }))
                    }
                    Ok(_) => MissingStagedFileSnafu {
                        path: token.staging_path.clone(),
                    }
                    .fail(),
                    Err(e) if e.is_not_found() => MissingStagedFileSnafu {
                        path: token.staging_path.clone(),
                    }
                    .fail(),
                    Err(source) => Err(RecoveryError::Inspect {
                        path: token.target_path.clone(),
                        source,
                    }),
                }
            }
            Err(source) => Err(RecoveryError::Inspect {
                path: token.staging_path.clone(),
                source,
            }),
        }
    }

    async fn cleanup_in_progress_file_recoverable(
        &self,
        token: &InProgressFileRecoverable,
    ) -> Result<bool, CommitError> {
        let path = token.staging_path().context(DiscardSnafu {
            path: token.staging_path.clone(),
        })?;

        // Some stores treat deleting a missing object as success, so look first.
        let found = self.storage.exists(&path).await.context(DiscardSnafu {
            path: token.staging_path.clone(),
        })?;
        let deleted = if found {
            match self.storage.delete(&path).await {
                Ok(()) => true,
                Err(e) if e.is_not_found() => false,
                Err(source) => {
                    return Err(CommitError::Discard {
                        path: token.staging_path.clone(),
                        source,
                    });
                }
            }
        } else {
            false
        };

        emit!(FileDiscarded { found: deleted });
        debug!(path = %path, found = deleted, "Cleaned up in-progress file");
        Ok(deleted)
    }
}

/// A pending file whose bytes sit at the staging path.
#[derive(Debug)]
struct StagedPendingFile {
    storage: StorageProviderRef,
    staging_path: Path,
    target_path: Path,
}

impl StagedPendingFile {
    async fn publish(&self) -> Result<(), StorageError> {
        self.storage
            .rename(&self.staging_path, &self.target_path)
            .await
    }
}

#[async_trait]
impl PendingFile for StagedPendingFile {
    async fn commit(self: Box<Self>) -> Result<(), CommitError> {
        self.publish().await.context(PublishSnafu {
            from: self.staging_path.to_string(),
            to: self.target_path.to_string(),
        })?;

        emit!(FileCommitted { recovered: false });
        debug!(
            "Committed file: {} -> {}",
            self.staging_path, self.target_path
        );
        Ok(())
    }

    async fn commit_after_recovery(self: Box<Self>) -> Result<(), CommitError> {
        match self.publish().await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                // Lost a race with an earlier attempt of the same commit.
                let published = self.storage.exists(&self.target_path).await.context(
                    PublishSnafu {
                        from: self.staging_path.to_string(),
                        to: self.target_path.to_string(),
                    },
                )?;
                if !published {
                    warn!(
                        from = %self.staging_path,
                        to = %self.target_path,
                        "Staged file vanished before commit"
                    );
                    return VanishedSnafu {
                        from: self.staging_path.to_string(),
                        to: self.target_path.to_string(),
                    }
                    .fail();
                }
            }
            Err(source) => {
                return Err(CommitError::Publish {
                    from: self.staging_path.to_string(),
                    to: self.target_path.to_string(),
                    source,
                });
            }
        }

        emit!(FileCommitted { recovered: true });
        debug!(
            "Committed recovered file: {} -> {}",
            self.staging_path, self.target_path
        );
        Ok(())
    }
}

/// A pending file that an earlier attempt already published.
#[derive(Debug)]
struct CommittedPendingFile {
    target_path: Path,
}

#[async_trait]
impl PendingFile for CommittedPendingFile {
    async fn commit(self: Box<Self>) -> Result<(), CommitError> {
        debug!(path = %self.target_path, "File already committed");
        Ok(())
    }

    async fn commit_after_recovery(self: Box<Self>) -> Result<(), CommitError> {
        debug!(path = %self.target_path, "File already committed");
        Ok(())
    }
}
