//! The unit handed from writers to the commit phase.

use serde::{Deserialize, Serialize};

use crate::bucket::{InProgressFileRecoverable, PendingFileRecoverable, Recoverable};

/// A bucket identifier paired with exactly one recoverable token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committable {
    bucket_id: String,
    recoverable: Recoverable,
    #[serde(default)]
    retries: u32,
}

impl Committable {
    /// A committable for a cleanly closed file.
    pub fn pending(bucket_id: impl Into<String>, token: PendingFileRecoverable) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            recoverable: Recoverable::Pending(token),
            retries: 0,
        }
    }

    /// A committable for a file left open at a batch boundary.
    pub fn in_progress(bucket_id: impl Into<String>, token: InProgressFileRecoverable) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            recoverable: Recoverable::InProgress(token),
            retries: 0,
        }
    }

    /// Rendered partition path of the file, empty when unpartitioned.
    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    pub fn recoverable(&self) -> &Recoverable {
        &self.recoverable
    }

    pub fn has_pending_file(&self) -> bool {
        matches!(self.recoverable, Recoverable::Pending(_))
    }

    pub fn has_in_progress_file(&self) -> bool {
        matches!(self.recoverable, Recoverable::InProgress(_))
    }

    pub fn pending_file(&self) -> Option<&PendingFileRecoverable> {
        match &self.recoverable {
            Recoverable::Pending(token) => Some(token),
            Recoverable::InProgress(_) => None,
        }
    }

    pub fn in_progress_file(&self) -> Option<&InProgressFileRecoverable> {
        match &self.recoverable {
            Recoverable::InProgress(token) => Some(token),
            Recoverable::Pending(_) => None,
        }
    }

    /// How many times this committable has been handed back for a retry.
    pub fn number_of_retries(&self) -> u32 {
        self.retries
    }

    /// Mark this committable for another attempt.
    pub fn retry_later(&mut self) {
        self.retries += 1;
    }

    /// Demote to a cleanup-only committable for the same staged file.
    ///
    /// A pending file from an abandoned batch must never be published; the
    /// committer deletes its staged bytes instead.
    pub fn into_discard(self) -> Self {
        let Self {
            bucket_id,
            recoverable,
            retries,
        } = self;
        let token = match recoverable {
            Recoverable::Pending(token) => InProgressFileRecoverable {
                staging_path: token.staging_path,
                size: token.size,
            },
            Recoverable::InProgress(token) => token,
        };
        Self {
            bucket_id,
            recoverable: Recoverable::InProgress(token),
            retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Committable {
        Committable::pending(
            "p=p1",
            PendingFileRecoverable {
                staging_path: "_staging/task-0-0/p=p1/part-0".to_string(),
                target_path: "p=p1/part-r-0-0-0.ndjson".to_string(),
                size: 3,
                record_count: 1,
            },
        )
    }

    #[test]
    fn test_exactly_one_token() {
        let committable = pending();
        assert!(committable.has_pending_file());
        assert!(!committable.has_in_progress_file());
        assert!(committable.pending_file().is_some());
        assert!(committable.in_progress_file().is_none());

        let committable = Committable::in_progress(
            "",
            InProgressFileRecoverable {
                staging_path: "_staging/task-0-0/part-1".to_string(),
                size: 0,
            },
        );
        assert!(committable.has_in_progress_file());
        assert!(committable.pending_file().is_none());
    }

    #[test]
    fn test_retry_counter() {
        let mut committable = pending();
        assert_eq!(committable.number_of_retries(), 0);
        committable.retry_later();
        committable.retry_later();
        assert_eq!(committable.number_of_retries(), 2);
    }

    #[test]
    fn test_into_discard_keeps_staged_file() {
        let mut committable = pending();
        committable.retry_later();

        let discarded = committable.into_discard();
        assert!(discarded.has_in_progress_file());
        assert_eq!(discarded.bucket_id(), "p=p1");
        assert_eq!(discarded.number_of_retries(), 1);
        let token = discarded.in_progress_file().unwrap();
        assert_eq!(token.staging_path, "_staging/task-0-0/p=p1/part-0");
        assert_eq!(token.size, 3);

        assert_eq!(discarded.clone().into_discard(), discarded);
    }

    #[test]
    fn test_serde_keeps_retries_and_kind() {
        let mut committable = pending();
        committable.retry_later();

        let json = serde_json::to_string(&committable).unwrap();
        let restored: Committable = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, committable);
        assert!(restored.has_pending_file());
    }
}
