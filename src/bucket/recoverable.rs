//! Durable tokens for staged files.
//!
//! A token is everything needed to finish a staged file without the writer
//! that produced it. Tokens are plain serde values so they can travel through
//! whatever durable channel the coordinator uses between close and commit.

use object_store::path::Path;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::error::{InvalidPathSnafu, StorageError};

/// Proof that a file was closed cleanly and may be committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFileRecoverable {
    /// Where the closed bytes are staged.
    pub staging_path: String,
    /// Where the file becomes visible on commit.
    pub target_path: String,
    /// Staged length in bytes.
    pub size: u64,
    /// Number of records in the file.
    pub record_count: u64,
}

impl PendingFileRecoverable {
    pub fn staging_path(&self) -> Result<Path, StorageError> {
        parse_path(&self.staging_path)
    }

    pub fn target_path(&self) -> Result<Path, StorageError> {
        parse_path(&self.target_path)
    }
}

/// Proof that a file was still open at a batch boundary. Only good for cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InProgressFileRecoverable {
    pub staging_path: String,
    pub size: u64,
}

impl InProgressFileRecoverable {
    pub fn staging_path(&self) -> Result<Path, StorageError> {
        parse_path(&self.staging_path)
    }
}

/// Either kind of token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Recoverable {
    Pending(PendingFileRecoverable),
    InProgress(InProgressFileRecoverable),
}

fn parse_path(path: &str) -> Result<Path, StorageError> {
    Path::parse(path).context(InvalidPathSnafu { path })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_keeps_kinds_apart() {
        let pending = Recoverable::Pending(PendingFileRecoverable {
            staging_path: "_staging/task-0-0/p=a/part-0".to_string(),
            target_path: "p=a/part-x-0-0-0.ndjson".to_string(),
            size: 12,
            record_count: 2,
        });
        let json = serde_json::to_value(&pending).unwrap();
        assert_eq!(json["type"], "pending");
        assert_eq!(json["size"], 12);

        let in_progress: Recoverable = serde_json::from_value(serde_json::json!({
            "type": "in_progress",
            "staging_path": "_staging/task-0-0/part-3",
            "size": 5,
        }))
        .unwrap();
        assert!(matches!(in_progress, Recoverable::InProgress(_)));
    }

    #[test]
    fn test_in_progress_payload_is_not_a_pending_token() {
        let result = serde_json::from_value::<Recoverable>(serde_json::json!({
            "type": "pending",
            "staging_path": "_staging/task-0-0/part-3",
            "size": 5,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_stored_paths_parse_back() {
        let token = InProgressFileRecoverable {
            staging_path: "_staging/task-1-2/p=a/part-0".to_string(),
            size: 0,
        };
        assert_eq!(
            token.staging_path().unwrap().as_ref(),
            "_staging/task-1-2/p=a/part-0"
        );

        let broken = InProgressFileRecoverable {
            staging_path: "_staging//../part-0".to_string(),
            size: 0,
        };
        assert!(matches!(
            broken.staging_path(),
            Err(StorageError::InvalidPath { .. })
        ));
    }
}
