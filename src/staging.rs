//! Staging path allocation.
//!
//! Every worker attempt gets its own namespace under the staging directory,
//! and files inside it are numbered per partition:
//!
//! ## Directory Structure
//!
//! ```text
//! table_uri/
//! ├── _staging/                       # Uncommitted files
//! │   └── task-{worker}-{generation}/
//! │       ├── part-0                  # Unpartitioned files
//! │       └── p=p1/
//! │           ├── part-0
//! │           └── part-1
//! └── p=p1/                           # Committed files
//!     └── part-{run}-{worker}-{generation}-{seq}.ndjson
//! ```
//!
//! Allocation is pure path arithmetic. Nothing is created on storage until a
//! writer stages its bytes.

use object_store::path::Path;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::StorageError;
use crate::partition::{PartitionSpec, escape_path_name, partition_path};
use crate::storage::StorageProviderRef;

/// Default directory for staged files, relative to the table root.
pub const DEFAULT_STAGING_DIR: &str = "_staging";

/// Identity of one execution of one parallel worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskAttempt {
    /// Index of the parallel worker.
    pub worker: u32,
    /// Bumped every time the worker is restarted.
    pub generation: u64,
}

impl TaskAttempt {
    pub fn new(worker: u32, generation: u64) -> Self {
        Self { worker, generation }
    }
}

impl fmt::Display for TaskAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}-{}", self.worker, self.generation)
    }
}

/// Naming of output files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFileConfig {
    /// Leading part of every file name.
    pub prefix: String,
    /// Trailing part of committed file names, e.g. `.ndjson`.
    pub suffix: String,
}

impl Default for OutputFileConfig {
    fn default() -> Self {
        Self {
            prefix: "part".to_string(),
            suffix: String::new(),
        }
    }
}

/// A staging file slot: where the bytes go now, and where they go on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingFile {
    /// Uncommitted location inside the attempt's namespace.
    pub staging_path: Path,
    /// Final location, relative to the table root.
    pub target_path: Path,
    /// Rendered partition path (`p=a/q=b`), empty when unpartitioned.
    pub bucket_id: String,
    /// Per-partition sequence number.
    pub sequence: u64,
}

/// Hands out collision-free staging paths for one task attempt.
///
/// Sequence numbers are tracked per partition path and only ever grow, so an
/// allocator never returns the same path twice. Files from different attempts
/// live in different `task-*` directories, and committed names carry a
/// per-allocator run id so they never collide across restarts either.
#[derive(Debug)]
pub struct StagingPathAllocator {
    storage: StorageProviderRef,
    attempt: TaskAttempt,
    task_dir: Path,
    file_config: OutputFileConfig,
    run_id: Uuid,
    sequences: HashMap<String, u64>,
}

impl StagingPathAllocator {
    /// Create an allocator rooted at `staging_dir` for the given attempt.
    pub fn new(storage: StorageProviderRef, staging_dir: &str, attempt: TaskAttempt) -> Self {
        let task_dir = Path::from(staging_dir).child(attempt.to_string());
        Self {
            storage,
            attempt,
            task_dir,
            file_config: OutputFileConfig::default(),
            run_id: Uuid::now_v7(),
            sequences: HashMap::new(),
        }
    }

    /// Set the prefix and suffix used for file names.
    pub fn with_output_file_config(mut self, file_config: OutputFileConfig) -> Self {
        self.file_config = file_config;
        self
    }

    /// The attempt this allocator serves.
    pub fn attempt(&self) -> TaskAttempt {
        self.attempt
    }

    /// The attempt's staging namespace, e.g. `_staging/task-0-0`.
    pub fn task_dir(&self) -> &Path {
        &self.task_dir
    }

    /// Allocate a fresh staging file for a partition.
    pub fn new_file(&mut self, spec: &PartitionSpec) -> StagingFile {
        let bucket_id = partition_path(spec);
        let counter = self.sequences.entry(bucket_id.clone()).or_insert(0);
        let sequence = *counter;
        *counter += 1;

        let staging_name = format!("{}-{}", self.file_config.prefix, sequence);
        let target_name = format!(
            "{}-{}-{}-{}-{}{}",
            self.file_config.prefix,
            self.run_id,
            self.attempt.worker,
            self.attempt.generation,
            sequence,
            self.file_config.suffix
        );

        let staging_path = nest(self.task_dir.clone(), spec).child(staging_name);
        let target_path = nest(Path::default(), spec).child(target_name);

        StagingFile {
            staging_path,
            target_path,
            bucket_id,
            sequence,
        }
    }

    /// List every file currently staged in this attempt's namespace.
    pub async fn list_staged(&self) -> Result<Vec<Path>, StorageError> {
        self.storage.list_with_prefix(&self.task_dir).await
    }
}

fn nest(base: Path, spec: &PartitionSpec) -> Path {
    spec.iter().fold(base, |path, (column, value)| {
        path.child(format!(
            "{}={}",
            escape_path_name(column),
            escape_path_name(value)
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageProvider;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn allocator(attempt: TaskAttempt) -> StagingPathAllocator {
        let storage = StorageProvider::for_url("memory://staging-tests")
            .await
            .unwrap();
        StagingPathAllocator::new(Arc::new(storage), DEFAULT_STAGING_DIR, attempt)
    }

    fn spec(pairs: &[(&str, &str)]) -> PartitionSpec {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_unpartitioned_file_nests_under_task_dir() {
        let mut allocator = allocator(TaskAttempt::new(0, 0)).await;
        let file = allocator.new_file(&PartitionSpec::new());

        assert_eq!(file.staging_path.as_ref(), "_staging/task-0-0/part-0");
        assert_eq!(file.bucket_id, "");
        assert_eq!(file.target_path.parts().count(), 1);
    }

    #[tokio::test]
    async fn test_partitioned_file_nests_in_spec_order() {
        let mut allocator = allocator(TaskAttempt::new(3, 7)).await;
        let file = allocator.new_file(&spec(&[("p", "p1"), ("q", "q2")]));

        assert_eq!(file.staging_path.as_ref(), "_staging/task-3-7/p=p1/q=q2/part-0");
        assert_eq!(file.bucket_id, "p=p1/q=q2");
        assert!(file.target_path.as_ref().starts_with("p=p1/q=q2/part-"));
        assert!(file.target_path.as_ref().ends_with("-3-7-0"));
    }

    #[tokio::test]
    async fn test_sequence_is_per_partition() {
        let mut allocator = allocator(TaskAttempt::new(0, 0)).await;
        let a0 = allocator.new_file(&spec(&[("p", "a")]));
        let b0 = allocator.new_file(&spec(&[("p", "b")]));
        let a1 = allocator.new_file(&spec(&[("p", "a")]));

        assert_eq!(a0.sequence, 0);
        assert_eq!(b0.sequence, 0);
        assert_eq!(a1.sequence, 1);
        assert_eq!(a1.staging_path.as_ref(), "_staging/task-0-0/p=a/part-1");
    }

    #[tokio::test]
    async fn test_never_returns_the_same_path_twice() {
        let mut allocator = allocator(TaskAttempt::new(1, 2)).await;
        let keys = ["a", "b", "a", "c", "a", "b"];

        let mut staging = HashSet::new();
        let mut targets = HashSet::new();
        for round in 0..50 {
            let key = keys[round % keys.len()];
            let file = allocator.new_file(&spec(&[("p", key)]));
            assert!(staging.insert(file.staging_path.to_string()));
            assert!(targets.insert(file.target_path.to_string()));
        }
        let file = allocator.new_file(&PartitionSpec::new());
        assert!(staging.insert(file.staging_path.to_string()));
    }

    #[tokio::test]
    async fn test_targets_differ_across_allocators() {
        let mut first = allocator(TaskAttempt::new(0, 0)).await;
        let mut second = allocator(TaskAttempt::new(0, 0)).await;
        let spec = spec(&[("p", "a")]);

        assert_ne!(
            first.new_file(&spec).target_path,
            second.new_file(&spec).target_path
        );
    }

    #[tokio::test]
    async fn test_output_file_config() {
        let mut allocator = allocator(TaskAttempt::new(0, 1)).await.with_output_file_config(
            OutputFileConfig {
                prefix: "data".to_string(),
                suffix: ".ndjson".to_string(),
            },
        );
        let file = allocator.new_file(&PartitionSpec::new());

        assert_eq!(file.staging_path.as_ref(), "_staging/task-0-1/data-0");
        assert!(file.target_path.as_ref().starts_with("data-"));
        assert!(file.target_path.as_ref().ends_with("-0-1-0.ndjson"));
    }
}
