//! The record-facing half of the write path.
//!
//! Records go through a [`PartitionWriter`] which opens [`FileWriter`]s via a
//! [`WriterFactory`] and emits [`Committable`](crate::committable::Committable)s
//! at batch boundaries.

mod partition_writer;
mod writer;

pub use partition_writer::{
    AnyPartitionWriter, DynamicPartitionWriter, GroupedPartitionWriter, PartitionWriter,
    SingleDirectoryWriter, WriterContext,
};
pub use writer::{FileWriter, JsonLinesEncoder, RecordEncoder, WriterFactory};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which partition writer to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterStrategy {
    /// No partitioning; one file per batch.
    Single,
    /// Input clustered by partition; one open file at a time.
    Grouped,
    /// Arbitrary input; one open file per partition.
    #[default]
    Dynamic,
}

impl WriterStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriterStrategy::Single => "single",
            WriterStrategy::Grouped => "grouped",
            WriterStrategy::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for WriterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
