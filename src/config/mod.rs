//! Sink configuration.
//!
//! Loaded from YAML with environment variable interpolation, then validated
//! before anything touches storage.

mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::committer::DEFAULT_MAX_CONCURRENT_COMMITS;
use crate::error::{
    ConfigError, DuplicatePartitionColumnSnafu, EmptyTableUriSnafu, EnvInterpolationSnafu,
    MissingPartitionColumnsSnafu, ReadFileSnafu, UnexpectedPartitionColumnsSnafu,
    UnexpectedStaticPartitionSnafu, YamlParseSnafu, ZeroValueSnafu,
};
use crate::partition::{DEFAULT_PARTITION_NAME, PartitionSpec};
use crate::sink::WriterStrategy;
use crate::staging::{DEFAULT_STAGING_DIR, OutputFileConfig, TaskAttempt};

pub use vars::{interpolate, interpolate_env};

/// Configuration for one sink worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Root of the output table.
    /// Examples: "/data/events", "file:///data/events", "memory://scratch"
    pub table_uri: String,

    /// Storage options passed to the backend.
    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    /// Directory for uncommitted files, relative to the table root.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,

    /// Partition columns in directory nesting order.
    #[serde(default)]
    pub partition_columns: Vec<String>,

    /// Fixed `column: value` directories every file is nested under.
    /// Only the `single` strategy takes one.
    #[serde(default)]
    pub static_partition: PartitionSpec,

    /// How records are routed to files (default: dynamic).
    #[serde(default)]
    pub strategy: WriterStrategy,

    /// Index of this parallel worker.
    #[serde(default)]
    pub worker_id: u32,

    /// Attempt number of this worker; bump it on every restart.
    #[serde(default)]
    pub generation: u64,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    #[serde(default = "default_file_suffix")]
    pub file_suffix: String,

    /// Directory value used for null, missing and empty partition values.
    #[serde(default = "default_partition_name")]
    pub default_partition_name: String,

    /// Committables processed concurrently (default: 4).
    #[serde(default = "default_max_concurrent_commits")]
    pub max_concurrent_commits: usize,

    /// Records per batch in the command line driver (default: 10000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_staging_dir() -> String {
    DEFAULT_STAGING_DIR.to_string()
}

fn default_file_prefix() -> String {
    "part".to_string()
}

fn default_file_suffix() -> String {
    ".ndjson".to_string()
}

fn default_partition_name() -> String {
    DEFAULT_PARTITION_NAME.to_string()
}

fn default_max_concurrent_commits() -> usize {
    DEFAULT_MAX_CONCURRENT_COMMITS
}

fn default_batch_size() -> usize {
    10_000
}

impl SinkConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content, interpolate_env)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str, interpolate_env: bool) -> Result<Self, ConfigError> {
        let content = if interpolate_env {
            vars::interpolate_env(content).map_err(|errors| {
                EnvInterpolationSnafu {
                    message: errors.join("\n"),
                }
                .build()
            })?
        } else {
            content.to_string()
        };

        let config: SinkConfig = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.table_uri.trim().is_empty(), EmptyTableUriSnafu);

        match self.strategy {
            WriterStrategy::Single => {
                ensure!(
                    self.partition_columns.is_empty(),
                    UnexpectedPartitionColumnsSnafu
                );
            }
            WriterStrategy::Grouped | WriterStrategy::Dynamic => {
                ensure!(
                    !self.partition_columns.is_empty(),
                    MissingPartitionColumnsSnafu {
                        strategy: self.strategy.as_str(),
                    }
                );
                ensure!(
                    self.static_partition.is_empty(),
                    UnexpectedStaticPartitionSnafu {
                        strategy: self.strategy.as_str(),
                    }
                );
            }
        }

        let mut seen = HashSet::new();
        for column in &self.partition_columns {
            ensure!(
                seen.insert(column.as_str()),
                DuplicatePartitionColumnSnafu { column }
            );
        }

        ensure!(
            self.max_concurrent_commits > 0,
            ZeroValueSnafu {
                field: "max_concurrent_commits"
            }
        );
        ensure!(
            self.batch_size > 0,
            ZeroValueSnafu {
                field: "batch_size"
            }
        );
        Ok(())
    }

    pub fn task_attempt(&self) -> TaskAttempt {
        TaskAttempt::new(self.worker_id, self.generation)
    }

    pub fn output_file_config(&self) -> OutputFileConfig {
        OutputFileConfig {
            prefix: self.file_prefix.clone(),
            suffix: self.file_suffix.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_minimal_yaml_uses_defaults() {
        let yaml = r#"
table_uri: /data/events
partition_columns: [dt]
"#;
        let config = SinkConfig::from_yaml(yaml, false).unwrap();

        assert_eq!(config.strategy, WriterStrategy::Dynamic);
        assert_eq!(config.staging_dir, "_staging");
        assert_eq!(config.file_prefix, "part");
        assert_eq!(config.file_suffix, ".ndjson");
        assert_eq!(config.default_partition_name, "__DEFAULT_PARTITION__");
        assert_eq!(config.max_concurrent_commits, 4);
        assert_eq!(config.batch_size, 10_000);
        assert_eq!(config.task_attempt(), TaskAttempt::new(0, 0));
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
table_uri: memory://events
staging_dir: _tmp
partition_columns: [dt, region]
strategy: grouped
worker_id: 2
generation: 5
file_prefix: events
file_suffix: .json
max_concurrent_commits: 8
batch_size: 500
"#;
        let config = SinkConfig::from_yaml(yaml, false).unwrap();

        assert_eq!(config.strategy, WriterStrategy::Grouped);
        assert_eq!(config.partition_columns, vec!["dt", "region"]);
        assert_eq!(config.task_attempt(), TaskAttempt::new(2, 5));
        assert_eq!(config.output_file_config().prefix, "events");
        assert_eq!(config.output_file_config().suffix, ".json");
    }

    #[test]
    fn test_empty_table_uri_rejected() {
        let err = SinkConfig::from_yaml("table_uri: ''\nstrategy: single\n", false).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyTableUri));
    }

    #[test]
    fn test_partitioned_strategy_needs_columns() {
        let err = SinkConfig::from_yaml("table_uri: /t\nstrategy: grouped\n", false).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingPartitionColumns { ref strategy } if strategy == "grouped"
        ));
    }

    #[test]
    fn test_single_strategy_rejects_columns() {
        let yaml = "table_uri: /t\nstrategy: single\npartition_columns: [dt]\n";
        let err = SinkConfig::from_yaml(yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::UnexpectedPartitionColumns));
    }

    #[test]
    fn test_static_partition_for_single_strategy() {
        let yaml = r#"
table_uri: /t
strategy: single
static_partition:
  dt: "2024-01-01"
  source: web
"#;
        let config = SinkConfig::from_yaml(yaml, false).unwrap();
        let keys: Vec<_> = config.static_partition.keys().cloned().collect();
        assert_eq!(keys, vec!["dt", "source"]);
        assert_eq!(config.static_partition["dt"], "2024-01-01");

        let yaml = "table_uri: /t\npartition_columns: [p]\nstatic_partition: {dt: x}\n";
        let err = SinkConfig::from_yaml(yaml, false).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::UnexpectedStaticPartition { ref strategy } if strategy == "dynamic"
        ));
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let yaml = "table_uri: /t\npartition_columns: [dt, region, dt]\n";
        let err = SinkConfig::from_yaml(yaml, false).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DuplicatePartitionColumn { ref column } if column == "dt"
        ));
    }

    #[test]
    fn test_zero_values_rejected() {
        let yaml = "table_uri: /t\nstrategy: single\nbatch_size: 0\n";
        let err = SinkConfig::from_yaml(yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroValue { ref field } if field == "batch_size"));

        let yaml = "table_uri: /t\nstrategy: single\nmax_concurrent_commits: 0\n";
        let err = SinkConfig::from_yaml(yaml, false).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroValue { .. }));
    }

    #[test]
    fn test_unknown_strategy_is_a_parse_error() {
        let err = SinkConfig::from_yaml("table_uri: /t\nstrategy: round_robin\n", false)
            .unwrap_err();
        assert!(matches!(err, ConfigError::YamlParse { .. }));
    }

    #[test]
    fn test_from_file_with_missing_variable() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "table_uri: ${{SNOWDRIFT_TEST_UNSET_TABLE_URI}}").unwrap();
        writeln!(file, "strategy: single").unwrap();

        let err = SinkConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::EnvInterpolation { .. }));

        let config = SinkConfig::from_file_with_options(file.path(), false);
        // Without interpolation the placeholder is taken literally.
        assert_eq!(
            config.unwrap().table_uri,
            "${SNOWDRIFT_TEST_UNSET_TABLE_URI}"
        );
    }

    #[test]
    fn test_from_file_missing() {
        let err = SinkConfig::from_file("/nonexistent/snowdrift.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }
}
