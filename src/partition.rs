//! Partition derivation for incoming records.
//!
//! A [`PartitionComputer`] turns a record into an ordered [`PartitionSpec`]
//! and the value that is actually written. The spec's insertion order is the
//! directory nesting order, so `{"p": "a", "q": "b"}` lands under `p=a/q=b`.

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{ComputationError, NotAnObjectSnafu, UnsupportedPartitionValueSnafu};

/// Ordered mapping from partition column to its string value.
pub type PartitionSpec = IndexMap<String, String>;

/// Value used for null, missing and empty partition values.
pub const DEFAULT_PARTITION_NAME: &str = "__DEFAULT_PARTITION__";

/// Maps a record to its partition and to the value written to disk.
///
/// Implementations must be pure: the same record always yields the same
/// partition, and no I/O happens here.
pub trait PartitionComputer<T>: Send + Sync {
    /// The value written to the output file.
    type Output;

    /// Compute the partition a record belongs to.
    fn generate_partitions(&self, record: &T) -> Result<PartitionSpec, ComputationError>;

    /// Project a record to the value that is written, usually by dropping the
    /// partition columns (they are already encoded in the path).
    fn project_record(&self, record: T) -> Result<Self::Output, ComputationError>;
}

/// Partitions JSON objects by a fixed, ordered list of top-level fields.
#[derive(Debug, Clone)]
pub struct JsonPartitionComputer {
    columns: Vec<String>,
    default_partition_name: String,
}

impl JsonPartitionComputer {
    /// Create a computer for the given partition columns.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            default_partition_name: DEFAULT_PARTITION_NAME.to_string(),
        }
    }

    /// Override the directory name used for null or empty values.
    pub fn with_default_partition_name(mut self, name: impl Into<String>) -> Self {
        self.default_partition_name = name.into();
        self
    }

    /// The configured partition columns, in nesting order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    fn partition_value(
        &self,
        column: &str,
        value: Option<&Value>,
    ) -> Result<String, ComputationError> {
        match value {
            None | Some(Value::Null) => Ok(self.default_partition_name.clone()),
            Some(Value::String(s)) if s.is_empty() => Ok(self.default_partition_name.clone()),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::Bool(b)) => Ok(b.to_string()),
            Some(other) => UnsupportedPartitionValueSnafu {
                column,
                kind: value_kind(other),
            }
            .fail(),
        }
    }
}

impl PartitionComputer<Value> for JsonPartitionComputer {
    type Output = Value;

    fn generate_partitions(&self, record: &Value) -> Result<PartitionSpec, ComputationError> {
        let Some(object) = record.as_object() else {
            return NotAnObjectSnafu {
                kind: value_kind(record),
            }
            .fail();
        };

        self.columns
            .iter()
            .map(|column| {
                let value = self.partition_value(column, object.get(column))?;
                Ok((column.clone(), value))
            })
            .collect()
    }

    fn project_record(&self, record: Value) -> Result<Value, ComputationError> {
        match record {
            Value::Object(mut object) => {
                for column in &self.columns {
                    object.remove(column);
                }
                Ok(Value::Object(object))
            }
            other => NotAnObjectSnafu {
                kind: value_kind(&other),
            }
            .fail(),
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Render a partition spec as nested path segments, e.g. `p=a/q=b`.
///
/// Returns an empty string for an empty spec.
pub fn partition_path(spec: &PartitionSpec) -> String {
    spec.iter()
        .map(|(column, value)| {
            format!("{}={}", escape_path_name(column), escape_path_name(value))
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn needs_escaping(c: char) -> bool {
    c < ' '
        || matches!(
            c,
            '"' | '#' | '%' | '\'' | '*' | '/' | ':' | '=' | '?' | '\\' | '\x7F' | '{' | '[' | ']' | '^'
        )
}

/// Percent-escape characters that would break a `column=value` path segment.
pub fn escape_path_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if needs_escaping(c) {
            // Escaped chars are all ASCII, so a single byte is enough.
            escaped.push_str(&format!("%{:02X}", c as u32));
        } else {
            escaped.push(c);
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generate_partitions_in_column_order() {
        let computer = JsonPartitionComputer::new(vec!["q".into(), "p".into()]);
        let spec = computer
            .generate_partitions(&json!({"p": "a", "q": 7, "v": 1}))
            .unwrap();

        let keys: Vec<_> = spec.keys().cloned().collect();
        assert_eq!(keys, vec!["q", "p"]);
        assert_eq!(partition_path(&spec), "q=7/p=a");
    }

    #[test]
    fn test_null_missing_and_empty_use_default_name() {
        let computer = JsonPartitionComputer::new(vec!["a".into(), "b".into(), "c".into()])
            .with_default_partition_name("none");
        let spec = computer
            .generate_partitions(&json!({"a": null, "c": ""}))
            .unwrap();

        assert_eq!(partition_path(&spec), "a=none/b=none/c=none");
    }

    #[test]
    fn test_project_strips_partition_columns() {
        let computer = JsonPartitionComputer::new(vec!["p".into()]);
        let projected = computer
            .project_record(json!({"p": "p1", "v": 1}))
            .unwrap();

        assert_eq!(projected, json!({"v": 1}));
    }

    #[test]
    fn test_non_object_record_is_rejected() {
        let computer = JsonPartitionComputer::new(vec!["p".into()]);

        let err = computer.generate_partitions(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, ComputationError::NotAnObject { .. }));

        let err = computer.project_record(json!("text")).unwrap_err();
        assert!(matches!(err, ComputationError::NotAnObject { .. }));
    }

    #[test]
    fn test_nested_partition_value_is_rejected() {
        let computer = JsonPartitionComputer::new(vec!["p".into()]);
        let err = computer
            .generate_partitions(&json!({"p": {"nested": true}}))
            .unwrap_err();

        assert!(matches!(
            err,
            ComputationError::UnsupportedPartitionValue { ref column, .. } if column == "p"
        ));
    }

    #[test]
    fn test_escape_path_name() {
        assert_eq!(escape_path_name("2024-01-01"), "2024-01-01");
        assert_eq!(escape_path_name("a/b"), "a%2Fb");
        assert_eq!(escape_path_name("k=v"), "k%3Dv");
        assert_eq!(escape_path_name("50%"), "50%25");
        assert_eq!(escape_path_name("tab\there"), "tab%09here");
    }

    #[test]
    fn test_empty_spec_has_empty_path() {
        assert_eq!(partition_path(&PartitionSpec::new()), "");
    }
}
