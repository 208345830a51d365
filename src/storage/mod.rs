//! Storage abstraction over `object_store`.
//!
//! Every path handed to a [`StorageProvider`] is relative to the provider's
//! root (the table URI). Staged files and committed files live under the same
//! root so that publishing a file is a single server-side rename.

mod local;
mod memory;

pub use local::LocalConfig;

use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path;
use object_store::{ObjectMeta, ObjectStore, PutPayload};
use regex::Regex;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::emit;
use crate::error::{InvalidUrlSnafu, ObjectStoreSnafu, StorageError};
use crate::metrics::events::{
    RequestStatus, StorageOperation, StorageRequest, StorageRequestDuration,
};

/// A reference-counted storage provider.
pub type StorageProviderRef = Arc<StorageProvider>;

/// Storage provider rooted at a table URI.
#[derive(Clone)]
pub struct StorageProvider {
    pub(crate) config: BackendConfig,
    pub(crate) object_store: Arc<dyn ObjectStore>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StorageProvider<{}>", self.canonical_url)
    }
}

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_URL: &str = r"^file:(?P<path>.*)$";
const FILE_PATH: &str = r"^/(?P<path>.*)$";
const MEMORY_URL: &str = r"^memory://(?P<name>.*)$";

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum Backend {
    Local,
    Memory,
}

fn matchers() -> &'static Vec<(Backend, Regex)> {
    static MATCHERS: OnceLock<Vec<(Backend, Regex)>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        // Order matters: `file://` must be tried before the bare `file:` form.
        [
            (Backend::Memory, MEMORY_URL),
            (Backend::Local, FILE_URI),
            (Backend::Local, FILE_URL),
            (Backend::Local, FILE_PATH),
        ]
        .into_iter()
        .map(|(backend, pattern)| {
            (
                backend,
                Regex::new(pattern).expect("storage URL patterns are valid"),
            )
        })
        .collect()
    })
}

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Local(LocalConfig),
    /// Process-local store, used by tests and dry runs.
    Memory { name: String },
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    pub fn parse_url(url: &str) -> Result<Self, StorageError> {
        for (backend, regex) in matchers() {
            let Some(captures) = regex.captures(url) else {
                continue;
            };
            return match backend {
                Backend::Memory => Ok(BackendConfig::Memory {
                    name: captures
                        .name("name")
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                }),
                Backend::Local => {
                    let path = captures.name("path").map(|m| m.as_str()).unwrap_or("");
                    let path = if path.starts_with('/') {
                        path.to_string()
                    } else {
                        format!("/{path}")
                    };
                    Ok(BackendConfig::Local(LocalConfig { path }))
                }
            };
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }
}

fn status_of<T>(result: &Result<T, object_store::Error>) -> RequestStatus {
    if result.is_ok() {
        RequestStatus::Success
    } else {
        RequestStatus::Error
    }
}

fn record(operation: StorageOperation, status: RequestStatus, start: Instant) {
    emit!(StorageRequest { operation, status });
    emit!(StorageRequestDuration {
        operation,
        duration: start.elapsed(),
    });
}

impl StorageProvider {
    /// Create a storage provider for the given URL with storage options.
    ///
    /// Options are accepted for forward compatibility with remote backends; the
    /// local and in-memory backends ignore them.
    pub async fn for_url_with_options(
        url: &str,
        _options: HashMap<String, String>,
    ) -> Result<Self, StorageError> {
        match BackendConfig::parse_url(url)? {
            BackendConfig::Local(config) => Self::construct_local(config).await,
            BackendConfig::Memory { name } => Ok(Self::construct_memory(name)),
        }
    }

    /// Create a storage provider for the given URL.
    pub async fn for_url(url: &str) -> Result<Self, StorageError> {
        Self::for_url_with_options(url, HashMap::new()).await
    }

    /// Get the backend configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// The canonical URL of the storage root.
    pub fn url(&self) -> &str {
        &self.canonical_url
    }

    /// Get the contents of a file.
    pub async fn get(&self, path: &Path) -> Result<Bytes, StorageError> {
        let start = Instant::now();
        let result = self.object_store.get(path).await;
        record(StorageOperation::Get, status_of(&result), start);

        let bytes = result
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)?;
        Ok(bytes)
    }

    /// Put a payload to a path, creating parent directories as needed.
    pub async fn put_payload(&self, path: &Path, payload: PutPayload) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.put(path, payload).await;
        record(StorageOperation::Put, status_of(&result), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Fetch the metadata of a file.
    pub async fn head(&self, path: &Path) -> Result<ObjectMeta, StorageError> {
        let start = Instant::now();
        let result = self.object_store.head(path).await;
        // A missing object is an answer, not a failed request.
        let status = match &result {
            Err(object_store::Error::NotFound { .. }) => RequestStatus::Success,
            other => status_of(other),
        };
        record(StorageOperation::Head, status, start);

        result.context(ObjectStoreSnafu)
    }

    /// Check whether a file exists.
    pub async fn exists(&self, path: &Path) -> Result<bool, StorageError> {
        match self.head(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete a file at the given path.
    pub async fn delete(&self, path: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.delete(path).await;
        record(StorageOperation::Delete, status_of(&result), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// Server-side rename (move) operation.
    ///
    /// On the local filesystem this is `std::fs::rename`, which either fully
    /// succeeds or leaves the source untouched.
    pub async fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.object_store.rename(from, to).await;
        record(StorageOperation::Rename, status_of(&result), start);

        result.context(ObjectStoreSnafu)?;
        Ok(())
    }

    /// List every file under a prefix, sorted by path.
    pub async fn list_with_prefix(&self, prefix: &Path) -> Result<Vec<Path>, StorageError> {
        let start = Instant::now();
        let mut stream = self.object_store.list(Some(prefix));
        let mut paths = Vec::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(meta) => paths.push(meta.location),
                // An empty prefix may not exist as a directory yet.
                Err(object_store::Error::NotFound { .. }) => break,
                Err(source) => {
                    record(StorageOperation::List, RequestStatus::Error, start);
                    return Err(StorageError::ObjectStore { source });
                }
            }
        }
        record(StorageOperation::List, RequestStatus::Success, start);

        paths.sort();
        Ok(paths)
    }
}
