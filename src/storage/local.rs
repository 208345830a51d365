//! Local filesystem backend.
//!
//! The table root is created if needed and resolved to its canonical form
//! before the store is built, so `..` components and symlinks in the
//! configured path never leak into staged or committed file locations.

use object_store::ObjectStore;
use object_store::local::LocalFileSystem;
use snafu::prelude::*;
use std::sync::Arc;

use crate::error::{ObjectStoreSnafu, PrepareRootSnafu, StorageError};

use super::{BackendConfig, StorageProvider};

/// Root directory of a table on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalConfig {
    pub path: String,
}

impl StorageProvider {
    pub(super) async fn construct_local(config: LocalConfig) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(&config.path)
            .await
            .context(PrepareRootSnafu { path: &config.path })?;
        let root = tokio::fs::canonicalize(&config.path)
            .await
            .context(PrepareRootSnafu { path: &config.path })?;
        let root = root.to_string_lossy().into_owned();

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(LocalFileSystem::new_with_prefix(&root).context(ObjectStoreSnafu)?);

        Ok(Self {
            canonical_url: format!("file://{root}"),
            config: BackendConfig::Local(LocalConfig { path: root }),
            object_store,
        })
    }
}
