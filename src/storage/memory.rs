//! In-memory storage backend.
//!
//! Stores are shared by name within the process, so two providers opened on
//! `memory://scratch` see the same objects. This lets a test drop every writer
//! and committer, reopen the URL, and finish a commit from tokens alone.

use object_store::ObjectStore;
use object_store::memory::InMemory;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use super::{BackendConfig, StorageProvider};

fn registry() -> &'static Mutex<HashMap<String, Arc<InMemory>>> {
    static STORES: OnceLock<Mutex<HashMap<String, Arc<InMemory>>>> = OnceLock::new();
    STORES.get_or_init(|| Mutex::new(HashMap::new()))
}

impl StorageProvider {
    pub(super) fn construct_memory(name: String) -> Self {
        let store = {
            let mut stores = registry()
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(stores.entry(name.clone()).or_default())
        };
        let object_store: Arc<dyn ObjectStore> = store;

        Self {
            canonical_url: format!("memory://{name}"),
            config: BackendConfig::Memory { name },
            object_store,
        }
    }
}
