use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::storage::HashStore;

type Hashes = HashMap<String, HashMap<String, String>>;

/// In-memory hash store. Holds data only for the lifetime of the instance.
pub struct MemoryHashStore {
    hashes: Mutex<Hashes>,
}

impl MemoryHashStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            hashes: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Hashes> {
        // Every write is a single insert, so a poisoned map is still whole.
        self.hashes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryHashStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HashStore for MemoryHashStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.lock()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
