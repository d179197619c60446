pub mod memory_store;
#[cfg(feature = "redis")]
pub mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::types::WorkflowRun;
use crate::error::StoreError;

/// Hash field holding the serialized step array of a run.
pub const STEPS_FIELD: &str = "steps";

/// Key/field store with atomic single-field writes (a Redis hash, in production).
#[async_trait]
pub trait HashStore: Send + Sync {
    /// Set `field` of the hash at `key`, creating the hash if needed.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Read one field; `None` when the key or field does not exist.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// All keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Round-trip check against the backend.
    async fn ping(&self) -> Result<String, StoreError> {
        Ok("PONG".to_string())
    }
}

/// Whole-run persistence on top of a [`HashStore`].
///
/// Every write replaces the full serialized run; there is no partial update
/// and no version check, so the last writer for a run id wins.
#[derive(Clone)]
pub struct RunStore {
    backend: Arc<dyn HashStore>,
    prefix: String,
}

impl RunStore {
    pub fn new(backend: Arc<dyn HashStore>) -> Self {
        Self::with_prefix(backend, "")
    }

    /// Namespace run keys, e.g. `stepwise:` gives keys like `stepwise:<run_id>`.
    pub fn with_prefix(backend: Arc<dyn HashStore>, prefix: &str) -> Self {
        Self {
            backend,
            prefix: prefix.to_string(),
        }
    }

    /// In-process store, used by tests and `run --memory`.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(memory_store::MemoryHashStore::new()))
    }

    fn key(&self, run_id: &str) -> String {
        format!("{}{}", self.prefix, run_id)
    }

    pub fn backend(&self) -> &Arc<dyn HashStore> {
        &self.backend
    }

    /// Overwrite the stored representation of `run_id`.
    pub async fn put_raw(&self, run_id: &str, serialized: &str) -> Result<(), StoreError> {
        self.backend
            .hset(&self.key(run_id), STEPS_FIELD, serialized)
            .await
    }

    pub async fn get_raw(&self, run_id: &str) -> Result<Option<String>, StoreError> {
        self.backend.hget(&self.key(run_id), STEPS_FIELD).await
    }

    /// Serialize the whole run and overwrite its record.
    pub async fn put(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let serialized = run.to_json().map_err(|source| StoreError::Corrupt {
            run_id: run.run_id.clone(),
            source,
        })?;
        self.put_raw(&run.run_id, &serialized).await
    }

    /// Load and decode a run; `None` if it was never stored.
    pub async fn get(&self, run_id: &str) -> Result<Option<WorkflowRun>, StoreError> {
        let Some(raw) = self.get_raw(run_id).await? else {
            return Ok(None);
        };
        WorkflowRun::from_json(run_id, &raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                run_id: run_id.to_string(),
                source,
            })
    }

    /// Every run id currently held by the backend, sorted.
    pub async fn list_run_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self
            .backend
            .keys(&self.prefix)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }
}
