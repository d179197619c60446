use crate::engine::types::WorkflowRun;
use crate::error::QueryError;
use crate::storage::RunStore;

/// Read-only view over persisted runs. Never talks to a running engine.
#[derive(Clone)]
pub struct StatusService {
    store: RunStore,
    operator_mode: bool,
}

impl StatusService {
    pub fn new(store: RunStore, operator_mode: bool) -> Self {
        Self {
            store,
            operator_mode,
        }
    }

    pub fn operator_mode(&self) -> bool {
        self.operator_mode
    }

    /// The last persisted state of `run_id`.
    pub async fn get_run(&self, run_id: &str) -> Result<WorkflowRun, QueryError> {
        self.store
            .get(run_id)
            .await?
            .ok_or_else(|| QueryError::NotFound(run_id.to_string()))
    }

    /// All run ids in the store. Refused unless operator mode is on.
    pub async fn list_runs(&self) -> Result<Vec<String>, QueryError> {
        if !self.operator_mode {
            return Err(QueryError::Forbidden);
        }
        Ok(self.store.list_run_ids().await?)
    }
}
