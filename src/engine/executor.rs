use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::types::*;
use crate::error::{StoreError, SubmitError};
use crate::storage::RunStore;
use crate::tasks::TaskRegistry;

/// Drives a run step by step and mirrors every task transition to the store.
///
/// One engine call owns the in-memory run. Task bodies run concurrently on
/// the blocking pool, but every status change and every store write happens
/// under a single lock, so writes land in the order the changes were made.
#[derive(Clone)]
pub struct WorkflowEngine {
    registry: Arc<TaskRegistry>,
    store: RunStore,
}

impl WorkflowEngine {
    pub fn new(registry: Arc<TaskRegistry>, store: RunStore) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    /// Validate a request, build an all-pending run under a fresh id and
    /// persist it. Nothing executes yet.
    pub async fn submit(&self, request: &WorkflowRequest) -> Result<WorkflowRun, SubmitError> {
        request.validate()?;

        let run = WorkflowRun::new(Uuid::new_v4().to_string(), &request.steps);
        self.store.put(&run).await?;

        debug!(run_id = %run.run_id, steps = run.steps.len(), "Workflow submitted");
        Ok(run)
    }

    /// Submit and hand the run to a background driver. Returns once the
    /// initial state is stored.
    pub async fn start(
        &self,
        request: &WorkflowRequest,
    ) -> Result<(String, JoinHandle<()>), SubmitError> {
        let run = self.submit(request).await?;
        let run_id = run.run_id.clone();
        Ok((run_id, self.launch(run)))
    }

    /// Run `run` in the background behind a supervising task. Errors and
    /// panics from the driver are logged there and go no further.
    pub fn launch(&self, run: WorkflowRun) -> JoinHandle<()> {
        let engine = self.clone();
        let run_id = run.run_id.clone();

        tokio::spawn(async move {
            let driver = tokio::spawn(async move { engine.execute(run).await });
            match driver.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    error!(run_id = %run_id, error = %e, "Workflow run aborted");
                }
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Workflow driver panicked");
                }
            }
        })
    }

    /// Execute every step in order and return the final state.
    ///
    /// Task failures are recorded, never returned. The only error is a
    /// store failure, after which no new task is started.
    pub async fn execute(&self, run: WorkflowRun) -> Result<WorkflowRun, StoreError> {
        let run_id = run.run_id.clone();
        let layout: Vec<(StepKind, usize)> =
            run.steps.iter().map(|s| (s.kind, s.tasks.len())).collect();
        let state = Mutex::new(run);

        info!(run_id = %run_id, steps = layout.len(), "Starting workflow execution");

        for (step, (kind, count)) in layout.into_iter().enumerate() {
            debug!(run_id = %run_id, step, kind = %kind, tasks = count, "Starting step");

            match kind {
                StepKind::Sequential => {
                    for slot in 0..count {
                        self.run_task(&state, SlotRef { step, slot }).await?;
                    }
                }
                StepKind::Parallel => {
                    let results =
                        join_all((0..count).map(|slot| self.run_task(&state, SlotRef { step, slot })))
                            .await;
                    // Siblings always finish; the first store error stops later steps.
                    results.into_iter().collect::<Result<Vec<()>, _>>()?;
                }
            }
        }

        let run = state.into_inner();
        let (succeeded, failed) = run
            .steps
            .iter()
            .flat_map(|s| &s.tasks)
            .fold((0usize, 0usize), |(ok, bad), slot| match slot.status {
                TaskStatus::Success => (ok + 1, bad),
                TaskStatus::Failed => (ok, bad + 1),
                _ => (ok, bad),
            });
        info!(
            run_id = %run_id,
            succeeded,
            failed,
            "Workflow execution complete"
        );

        Ok(run)
    }

    /// Resolve and run one task slot, persisting each transition.
    /// A `SlotRef` outside the run is logged and ignored.
    pub async fn run_task(&self, state: &Mutex<WorkflowRun>, at: SlotRef) -> Result<(), StoreError> {
        let (run_id, name, status) = {
            let run = state.lock().await;
            let Some(slot) = run.slot(at) else {
                error!(run_id = %run.run_id, step = at.step, slot = at.slot, "No such task slot");
                return Ok(());
            };
            (run.run_id.clone(), slot.name.clone(), slot.status)
        };

        if status != TaskStatus::Pending {
            debug!(run_id = %run_id, task = %name, status = %status, "Task already started, skipping");
            return Ok(());
        }

        let Some(task) = self.registry.resolve(&name) else {
            error!(run_id = %run_id, step = at.step, task = %name, "Task not found in registry");
            return self.record(state, at, TaskStatus::Failed).await;
        };

        self.record(state, at, TaskStatus::Running).await?;
        info!(run_id = %run_id, step = at.step, task = %name, "Running task");

        let outcome = match tokio::task::spawn_blocking(move || task.run()).await {
            Ok(Ok(())) => TaskStatus::Success,
            Ok(Err(e)) => {
                error!(run_id = %run_id, task = %name, error = %format!("{:#}", e), "Task failed");
                TaskStatus::Failed
            }
            Err(e) => {
                error!(run_id = %run_id, task = %name, error = %e, "Task panicked");
                TaskStatus::Failed
            }
        };

        self.record(state, at, outcome).await?;
        debug!(run_id = %run_id, task = %name, status = %outcome, "Task finished");
        Ok(())
    }

    /// Apply one transition and write the whole run back while still holding the lock.
    async fn record(
        &self,
        state: &Mutex<WorkflowRun>,
        at: SlotRef,
        status: TaskStatus,
    ) -> Result<(), StoreError> {
        let mut run = state.lock().await;
        if !run.transition(at, status)
            && let Some(slot) = run.slot(at)
        {
            warn!(
                run_id = %run.run_id,
                task = %slot.name,
                from = %slot.status,
                to = %status,
                "Ignoring illegal status transition"
            );
        }

        self.store.put(&run).await.inspect_err(|e| {
            error!(run_id = %run.run_id, error = %e, "Failed to persist run state");
        })
    }
}
