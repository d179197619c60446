//! Integration tests for the workflow execution engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stepwise::engine::types::*;
use stepwise::engine::{StatusService, WorkflowEngine};
use stepwise::error::{QueryError, StoreError, SubmitError};
use stepwise::storage::memory_store::MemoryHashStore;
use stepwise::storage::{HashStore, RunStore};
use stepwise::tasks::{FnTask, TaskRegistry};

/// Hash store that keeps every written value and can reject one chosen
/// write attempt (1-based).
struct RecordingStore {
    inner: MemoryHashStore,
    writes: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    fail_at: Option<usize>,
}

impl RecordingStore {
    fn new() -> Self {
        Self::failing_at(None)
    }

    fn failing_at(fail_at: Option<usize>) -> Self {
        Self {
            inner: MemoryHashStore::new(),
            writes: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail_at,
        }
    }

    fn snapshots(&self) -> Vec<WorkflowRun> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|raw| WorkflowRun::from_json("snapshot", raw).unwrap())
            .collect()
    }
}

#[async_trait]
impl HashStore for RecordingStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at == Some(attempt) {
            return Err(StoreError::Backend("injected write failure".to_string()));
        }
        self.writes.lock().unwrap().push(value.to_string());
        self.inner.hset(key, field, value).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.inner.hget(key, field).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.inner.keys(prefix).await
    }
}

fn registry() -> Arc<TaskRegistry> {
    let mut registry = TaskRegistry::with_builtins();
    registry.register(Arc::new(FnTask::new("slow", "Sleeps 300ms", || {
        std::thread::sleep(Duration::from_millis(300));
        Ok(())
    })));
    registry.register(Arc::new(FnTask::new("boom", "Always fails", || {
        Err(anyhow::anyhow!("task exploded"))
    })));
    registry.register(Arc::new(FnTask::new(
        "panic",
        "Panics",
        || -> anyhow::Result<()> { panic!("task body panicked") },
    )));
    Arc::new(registry)
}

fn engine_with(backend: Arc<RecordingStore>) -> WorkflowEngine {
    WorkflowEngine::new(registry(), RunStore::new(backend))
}

fn request(steps: Vec<StepSpec>) -> WorkflowRequest {
    WorkflowRequest { steps }
}

fn statuses(step: &Step) -> Vec<TaskStatus> {
    step.tasks.iter().map(|s| s.status).collect()
}

/// In every snapshot, a step only moves once the previous one is complete.
fn assert_steps_ordered(snapshots: &[WorkflowRun]) {
    for snap in snapshots {
        for pair in snap.steps.windows(2) {
            let later_started = pair[1].tasks.iter().any(|s| s.status != TaskStatus::Pending);
            if later_started {
                assert!(
                    pair[0].is_complete(),
                    "step {} started before step {} completed",
                    pair[1].index,
                    pair[0].index
                );
            }
        }
    }
}

/// In every snapshot of a sequential step, slot j only leaves `pending`
/// after every slot before it is terminal.
fn assert_sequential(snapshots: &[WorkflowRun], step: usize) {
    for snap in snapshots {
        let tasks = &snap.steps[step].tasks;
        for j in 0..tasks.len() {
            if tasks[j].status != TaskStatus::Pending {
                for (i, earlier) in tasks[..j].iter().enumerate() {
                    assert!(
                        earlier.status.is_terminal(),
                        "slot {} moved while slot {} was {}",
                        j,
                        i,
                        earlier.status
                    );
                }
            }
        }
    }
}

// --- Scenarios ---

#[tokio::test]
async fn parallel_then_sequential_all_succeed() {
    let backend = Arc::new(RecordingStore::new());
    let engine = engine_with(backend.clone());

    let run = engine
        .submit(&request(WorkflowRequest::demo_steps()))
        .await
        .unwrap();
    let run = engine.execute(run).await.unwrap();

    assert_eq!(statuses(&run.steps[0]), vec![TaskStatus::Success; 2]);
    assert_eq!(statuses(&run.steps[1]), vec![TaskStatus::Success; 3]);
    assert!(run.is_finished());

    let snapshots = backend.snapshots();
    assert!(snapshots[0]
        .steps
        .iter()
        .flat_map(|s| &s.tasks)
        .all(|t| t.status == TaskStatus::Pending));
    assert_steps_ordered(&snapshots);
    assert_sequential(&snapshots, 1);

    // Initial write plus running and success for each of five tasks.
    assert_eq!(snapshots.len(), 11);
    assert_eq!(snapshots.last().unwrap().steps, run.steps);
}

#[tokio::test]
async fn unknown_task_fails_without_blocking_next() {
    let backend = Arc::new(RecordingStore::new());
    let engine = engine_with(backend.clone());

    let run = engine
        .submit(&request(vec![StepSpec::new(
            StepKind::Sequential,
            &["task_x", "task_a"],
        )]))
        .await
        .unwrap();
    let run = engine.execute(run).await.unwrap();

    assert_eq!(run.steps[0].status_of("task_x"), Some(TaskStatus::Failed));
    assert_eq!(run.steps[0].status_of("task_a"), Some(TaskStatus::Success));

    // A registry miss goes straight from pending to failed.
    for snap in backend.snapshots() {
        assert_ne!(snap.steps[0].status_of("task_x"), Some(TaskStatus::Running));
    }
}

#[tokio::test]
async fn failing_task_does_not_stop_siblings_or_later_steps() {
    let backend = Arc::new(RecordingStore::new());
    let engine = engine_with(backend.clone());

    let run = engine
        .submit(&request(vec![
            StepSpec::new(StepKind::Parallel, &["boom", "task_a"]),
            StepSpec::new(StepKind::Sequential, &["boom", "task_b", "task_c"]),
        ]))
        .await
        .unwrap();
    let run = engine.execute(run).await.unwrap();

    assert_eq!(
        statuses(&run.steps[0]),
        vec![TaskStatus::Failed, TaskStatus::Success]
    );
    assert_eq!(
        statuses(&run.steps[1]),
        vec![TaskStatus::Failed, TaskStatus::Success, TaskStatus::Success]
    );
    assert_steps_ordered(&backend.snapshots());
}

#[tokio::test]
async fn panicking_task_is_recorded_as_failed() {
    let backend = Arc::new(RecordingStore::new());
    let engine = engine_with(backend);

    let run = engine
        .submit(&request(vec![StepSpec::new(
            StepKind::Parallel,
            &["panic", "task_a"],
        )]))
        .await
        .unwrap();
    let run = engine.execute(run).await.unwrap();

    assert_eq!(
        statuses(&run.steps[0]),
        vec![TaskStatus::Failed, TaskStatus::Success]
    );
}

#[tokio::test]
async fn sequential_step_runs_in_list_order() {
    let backend = Arc::new(RecordingStore::new());
    let engine = engine_with(backend.clone());

    let run = engine
        .submit(&request(vec![StepSpec::new(
            StepKind::Sequential,
            &["slow", "task_a", "slow"],
        )]))
        .await
        .unwrap();
    let run = engine.execute(run).await.unwrap();

    assert_eq!(statuses(&run.steps[0]), vec![TaskStatus::Success; 3]);
    assert_sequential(&backend.snapshots(), 0);
}

#[tokio::test]
async fn parallel_siblings_start_without_waiting() {
    let backend = Arc::new(RecordingStore::new());
    let engine = engine_with(backend.clone());

    let run = engine
        .submit(&request(vec![StepSpec::new(
            StepKind::Parallel,
            &["slow", "slow"],
        )]))
        .await
        .unwrap();
    let run = engine.execute(run).await.unwrap();

    assert_eq!(statuses(&run.steps[0]), vec![TaskStatus::Success; 2]);

    let both_running = backend
        .snapshots()
        .iter()
        .any(|snap| statuses(&snap.steps[0]) == vec![TaskStatus::Running; 2]);
    assert!(both_running, "second sibling waited for the first to finish");
}

#[tokio::test]
async fn empty_workflow_completes_immediately() {
    let backend = Arc::new(RecordingStore::new());
    let engine = engine_with(backend.clone());

    let run = engine.submit(&request(vec![])).await.unwrap();
    let run = engine.execute(run).await.unwrap();

    assert!(run.steps.is_empty());
    assert_eq!(backend.snapshots().len(), 1);
}

#[tokio::test]
async fn invalid_submission_creates_no_state() {
    let backend = Arc::new(RecordingStore::new());
    let engine = engine_with(backend.clone());

    let result = engine
        .submit(&request(vec![StepSpec::new(StepKind::Parallel, &[])]))
        .await;

    assert!(matches!(result, Err(SubmitError::Invalid(_))));
    assert!(backend.snapshots().is_empty());
}

#[tokio::test]
async fn store_failure_stops_scheduling() {
    // Initial write and task_a -> running succeed; task_a -> success fails.
    let backend = Arc::new(RecordingStore::failing_at(Some(3)));
    let engine = engine_with(backend.clone());

    let run = engine
        .submit(&request(vec![
            StepSpec::new(StepKind::Sequential, &["task_a", "task_b"]),
            StepSpec::new(StepKind::Parallel, &["task_c"]),
        ]))
        .await
        .unwrap();
    let result = engine.execute(run).await;

    assert!(matches!(result, Err(StoreError::Backend(_))));
    assert_eq!(backend.attempts.load(Ordering::SeqCst), 3);
    let last = backend.snapshots().pop().unwrap();
    assert_eq!(
        statuses(&last.steps[0]),
        vec![TaskStatus::Running, TaskStatus::Pending]
    );
    assert_eq!(statuses(&last.steps[1]), vec![TaskStatus::Pending]);
}

#[tokio::test]
async fn parallel_store_failure_lets_siblings_finish() {
    // The first running write of the parallel step fails; the other
    // sibling still runs to completion, and the next step never starts.
    let backend = Arc::new(RecordingStore::failing_at(Some(2)));
    let engine = engine_with(backend.clone());

    let run = engine
        .submit(&request(vec![
            StepSpec::new(StepKind::Parallel, &["task_a", "task_b"]),
            StepSpec::new(StepKind::Sequential, &["task_c"]),
        ]))
        .await
        .unwrap();
    let result = engine.execute(run).await;

    assert!(matches!(result, Err(StoreError::Backend(_))));
    // initial, failed running, sibling running, sibling success
    assert_eq!(backend.attempts.load(Ordering::SeqCst), 4);

    let last = backend.snapshots().pop().unwrap();
    let mut step0 = statuses(&last.steps[0]);
    step0.sort_by_key(|s| s.as_str());
    assert_eq!(step0, vec![TaskStatus::Running, TaskStatus::Success]);
    assert_eq!(statuses(&last.steps[1]), vec![TaskStatus::Pending]);
}

// --- Per-task execution ---

#[tokio::test]
async fn run_task_success_updates_status() {
    let backend = Arc::new(RecordingStore::new());
    let engine = engine_with(backend.clone());
    let run = WorkflowRun::new(
        "test_run",
        &[StepSpec::new(StepKind::Sequential, &["task_a"])],
    );
    let state = tokio::sync::Mutex::new(run);

    engine
        .run_task(&state, SlotRef { step: 0, slot: 0 })
        .await
        .unwrap();

    assert_eq!(state.lock().await.steps[0].tasks[0].status, TaskStatus::Success);
    assert_eq!(backend.snapshots().len(), 2);
}

#[tokio::test]
async fn run_task_unknown_sets_failed() {
    let backend = Arc::new(RecordingStore::new());
    let engine = engine_with(backend.clone());
    let run = WorkflowRun::new(
        "test_run",
        &[StepSpec::new(StepKind::Sequential, &["does_not_exist"])],
    );
    let state = tokio::sync::Mutex::new(run);

    engine
        .run_task(&state, SlotRef { step: 0, slot: 0 })
        .await
        .unwrap();

    assert_eq!(state.lock().await.steps[0].tasks[0].status, TaskStatus::Failed);
    assert_eq!(backend.snapshots().len(), 1);
}

#[tokio::test]
async fn run_task_skips_started_slot() {
    let backend = Arc::new(RecordingStore::new());
    let engine = engine_with(backend.clone());
    let mut run = WorkflowRun::new(
        "test_run",
        &[StepSpec::new(StepKind::Sequential, &["task_a"])],
    );
    run.transition(SlotRef { step: 0, slot: 0 }, TaskStatus::Failed);
    let state = tokio::sync::Mutex::new(run);

    engine
        .run_task(&state, SlotRef { step: 0, slot: 0 })
        .await
        .unwrap();

    assert_eq!(state.lock().await.steps[0].tasks[0].status, TaskStatus::Failed);
    assert!(backend.snapshots().is_empty());
}

#[tokio::test]
async fn run_task_ignores_slot_outside_run() {
    let backend = Arc::new(RecordingStore::new());
    let engine = engine_with(backend.clone());
    let run = WorkflowRun::new(
        "test_run",
        &[StepSpec::new(StepKind::Parallel, &["task_a"])],
    );
    let state = tokio::sync::Mutex::new(run.clone());

    for at in [SlotRef { step: 5, slot: 0 }, SlotRef { step: 0, slot: 3 }] {
        engine.run_task(&state, at).await.unwrap();
    }

    assert_eq!(*state.lock().await, run);
    assert!(backend.snapshots().is_empty());
}

// --- Background execution and queries ---

#[tokio::test]
async fn query_right_after_submit_is_all_pending() {
    let store = RunStore::in_memory();
    let engine = WorkflowEngine::new(registry(), store.clone());
    let status = StatusService::new(store, false);

    let run = engine
        .submit(&request(WorkflowRequest::demo_steps()))
        .await
        .unwrap();

    let seen = status.get_run(&run.run_id).await.unwrap();
    assert_eq!(seen, run);
    assert!(seen
        .steps
        .iter()
        .flat_map(|s| &s.tasks)
        .all(|t| t.status == TaskStatus::Pending));
}

#[tokio::test]
async fn launched_run_finishes_in_background() {
    let store = RunStore::in_memory();
    let engine = WorkflowEngine::new(registry(), store.clone());
    let status = StatusService::new(store, false);

    let (run_id, driver) = engine
        .start(&request(vec![
            StepSpec::new(StepKind::Parallel, &["task_a", "task_x"]),
            StepSpec::new(StepKind::Sequential, &["task_b"]),
        ]))
        .await
        .unwrap();
    driver.await.unwrap();

    let run = status.get_run(&run_id).await.unwrap();
    assert_eq!(
        statuses(&run.steps[0]),
        vec![TaskStatus::Success, TaskStatus::Failed]
    );
    assert_eq!(statuses(&run.steps[1]), vec![TaskStatus::Success]);
}

#[tokio::test]
async fn launch_absorbs_driver_errors() {
    let backend = Arc::new(RecordingStore::failing_at(Some(2)));
    let engine = engine_with(backend);

    let (_, driver) = engine
        .start(&request(vec![StepSpec::new(StepKind::Sequential, &["task_a"])]))
        .await
        .unwrap();

    // The supervisor logs the store error; its own task completes normally.
    assert!(driver.await.is_ok());
}

#[tokio::test]
async fn runs_get_distinct_ids() {
    let engine = WorkflowEngine::new(registry(), RunStore::in_memory());
    let a = engine.submit(&WorkflowRequest::default()).await.unwrap();
    let b = engine.submit(&WorkflowRequest::default()).await.unwrap();
    assert_ne!(a.run_id, b.run_id);
}

#[tokio::test]
async fn unknown_run_is_not_found() {
    let status = StatusService::new(RunStore::in_memory(), false);
    let err = status.get_run("missing").await.unwrap_err();
    assert!(matches!(err, QueryError::NotFound(ref id) if id == "missing"));
}

#[tokio::test]
async fn listing_requires_operator_mode() {
    let store = RunStore::in_memory();
    let engine = WorkflowEngine::new(registry(), store.clone());
    let run = engine.submit(&WorkflowRequest::default()).await.unwrap();

    let closed = StatusService::new(store.clone(), false);
    assert!(matches!(closed.list_runs().await, Err(QueryError::Forbidden)));

    let open = StatusService::new(store, true);
    assert_eq!(open.list_runs().await.unwrap(), vec![run.run_id]);
}
