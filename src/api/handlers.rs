use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use serde::Serialize;
use tracing::info;

use crate::engine::types::{Step, WorkflowRequest};

use super::AppState;
use super::errors::AppError;

// --- Response types ---

#[derive(Serialize)]
pub struct RunAccepted {
    pub run_id: String,
    pub status_url: String,
}

#[derive(Serialize)]
pub struct RunStatusResponse {
    pub run_id: String,
    pub steps: Vec<Step>,
}

#[derive(Serialize)]
pub struct RunIdsResponse {
    pub run_ids: Vec<String>,
}

#[derive(Serialize)]
pub struct TaskInfo {
    pub name: String,
    pub description: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// --- Handlers ---

/// POST /workflow
pub async fn submit_workflow(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<WorkflowRequest>, JsonRejection>,
) -> Result<Json<RunAccepted>, AppError> {
    let Json(request) = payload.map_err(|e| AppError::Unprocessable(e.body_text()))?;

    let (run_id, _driver) = state.engine.start(&request).await?;
    info!(run_id = %run_id, steps = request.steps.len(), "Workflow accepted");

    Ok(Json(RunAccepted {
        status_url: format!("/workflow_status/{}", run_id),
        run_id,
    }))
}

/// GET /workflow_status/{run_id}
pub async fn workflow_status(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatusResponse>, AppError> {
    let run = state.status.get_run(&run_id).await?;

    Ok(Json(RunStatusResponse {
        run_id: run.run_id,
        steps: run.steps,
    }))
}

/// GET /runs (operator mode only)
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RunIdsResponse>, AppError> {
    let run_ids = state.status.list_runs().await?;
    Ok(Json(RunIdsResponse { run_ids }))
}

/// GET /tasks
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let tasks: Vec<TaskInfo> = state
        .engine
        .registry()
        .list()
        .iter()
        .map(|(name, desc)| TaskInfo {
            name: name.to_string(),
            description: desc.to_string(),
        })
        .collect();

    let total = tasks.len();
    Json(serde_json::json!({
        "tasks": tasks,
        "total": total,
    }))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
