mod errors;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::engine::{StatusService, WorkflowEngine};

pub use errors::{AppError, ErrorResponse};

/// Shared application state accessible by all handlers.
pub struct AppState {
    pub engine: WorkflowEngine,
    pub status: StatusService,
}

/// Build the application router.
pub fn router(state: Arc<AppState>, max_body: usize) -> Router {
    Router::new()
        .route("/workflow", post(handlers::submit_workflow))
        .route("/workflow_status/{run_id}", get(handlers::workflow_status))
        .route("/runs", get(handlers::list_runs))
        .route("/tasks", get(handlers::list_tasks))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the REST API server.
pub async fn serve(host: &str, port: u16, max_body: usize, state: Arc<AppState>) -> Result<()> {
    match state.engine.store().backend().ping().await {
        Ok(pong) => info!(response = %pong, "Store ping"),
        Err(e) => warn!(error = %e, "Store ping failed"),
    }
    if state.status.operator_mode() {
        warn!("Operator mode enabled: GET /runs lists every stored run");
    }

    let app = router(state, max_body);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    info!("Stepwise API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
