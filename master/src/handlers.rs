use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use common::{
    DispatchTaskRequest, DispatchTaskResponse, FetchStatus, JobStatus, MarkTaskCompleteRequest,
    MarkTaskCompleteResponse,
};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::CoordinatorError;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/job", get(get_job))
        .route("/api/v1/tasks/dispatch", post(dispatch_task))
        .route("/api/v1/tasks/complete", post(complete_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Foto del estado del job
async fn get_job(State(state): State<AppState>) -> Json<JobStatus> {
    Json(state.coordinator.status())
}

// Entrega la siguiente tarea (si hay)
async fn dispatch_task(
    State(state): State<AppState>,
    Json(_req): Json<DispatchTaskRequest>,
) -> Json<DispatchTaskResponse> {
    let resp = state.coordinator.dispatch();
    if resp.fetch_status == FetchStatus::NotReady {
        debug!("pidieron tarea pero todo lo pendiente está en vuelo");
    }
    Json(resp)
}

// Worker reporta que terminó una tarea
async fn complete_task(
    State(state): State<AppState>,
    Json(req): Json<MarkTaskCompleteRequest>,
) -> Result<Json<MarkTaskCompleteResponse>, CoordinatorError> {
    let task = req.task.ok_or(CoordinatorError::MissingTask)?;
    state.coordinator.mark_complete(&task)?;
    Ok(Json(MarkTaskCompleteResponse {}))
}
