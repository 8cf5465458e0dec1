// Scheduler job HTTP routes

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use mimir_contracts::{CreateJobRequest, SchedulerJob, UpdateJobRequest};
use mimir_engine::JobScheduler;

use crate::common::{job_dto, ApiError};

/// App state
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<JobScheduler>,
}

/// Create scheduler routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/scheduler/jobs", get(list_jobs).post(create_job))
        .route(
            "/api/v1/scheduler/jobs/:job_id",
            get(get_job).put(update_job).delete(delete_job),
        )
        .route("/api/v1/scheduler/jobs/:job_id/enable", post(enable_job))
        .route("/api/v1/scheduler/jobs/:job_id/disable", post(disable_job))
        .with_state(state)
}

/// POST /api/v1/scheduler/jobs - Register a scheduled job
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 200, description = "Job registered", body = SchedulerJob),
        (status = 400, description = "Invalid cron expression or missing field"),
        (status = 409, description = "Duplicate job id")
    ),
    tag = "scheduler"
)]
pub async fn create_job(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<SchedulerJob>, ApiError> {
    // Decode by hand so a missing field is a 400, not a 422.
    let req: CreateJobRequest = serde_json::from_value(body).map_err(|e| {
        mimir_engine::EngineError::InvalidInput(format!("invalid request body: {e}"))
    })?;

    let job = state.scheduler.add_job(req).await?;
    Ok(Json(job_dto(job)))
}

/// GET /api/v1/scheduler/jobs - List all jobs
#[utoipa::path(
    get,
    path = "/api/v1/scheduler/jobs",
    responses(
        (status = 200, description = "List of jobs", body = Vec<SchedulerJob>)
    ),
    tag = "scheduler"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
) -> Result<Json<Vec<SchedulerJob>>, ApiError> {
    let jobs = state.scheduler.list_jobs().await?;
    Ok(Json(jobs.into_iter().map(job_dto).collect()))
}

/// GET /api/v1/scheduler/jobs/:id
#[utoipa::path(
    get,
    path = "/api/v1/scheduler/jobs/{job_id}",
    params(("job_id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job found", body = SchedulerJob),
        (status = 404, description = "Job not found")
    ),
    tag = "scheduler"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<SchedulerJob>, ApiError> {
    let job = state.scheduler.get_job(&job_id).await?;
    Ok(Json(job_dto(job)))
}

/// PUT /api/v1/scheduler/jobs/:id - Update name, cron, or enabled flag
#[utoipa::path(
    put,
    path = "/api/v1/scheduler/jobs/{job_id}",
    params(("job_id" = String, Path, description = "Job ID")),
    request_body = UpdateJobRequest,
    responses(
        (status = 200, description = "Job updated", body = SchedulerJob),
        (status = 400, description = "Invalid cron expression"),
        (status = 404, description = "Job not found")
    ),
    tag = "scheduler"
)]
pub async fn update_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(req): Json<UpdateJobRequest>,
) -> Result<Json<SchedulerJob>, ApiError> {
    let job = state.scheduler.update_job(&job_id, req).await?;
    Ok(Json(job_dto(job)))
}

/// DELETE /api/v1/scheduler/jobs/:id
#[utoipa::path(
    delete,
    path = "/api/v1/scheduler/jobs/{job_id}",
    params(("job_id" = String, Path, description = "Job ID")),
    responses(
        (status = 204, description = "Job removed"),
        (status = 404, description = "Job not found")
    ),
    tag = "scheduler"
)]
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<axum::http::StatusCode, ApiError> {
    state.scheduler.remove_job(&job_id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// POST /api/v1/scheduler/jobs/:id/enable
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/jobs/{job_id}/enable",
    params(("job_id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job enabled", body = SchedulerJob),
        (status = 404, description = "Job not found")
    ),
    tag = "scheduler"
)]
pub async fn enable_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<SchedulerJob>, ApiError> {
    let job = state.scheduler.set_enabled(&job_id, true).await?;
    Ok(Json(job_dto(job)))
}

/// POST /api/v1/scheduler/jobs/:id/disable
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/jobs/{job_id}/disable",
    params(("job_id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job disabled", body = SchedulerJob),
        (status = 404, description = "Job not found")
    ),
    tag = "scheduler"
)]
pub async fn disable_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<SchedulerJob>, ApiError> {
    let job = state.scheduler.set_enabled(&job_id, false).await?;
    Ok(Json(job_dto(job)))
}
