// Workflow HTTP routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use mimir_contracts::{
    CreateWorkflowRequest, CreateWorkflowResponse, Workflow, WorkflowDetail, WorkflowStatus,
};
use mimir_engine::{EngineError, WorkflowOrchestrator};
use mimir_storage::Database;

use crate::common::{artifact_dto, step_dto, workflow_dto, ApiError};

/// App state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub orchestrator: Arc<WorkflowOrchestrator>,
}

/// Query parameters for listing workflows
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListWorkflowsParams {
    pub status: Option<String>,
}

/// Create workflow routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/workflows", get(list_workflows).post(create_workflow))
        .route("/api/v1/workflows/:workflow_id", get(get_workflow))
        .route("/api/v1/workflows/:workflow_id/execute", post(execute_workflow))
        .route("/api/v1/workflows/:workflow_id/cancel", post(cancel_workflow))
        .with_state(state)
}

/// POST /api/v1/workflows - Create a workflow for an import
///
/// With `autonomous` (the default) the workflow starts executing
/// immediately; otherwise it stays pending until an explicit execute.
#[utoipa::path(
    post,
    path = "/api/v1/workflows",
    request_body = CreateWorkflowRequest,
    responses(
        (status = 201, description = "Workflow created", body = CreateWorkflowResponse),
        (status = 400, description = "Missing or unknown import"),
        (status = 409, description = "Import already has an active workflow")
    ),
    tag = "workflows"
)]
pub async fn create_workflow(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<CreateWorkflowResponse>), ApiError> {
    // Decode by hand so a missing import_id is a 400, not a 422.
    let req: CreateWorkflowRequest = serde_json::from_value(body)
        .map_err(|e| EngineError::InvalidInput(format!("invalid request body: {e}")))?;

    let workflow = state.orchestrator.create(req.import_id, req.name).await?;
    let workflow_id = workflow.id;

    if req.autonomous.unwrap_or(true) {
        state.orchestrator.execute(workflow_id).await?;
    }

    // Re-read so the response reflects any immediate status change.
    let snapshot = state.orchestrator.get(workflow_id).await?;
    tracing::info!(%workflow_id, "workflow created via API");

    Ok((
        StatusCode::CREATED,
        Json(CreateWorkflowResponse {
            workflow_id,
            workflow: workflow_dto(snapshot.workflow),
        }),
    ))
}

/// GET /api/v1/workflows - List workflows, optionally by status
#[utoipa::path(
    get,
    path = "/api/v1/workflows",
    params(
        ("status" = Option<String>, Query, description = "Filter by workflow status")
    ),
    responses(
        (status = 200, description = "List of workflows", body = Vec<Workflow>),
        (status = 400, description = "Invalid status filter")
    ),
    tag = "workflows"
)]
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(params): Query<ListWorkflowsParams>,
) -> Result<Json<Vec<Workflow>>, ApiError> {
    if let Some(status) = params.status.as_deref() {
        status
            .parse::<WorkflowStatus>()
            .map_err(EngineError::InvalidInput)?;
    }

    let rows = state.db.list_workflows(params.status.as_deref()).await?;
    Ok(Json(rows.into_iter().map(workflow_dto).collect()))
}

/// GET /api/v1/workflows/:id - Workflow with steps and artifacts
#[utoipa::path(
    get,
    path = "/api/v1/workflows/{workflow_id}",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Workflow snapshot", body = WorkflowDetail),
        (status = 404, description = "Workflow not found")
    ),
    tag = "workflows"
)]
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<Json<WorkflowDetail>, ApiError> {
    let snapshot = state.orchestrator.get(workflow_id).await?;

    Ok(Json(WorkflowDetail {
        workflow: workflow_dto(snapshot.workflow),
        steps: snapshot.steps.into_iter().map(step_dto).collect(),
        artifacts: snapshot.artifacts.into_iter().map(artifact_dto).collect(),
    }))
}

/// POST /api/v1/workflows/:id/execute - Start (or resume) execution
#[utoipa::path(
    post,
    path = "/api/v1/workflows/{workflow_id}/execute",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 202, description = "Execution started"),
        (status = 404, description = "Workflow not found"),
        (status = 409, description = "Workflow is not pending or failed")
    ),
    tag = "workflows"
)]
pub async fn execute_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.execute(workflow_id).await?;
    tracing::info!(%workflow_id, "workflow execution requested");
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/v1/workflows/:id/cancel - Request cooperative cancellation
#[utoipa::path(
    post,
    path = "/api/v1/workflows/{workflow_id}/cancel",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 202, description = "Cancellation requested"),
        (status = 404, description = "Workflow not found"),
        (status = 409, description = "Workflow is already terminal")
    ),
    tag = "workflows"
)]
pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.cancel(workflow_id).await?;
    tracing::info!(%workflow_id, "workflow cancellation requested");
    Ok(StatusCode::ACCEPTED)
}
