// Import registration routes
//
// Imports arrive as JSON; the multipart/file-upload surface that produces
// them lives outside the engine.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use mimir_contracts::{CreateImportRequest, Import};
use mimir_engine::EngineError;
use mimir_storage::{CreateImport, Database};

use crate::common::{import_dto, ApiError};

/// App state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
}

/// Create import routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/imports", post(create_import))
        .route("/api/v1/imports/:import_id", get(get_import))
        .with_state(state)
}

/// POST /api/v1/imports - Register a tabular dataset
#[utoipa::path(
    post,
    path = "/api/v1/imports",
    request_body = CreateImportRequest,
    responses(
        (status = 201, description = "Import registered", body = Import),
        (status = 400, description = "Missing name or columns")
    ),
    tag = "imports"
)]
pub async fn create_import(
    State(state): State<AppState>,
    Json(req): Json<CreateImportRequest>,
) -> Result<(StatusCode, Json<Import>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(EngineError::InvalidInput("import name is required".to_string()).into());
    }
    if req.columns.is_empty() {
        return Err(EngineError::InvalidInput("import needs at least one column".to_string()).into());
    }

    let row = state
        .db
        .create_import(CreateImport {
            name: req.name,
            columns: req.columns,
            rows: req.rows,
        })
        .await?;

    tracing::info!(import_id = %row.id, rows = row.row_count, "import registered");
    Ok((StatusCode::CREATED, Json(import_dto(row))))
}

/// GET /api/v1/imports/:id
#[utoipa::path(
    get,
    path = "/api/v1/imports/{import_id}",
    params(("import_id" = Uuid, Path, description = "Import ID")),
    responses(
        (status = 200, description = "Import found", body = Import),
        (status = 404, description = "Import not found")
    ),
    tag = "imports"
)]
pub async fn get_import(
    State(state): State<AppState>,
    Path(import_id): Path<Uuid>,
) -> Result<Json<Import>, ApiError> {
    let row = state
        .db
        .get_import(import_id)
        .await?
        .ok_or_else(|| EngineError::not_found("import", import_id))?;

    Ok(Json(import_dto(row)))
}
