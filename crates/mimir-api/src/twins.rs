// Twin observation ingestion
//
// Observations feed the monitoring executor's time-series reads.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

use mimir_contracts::ObservationRequest;
use mimir_engine::EngineError;
use mimir_storage::Database;

use crate::common::ApiError;

/// App state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
}

/// Create twin routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/twins/:twin_id/observations", post(create_observation))
        .with_state(state)
}

/// POST /api/v1/twins/:id/observations - Append a time-series sample
#[utoipa::path(
    post,
    path = "/api/v1/twins/{twin_id}/observations",
    params(("twin_id" = Uuid, Path, description = "Twin ID")),
    request_body = ObservationRequest,
    responses(
        (status = 202, description = "Observation recorded"),
        (status = 400, description = "Missing property"),
        (status = 404, description = "Twin not found")
    ),
    tag = "twins"
)]
pub async fn create_observation(
    State(state): State<AppState>,
    Path(twin_id): Path<Uuid>,
    Json(req): Json<ObservationRequest>,
) -> Result<StatusCode, ApiError> {
    if req.property.trim().is_empty() {
        return Err(EngineError::InvalidInput("property is required".to_string()).into());
    }

    state
        .db
        .get_twin(twin_id)
        .await?
        .ok_or_else(|| EngineError::not_found("twin", twin_id))?;

    state
        .db
        .insert_observation(twin_id, &req.property, req.value)
        .await?;

    Ok(StatusCode::ACCEPTED)
}
