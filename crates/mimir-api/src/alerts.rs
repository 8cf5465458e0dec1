// Alert HTTP routes

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use mimir_contracts::{
    AcknowledgeRequest, Alert, AlertDetail, AlertStatus, Severity,
};
use mimir_engine::{AlertManager, EngineError};

use crate::common::{alert_dto, delivery_dto, ApiError};

/// App state
#[derive(Clone)]
pub struct AppState {
    pub alerts: Arc<AlertManager>,
}

/// Query parameters for listing alerts
#[derive(Debug, Deserialize, ToSchema)]
pub struct ListAlertsParams {
    pub status: Option<String>,
    pub severity: Option<String>,
}

/// Create alert routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/alerts", get(list_alerts))
        .route("/api/v1/alerts/:alert_id", get(get_alert))
        .route("/api/v1/alerts/:alert_id/acknowledge", post(acknowledge_alert))
        .route("/api/v1/alerts/:alert_id/resolve", post(resolve_alert))
        .with_state(state)
}

/// GET /api/v1/alerts - List alerts with optional filters
#[utoipa::path(
    get,
    path = "/api/v1/alerts",
    params(
        ("status" = Option<String>, Query, description = "Filter by alert status"),
        ("severity" = Option<String>, Query, description = "Filter by severity")
    ),
    responses(
        (status = 200, description = "List of alerts", body = Vec<Alert>),
        (status = 400, description = "Invalid filter value")
    ),
    tag = "alerts"
)]
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<ListAlertsParams>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    if let Some(status) = params.status.as_deref() {
        status
            .parse::<AlertStatus>()
            .map_err(EngineError::InvalidInput)?;
    }
    if let Some(severity) = params.severity.as_deref() {
        severity
            .parse::<Severity>()
            .map_err(EngineError::InvalidInput)?;
    }

    let rows = state
        .alerts
        .list(params.status.as_deref(), params.severity.as_deref())
        .await?;
    Ok(Json(rows.into_iter().map(alert_dto).collect()))
}

/// GET /api/v1/alerts/:id - Alert with per-channel delivery status
#[utoipa::path(
    get,
    path = "/api/v1/alerts/{alert_id}",
    params(("alert_id" = Uuid, Path, description = "Alert ID")),
    responses(
        (status = 200, description = "Alert detail", body = AlertDetail),
        (status = 404, description = "Alert not found")
    ),
    tag = "alerts"
)]
pub async fn get_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<AlertDetail>, ApiError> {
    let (alert, deliveries) = state.alerts.get_detail(alert_id).await?;

    Ok(Json(AlertDetail {
        alert: alert_dto(alert),
        deliveries: deliveries.into_iter().map(delivery_dto).collect(),
    }))
}

/// POST /api/v1/alerts/:id/acknowledge
#[utoipa::path(
    post,
    path = "/api/v1/alerts/{alert_id}/acknowledge",
    params(("alert_id" = Uuid, Path, description = "Alert ID")),
    request_body = AcknowledgeRequest,
    responses(
        (status = 200, description = "Alert acknowledged", body = Alert),
        (status = 404, description = "Alert not found"),
        (status = 409, description = "Alert is resolved")
    ),
    tag = "alerts"
)]
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    Json(req): Json<AcknowledgeRequest>,
) -> Result<Json<Alert>, ApiError> {
    let alert = state
        .alerts
        .acknowledge(alert_id, &req.acknowledged_by)
        .await?;
    Ok(Json(alert_dto(alert)))
}

/// POST /api/v1/alerts/:id/resolve
#[utoipa::path(
    post,
    path = "/api/v1/alerts/{alert_id}/resolve",
    params(("alert_id" = Uuid, Path, description = "Alert ID")),
    responses(
        (status = 200, description = "Alert resolved", body = Alert),
        (status = 404, description = "Alert not found"),
        (status = 409, description = "Alert is already resolved")
    ),
    tag = "alerts"
)]
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<Alert>, ApiError> {
    let alert = state.alerts.resolve(alert_id).await?;
    Ok(Json(alert_dto(alert)))
}
