// Shared API plumbing: error envelope and row-to-DTO conversions.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use mimir_contracts::{
    Alert, AlertDelivery, ErrorResponse, Import, SchedulerJob, Workflow, WorkflowArtifact,
    WorkflowStep,
};
use mimir_engine::EngineError;
use mimir_storage::{
    AlertDeliveryRow, AlertRow, ImportRow, SchedulerJobRow, WorkflowArtifactRow, WorkflowRow,
    WorkflowStepRow,
};

/// Engine error carried through axum. Maps the stable error codes onto HTTP
/// statuses and renders the `{error: {code, message}}` envelope.
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(EngineError::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.code() {
            "invalid_input" => StatusCode::BAD_REQUEST,
            "not_found" => StatusCode::NOT_FOUND,
            "invalid_state" | "conflict" | "cancelled" => StatusCode::CONFLICT,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            "unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "request failed");
        }

        let body = ErrorResponse::new(self.0.code(), self.0.to_string());
        (status, Json(body)).into_response()
    }
}

// ============================================
// Row -> DTO conversions
// ============================================

pub fn workflow_dto(row: WorkflowRow) -> Workflow {
    Workflow {
        id: row.id,
        name: row.name,
        import_id: row.import_id,
        status: row
            .status
            .parse()
            .unwrap_or(mimir_contracts::WorkflowStatus::Pending),
        current_stage: row.current_stage.and_then(|s| s.parse().ok()),
        total_steps: row.total_steps,
        completed_steps: row.completed_steps,
        error_message: row.error_message,
        created_at: row.created_at,
        updated_at: row.updated_at,
        completed_at: row.completed_at,
    }
}

pub fn step_dto(row: WorkflowStepRow) -> WorkflowStep {
    WorkflowStep {
        id: row.id,
        workflow_id: row.workflow_id,
        stage: row
            .stage
            .parse()
            .unwrap_or(mimir_contracts::StageKind::SchemaInference),
        step_order: row.step_order,
        status: row
            .status
            .parse()
            .unwrap_or(mimir_contracts::StepStatus::Pending),
        started_at: row.started_at,
        completed_at: row.completed_at,
        error_message: row.error_message,
        output: row.output,
    }
}

pub fn artifact_dto(row: WorkflowArtifactRow) -> WorkflowArtifact {
    WorkflowArtifact {
        id: row.id,
        workflow_id: row.workflow_id,
        stage: row
            .stage
            .parse()
            .unwrap_or(mimir_contracts::StageKind::SchemaInference),
        kind: row
            .kind
            .parse()
            .unwrap_or(mimir_contracts::ArtifactKind::Schema),
        artifact_id: row.artifact_id,
        name: row.name,
        created_at: row.created_at,
    }
}

pub fn job_dto(row: SchedulerJobRow) -> SchedulerJob {
    SchedulerJob {
        id: row.id,
        name: row.name,
        job_type: row
            .job_type
            .parse()
            .unwrap_or(mimir_contracts::JobType::Pipeline),
        target: row.target,
        cron_expr: row.cron_expr,
        enabled: row.enabled,
        last_run_at: row.last_run_at,
        next_run_at: row.next_run_at,
        consecutive_failures: row.consecutive_failures,
        last_error: row.last_error,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

pub fn alert_dto(row: AlertRow) -> Alert {
    Alert {
        id: row.id,
        rule_id: row.rule_id,
        severity: row
            .severity
            .parse()
            .unwrap_or(mimir_contracts::Severity::Low),
        title: row.title,
        description: row.description,
        status: row
            .status
            .parse()
            .unwrap_or(mimir_contracts::AlertStatus::Active),
        occurrence_count: row.occurrence_count,
        created_at: row.created_at,
        updated_at: row.updated_at,
        acknowledged_by: row.acknowledged_by,
        acknowledged_at: row.acknowledged_at,
        resolved_at: row.resolved_at,
    }
}

pub fn delivery_dto(row: AlertDeliveryRow) -> AlertDelivery {
    AlertDelivery {
        alert_id: row.alert_id,
        channel: row.channel,
        status: row
            .status
            .parse()
            .unwrap_or(mimir_contracts::DeliveryStatus::Pending),
        attempts: row.attempts,
        last_error: row.last_error,
        updated_at: row.updated_at,
    }
}

pub fn import_dto(row: ImportRow) -> Import {
    Import {
        id: row.id,
        name: row.name,
        row_count: row.row_count,
        columns: row.columns,
        created_at: row.created_at,
    }
}
