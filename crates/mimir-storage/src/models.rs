// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================
// Import models
// ============================================

/// Import row from database
#[derive(Debug, Clone, FromRow)]
pub struct ImportRow {
    pub id: Uuid,
    pub name: String,
    pub row_count: i64,
    #[sqlx(json)]
    pub columns: Vec<String>,
    #[sqlx(json)]
    pub rows: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Input for registering an import
#[derive(Debug, Clone)]
pub struct CreateImport {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
}

// ============================================
// Workflow models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub name: String,
    pub import_id: Uuid,
    pub status: String,
    pub current_stage: Option<String>,
    pub total_steps: i32,
    pub completed_steps: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowStepRow {
    pub id: i64,
    pub workflow_id: Uuid,
    pub stage: String,
    pub step_order: i32,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub output: Option<serde_json::Value>,
}

/// Input for creating a workflow (steps are derived from `stages`)
#[derive(Debug, Clone)]
pub struct CreateWorkflow {
    pub name: String,
    pub import_id: Uuid,
    /// Stage names in execution order; one pending step row per entry.
    pub stages: Vec<String>,
}

// ============================================
// Artifact models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct WorkflowArtifactRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub stage: String,
    pub kind: String,
    pub artifact_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateArtifact {
    pub workflow_id: Uuid,
    pub stage: String,
    pub kind: String,
    pub artifact_id: Uuid,
    pub name: String,
}

// ============================================
// Scheduler models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct SchedulerJobRow {
    pub id: String,
    pub name: String,
    pub job_type: String,
    pub target: String,
    pub cron_expr: String,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateSchedulerJob {
    pub id: String,
    pub name: String,
    pub job_type: String,
    pub target: String,
    pub cron_expr: String,
    pub enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Input for mutating a scheduled job
#[derive(Debug, Clone, Default)]
pub struct UpdateSchedulerJob {
    pub name: Option<String>,
    pub cron_expr: Option<String>,
    pub enabled: Option<bool>,
    pub next_run_at: Option<DateTime<Utc>>,
}

// ============================================
// Monitoring models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct MonitoringRuleRow {
    pub id: Uuid,
    pub name: String,
    pub twin_id: Uuid,
    pub property: String,
    pub kind: String,
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub window: Option<i32>,
    pub z_threshold: Option<f64>,
    pub severity: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMonitoringRule {
    pub name: String,
    pub twin_id: Uuid,
    pub property: String,
    pub kind: String,
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub window: Option<i32>,
    pub z_threshold: Option<f64>,
    pub severity: String,
    pub enabled: bool,
}

// ============================================
// Alert models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct AlertRow {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub severity: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub occurrence_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CreateAlert {
    pub rule_id: Uuid,
    pub severity: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct AlertRouteRow {
    pub id: Uuid,
    pub position: i32,
    pub min_severity: String,
    pub max_severity: String,
    pub twin_id: Option<Uuid>,
    #[sqlx(json)]
    pub channels: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateAlertRoute {
    pub position: i32,
    pub min_severity: String,
    pub max_severity: String,
    pub twin_id: Option<Uuid>,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct AlertDeliveryRow {
    pub alert_id: Uuid,
    pub channel: String,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

// ============================================
// Artifact domain models
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct InferredSchemaRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub import_id: Uuid,
    pub columns: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct OntologyRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub graph_uri: String,
    pub turtle: String,
    pub class_count: i32,
    pub property_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ModelRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub target_column: String,
    pub model_kind: String,
    pub metrics: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DigitalTwinRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub name: String,
    pub state: serde_json::Value,
    #[sqlx(json)]
    pub model_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TwinObservationRow {
    pub id: i64,
    pub twin_id: Uuid,
    pub property: String,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}
