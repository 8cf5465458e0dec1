// Scheduler job DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// What a scheduled job dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// User-defined pipeline run
    Pipeline,
    /// Monitoring-rule evaluation pass for a twin
    Monitoring,
    /// Workflow (re-)execution trigger
    WorkflowTrigger,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::Monitoring => write!(f, "monitoring"),
            Self::WorkflowTrigger => write!(f, "workflow_trigger"),
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipeline" => Ok(Self::Pipeline),
            "monitoring" => Ok(Self::Monitoring),
            "workflow_trigger" => Ok(Self::WorkflowTrigger),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

/// A persistent scheduled unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SchedulerJob {
    pub id: String,
    pub name: String,
    pub job_type: JobType,
    /// Pipeline ID, twin ID, or workflow spec, depending on `job_type`.
    pub target: String,
    pub cron_expr: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    pub consecutive_failures: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register a scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateJobRequest {
    pub id: String,
    pub name: String,
    pub job_type: JobType,
    pub target: String,
    #[schema(example = "*/5 * * * *")]
    pub cron_expr: String,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Request to mutate a scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateJobRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Trigger payload stored in a `workflow_trigger` job's target.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowTriggerSpec {
    pub import_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
