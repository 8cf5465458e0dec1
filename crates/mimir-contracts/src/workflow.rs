// Workflow DTOs (autonomous pipeline run per imported dataset)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Workflow status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Workflow created but not started
    Pending,
    /// Workflow is running
    Running,
    /// All stages completed successfully
    Completed,
    /// A stage failed
    Failed,
    /// Workflow was cancelled
    Cancelled,
}

impl WorkflowStatus {
    /// Terminal states admit no further transitions except `Failed -> Running`
    /// on explicit re-execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown workflow status: {other}")),
        }
    }
}

/// Step status within a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

/// The closed set of pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    SchemaInference,
    OntologyCreation,
    EntityExtraction,
    MlTraining,
    TwinCreation,
    MonitoringSetup,
}

impl StageKind {
    /// All stages in declared execution order.
    pub const ALL: [StageKind; 6] = [
        StageKind::SchemaInference,
        StageKind::OntologyCreation,
        StageKind::EntityExtraction,
        StageKind::MlTraining,
        StageKind::TwinCreation,
        StageKind::MonitoringSetup,
    ];

    /// 1-based position within the pipeline.
    pub fn order(&self) -> i32 {
        match self {
            Self::SchemaInference => 1,
            Self::OntologyCreation => 2,
            Self::EntityExtraction => 3,
            Self::MlTraining => 4,
            Self::TwinCreation => 5,
            Self::MonitoringSetup => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SchemaInference => "schema_inference",
            Self::OntologyCreation => "ontology_creation",
            Self::EntityExtraction => "entity_extraction",
            Self::MlTraining => "ml_training",
            Self::TwinCreation => "twin_creation",
            Self::MonitoringSetup => "monitoring_setup",
        }
    }

    /// The stage that follows this one, if any.
    pub fn next(&self) -> Option<StageKind> {
        let idx = Self::ALL.iter().position(|s| s == self)?;
        Self::ALL.get(idx + 1).copied()
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schema_inference" => Ok(Self::SchemaInference),
            "ontology_creation" => Ok(Self::OntologyCreation),
            "entity_extraction" => Ok(Self::EntityExtraction),
            "ml_training" => Ok(Self::MlTraining),
            "twin_creation" => Ok(Self::TwinCreation),
            "monitoring_setup" => Ok(Self::MonitoringSetup),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Typed reference from a workflow stage to a durable output entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Schema,
    Ontology,
    Extraction,
    Model,
    Twin,
    MonitoringJob,
    AlertRule,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schema => write!(f, "schema"),
            Self::Ontology => write!(f, "ontology"),
            Self::Extraction => write!(f, "extraction"),
            Self::Model => write!(f, "model"),
            Self::Twin => write!(f, "twin"),
            Self::MonitoringJob => write!(f, "monitoring_job"),
            Self::AlertRule => write!(f, "alert_rule"),
        }
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schema" => Ok(Self::Schema),
            "ontology" => Ok(Self::Ontology),
            "extraction" => Ok(Self::Extraction),
            "model" => Ok(Self::Model),
            "twin" => Ok(Self::Twin),
            "monitoring_job" => Ok(Self::MonitoringJob),
            "alert_rule" => Ok(Self::AlertRule),
            other => Err(format!("unknown artifact kind: {other}")),
        }
    }
}

/// One autonomous run against one imported dataset.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub import_id: Uuid,
    pub status: WorkflowStatus,
    /// Name of the stage currently (or next) executing; empty when finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<StageKind>,
    pub total_steps: i32,
    pub completed_steps: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// One ordered stage within a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowStep {
    pub id: i64,
    pub workflow_id: Uuid,
    pub stage: StageKind,
    pub step_order: i32,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Opaque JSON payload describing what the stage produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

/// Typed reference to a durable entity produced by a stage.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowArtifact {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub stage: StageKind,
    pub kind: ArtifactKind,
    /// Foreign key into the artifact's domain table.
    pub artifact_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Request to create a workflow for an import.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWorkflowRequest {
    pub import_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// When false the workflow is created but never auto-executed.
    #[serde(default)]
    pub autonomous: Option<bool>,
}

/// Response for workflow creation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWorkflowResponse {
    pub workflow_id: Uuid,
    pub workflow: Workflow,
}

/// Consistent snapshot of a workflow with its steps and artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkflowDetail {
    pub workflow: Workflow,
    pub steps: Vec<WorkflowStep>,
    pub artifacts: Vec<WorkflowArtifact>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_is_contiguous() {
        for (idx, stage) in StageKind::ALL.iter().enumerate() {
            assert_eq!(stage.order(), idx as i32 + 1);
        }
    }

    #[test]
    fn stage_next_walks_the_pipeline() {
        assert_eq!(
            StageKind::SchemaInference.next(),
            Some(StageKind::OntologyCreation)
        );
        assert_eq!(StageKind::MonitoringSetup.next(), None);
    }

    #[test]
    fn stage_round_trips_through_str() {
        for stage in StageKind::ALL {
            assert_eq!(stage.as_str().parse::<StageKind>().unwrap(), stage);
        }
    }

    #[test]
    fn workflow_status_terminality() {
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
    }
}
