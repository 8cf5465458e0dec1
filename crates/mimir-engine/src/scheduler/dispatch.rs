//! Job dispatch
//!
//! The scheduler is agnostic about what a job does; a `JobDispatcher` turns
//! a due job row into work. `EngineJobDispatcher` wires the three job types
//! to the engine's own components; pipeline execution stays behind a seam
//! (`PipelineRunner`) because user-defined pipelines are an external
//! collaborator.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use mimir_contracts::{JobType, WorkflowTriggerSpec};
use mimir_storage::{Database, SchedulerJobRow};

use crate::bus::{Event, EventBus, EventType};
use crate::error::EngineError;
use crate::monitoring::MonitoringExecutor;
use crate::orchestrator::WorkflowOrchestrator;

/// What happened to a dispatched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    /// The job's underlying target row no longer exists; the scheduler
    /// auto-disables the job.
    TargetMissing,
}

#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: &SchedulerJobRow) -> Result<DispatchOutcome, EngineError>;
}

/// Seam for user-defined pipeline execution.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(&self, pipeline_id: &str) -> Result<(), EngineError>;
}

/// Default pipeline runner: announces the run on the bus so chain reactions
/// (extraction enqueue etc.) can pick it up.
pub struct EventPipelineRunner {
    bus: Arc<EventBus>,
}

impl EventPipelineRunner {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl PipelineRunner for EventPipelineRunner {
    async fn run(&self, pipeline_id: &str) -> Result<(), EngineError> {
        self.bus
            .publish(Event::new(
                EventType::PipelineCompleted,
                "scheduler",
                json!({
                    "pipeline_id": pipeline_id,
                    "triggered_by": "schedule",
                }),
            ))
            .await;
        Ok(())
    }
}

/// Routes due jobs to the engine components by job type.
pub struct EngineJobDispatcher {
    db: Database,
    monitoring: Arc<MonitoringExecutor>,
    orchestrator: Arc<WorkflowOrchestrator>,
    pipelines: Arc<dyn PipelineRunner>,
}

impl EngineJobDispatcher {
    pub fn new(
        db: Database,
        monitoring: Arc<MonitoringExecutor>,
        orchestrator: Arc<WorkflowOrchestrator>,
        pipelines: Arc<dyn PipelineRunner>,
    ) -> Self {
        Self {
            db,
            monitoring,
            orchestrator,
            pipelines,
        }
    }

    async fn dispatch_monitoring(
        &self,
        job: &SchedulerJobRow,
    ) -> Result<DispatchOutcome, EngineError> {
        let twin_id = Uuid::from_str(&job.target).map_err(|_| {
            EngineError::InvalidInput(format!("job '{}' target is not a twin id", job.id))
        })?;

        if self.db.get_twin(twin_id).await?.is_none() {
            return Ok(DispatchOutcome::TargetMissing);
        }

        self.monitoring.run_for_twin(twin_id).await?;
        Ok(DispatchOutcome::Completed)
    }

    async fn dispatch_workflow_trigger(
        &self,
        job: &SchedulerJobRow,
    ) -> Result<DispatchOutcome, EngineError> {
        let spec: WorkflowTriggerSpec = serde_json::from_str(&job.target).map_err(|e| {
            EngineError::InvalidInput(format!("job '{}' target is not a workflow spec: {e}", job.id))
        })?;

        if self.db.get_import(spec.import_id).await?.is_none() {
            return Ok(DispatchOutcome::TargetMissing);
        }

        let workflow = match self.orchestrator.create(spec.import_id, spec.name.clone()).await {
            Ok(workflow) => workflow,
            Err(EngineError::Conflict(_)) => {
                tracing::info!(
                    job_id = %job.id,
                    import_id = %spec.import_id,
                    "import already has an active workflow, skipping trigger"
                );
                return Ok(DispatchOutcome::Completed);
            }
            Err(err) => return Err(err),
        };

        self.orchestrator.execute(workflow.id).await?;
        Ok(DispatchOutcome::Completed)
    }
}

#[async_trait]
impl JobDispatcher for EngineJobDispatcher {
    async fn dispatch(&self, job: &SchedulerJobRow) -> Result<DispatchOutcome, EngineError> {
        let job_type: JobType = job
            .job_type
            .parse()
            .map_err(EngineError::InvalidInput)?;

        match job_type {
            JobType::Monitoring => self.dispatch_monitoring(job).await,
            JobType::WorkflowTrigger => self.dispatch_workflow_trigger(job).await,
            JobType::Pipeline => {
                self.pipelines.run(&job.target).await?;
                Ok(DispatchOutcome::Completed)
            }
        }
    }
}
