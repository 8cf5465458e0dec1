//! Per-workflow execution loop
//!
//! One `WorkflowRun` drives one workflow on a detached task: pick the first
//! pending step, mark it running, invoke its handler, persist the outcome,
//! repeat. The loop holds no locks while a handler executes; every
//! observable transition is written before the next one begins, so the state
//! machine is fully reconstructible from the database after a crash.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mimir_contracts::StageKind;
use mimir_storage::{CreateArtifact, Database, WorkflowStepRow};

use crate::bus::{Event, EventBus, EventType};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::graph::GraphStore;

use super::stage::{StageContext, StageOutput, StageRegistry};

const SOURCE: &str = "orchestrator";

/// Retry a database write once after a short backoff before giving up.
async fn retry_db<T, F, Fut>(mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    match op().await {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::warn!(error = %first, "database write failed, retrying once");
            tokio::time::sleep(Duration::from_millis(200)).await;
            op().await
        }
    }
}

pub(crate) struct WorkflowRun {
    pub db: Database,
    pub bus: Arc<EventBus>,
    pub registry: Arc<StageRegistry>,
    pub graph: Arc<dyn GraphStore>,
    pub config: Arc<EngineConfig>,
    pub workflow_id: Uuid,
    pub import_id: Uuid,
    pub cancel: CancellationToken,
}

impl WorkflowRun {
    /// Drive the workflow until it reaches a terminal state or this process
    /// is asked to stop.
    pub async fn execute(&self) {
        loop {
            let steps = match self.db.list_steps(self.workflow_id).await {
                Ok(steps) => steps,
                Err(err) => {
                    tracing::error!(workflow_id = %self.workflow_id, error = %err, "failed to load steps");
                    return;
                }
            };

            let Some(step) = steps.iter().find(|s| s.status == "pending") else {
                // Nothing pending: the last completed step already finished
                // the workflow, or a failure/cancellation ended the run.
                return;
            };

            if self.cancel.is_cancelled() {
                self.cancel_at(step).await;
                return;
            }

            let stage: StageKind = match step.stage.parse() {
                Ok(stage) => stage,
                Err(err) => {
                    tracing::error!(workflow_id = %self.workflow_id, error = %err, "unknown stage name");
                    self.fail_at(step, &format!("unknown stage: {}", step.stage))
                        .await;
                    return;
                }
            };

            if !self.run_stage(step, stage).await {
                return;
            }
        }
    }

    /// Execute one stage. Returns true when the loop should continue with
    /// the next step.
    async fn run_stage(&self, step: &WorkflowStepRow, stage: StageKind) -> bool {
        let step_id = step.id;
        let workflow_id = self.workflow_id;

        let started = retry_db(|| self.db.start_step(step_id, workflow_id, stage.as_str())).await;
        match started {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(%workflow_id, %stage, "step no longer pending, abandoning run");
                return false;
            }
            Err(err) => {
                tracing::error!(%workflow_id, %stage, error = %err, "failed to mark step running");
                return false;
            }
        }

        // Enforced idempotency: drop artifact records of a previous attempt
        // before the handler runs again.
        if let Err(err) = self.db.clear_stage_artifacts(workflow_id, stage.as_str()).await {
            tracing::warn!(%workflow_id, %stage, error = %err, "failed to clear stage artifacts");
        }

        if stage == StageKind::MlTraining {
            self.publish(EventType::TrainingStarted, json!({ "workflow_id": workflow_id }))
                .await;
        }

        tracing::info!(%workflow_id, %stage, "stage started");

        let result = self.invoke_handler(stage).await;

        match result {
            Ok(output) => {
                if let Err(err) = self.record_success(step_id, stage, &output).await {
                    tracing::error!(%workflow_id, %stage, error = %err, "failed to persist stage completion");
                    return false;
                }
                self.publish_stage_events(stage, &output).await;
                true
            }
            Err(EngineError::Cancelled) => {
                self.cancel_at(step).await;
                false
            }
            Err(err) => {
                let message = err.to_string();
                self.fail_at(step, &message).await;
                false
            }
        }
    }

    /// Run the stage handler, racing it against cancellation and the
    /// configured per-stage timeout.
    async fn invoke_handler(&self, stage: StageKind) -> Result<StageOutput, EngineError> {
        let handler = self.registry.get(stage)?;
        let ctx = StageContext {
            workflow_id: self.workflow_id,
            import_id: self.import_id,
            db: self.db.clone(),
            graph: self.graph.clone(),
            cancel: self.cancel.clone(),
            config: self.config.clone(),
        };

        let timeout = async {
            match self.config.stage_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => futures::future::pending().await,
            }
        };

        tokio::select! {
            result = handler.execute(&ctx) => result,
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            _ = timeout => Err(EngineError::Timeout(format!(
                "stage {stage} exceeded {:?}",
                self.config.stage_timeout.unwrap_or_default()
            ))),
        }
    }

    async fn record_success(
        &self,
        step_id: i64,
        stage: StageKind,
        output: &StageOutput,
    ) -> anyhow::Result<()> {
        for artifact in &output.artifacts {
            let input = CreateArtifact {
                workflow_id: self.workflow_id,
                stage: stage.as_str().to_string(),
                kind: artifact.kind.to_string(),
                artifact_id: artifact.artifact_id,
                name: artifact.name.clone(),
            };
            retry_db(|| self.db.insert_artifact(input.clone())).await?;
        }

        let next_stage = stage.next();
        retry_db(|| {
            self.db.complete_step(
                step_id,
                self.workflow_id,
                output.payload.clone(),
                next_stage.map(|s| s.as_str()),
            )
        })
        .await?;

        tracing::info!(workflow_id = %self.workflow_id, %stage, "stage completed");
        Ok(())
    }

    async fn publish_stage_events(&self, stage: StageKind, output: &StageOutput) {
        self.publish(
            EventType::StageCompleted,
            json!({
                "workflow_id": self.workflow_id,
                "stage": stage.as_str(),
                "artifacts": output.artifacts.len(),
            }),
        )
        .await;

        match stage {
            StageKind::EntityExtraction => {
                let new_entities = output
                    .payload
                    .get("entities")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                let structural_changes = output
                    .payload
                    .get("structural_changes")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                self.publish(
                    EventType::ExtractionCompleted,
                    json!({
                        "workflow_id": self.workflow_id,
                        "import_id": self.import_id,
                        "new_entities": new_entities,
                        "structural_changes": structural_changes,
                    }),
                )
                .await;
            }
            StageKind::MlTraining => {
                let accuracy = output
                    .payload
                    .get("accuracy")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                self.publish(
                    EventType::TrainingCompleted,
                    json!({
                        "workflow_id": self.workflow_id,
                        "accuracy": accuracy,
                    }),
                )
                .await;
            }
            StageKind::MonitoringSetup => {
                // Final stage: the workflow row is already terminal.
                self.publish(
                    EventType::WorkflowCompleted,
                    json!({
                        "workflow_id": self.workflow_id,
                        "import_id": self.import_id,
                    }),
                )
                .await;
            }
            _ => {}
        }
    }

    async fn fail_at(&self, step: &WorkflowStepRow, message: &str) {
        let step_id = step.id;
        if let Err(err) = retry_db(|| self.db.fail_step(step_id, self.workflow_id, message)).await {
            tracing::error!(workflow_id = %self.workflow_id, error = %err, "failed to persist stage failure");
        }

        tracing::warn!(
            workflow_id = %self.workflow_id,
            stage = %step.stage,
            error = %message,
            "stage failed"
        );

        self.publish(
            EventType::StageFailed,
            json!({
                "workflow_id": self.workflow_id,
                "stage": step.stage,
                "error": message,
            }),
        )
        .await;

        self.publish(
            EventType::WorkflowFailed,
            json!({
                "workflow_id": self.workflow_id,
                "error": message,
            }),
        )
        .await;
    }

    async fn cancel_at(&self, step: &WorkflowStepRow) {
        let step_id = step.id;
        if let Err(err) =
            retry_db(|| self.db.skip_step_and_cancel(step_id, self.workflow_id)).await
        {
            tracing::error!(workflow_id = %self.workflow_id, error = %err, "failed to persist cancellation");
        }

        tracing::info!(
            workflow_id = %self.workflow_id,
            stage = %step.stage,
            "workflow cancelled"
        );
    }

    async fn publish(&self, event_type: EventType, payload: serde_json::Value) {
        self.bus.publish(Event::new(event_type, SOURCE, payload)).await;
    }
}
