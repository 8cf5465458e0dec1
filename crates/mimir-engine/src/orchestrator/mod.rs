//! Workflow orchestrator
//!
//! Persistent, resumable state machine executing a fixed ordered sequence of
//! stages per imported dataset. Progress is persisted after every observable
//! transition; after a crash the state is reconstructed from the database
//! and the interrupted stage re-runs (handlers are idempotent per
//! (workflow, stage)).

mod run;
pub mod stage;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mimir_contracts::StageKind;
use mimir_storage::{
    CreateWorkflow, Database, WorkflowArtifactRow, WorkflowRow, WorkflowStepRow,
};

use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::graph::GraphStore;

use run::WorkflowRun;
pub use stage::{StageArtifact, StageContext, StageHandler, StageOutput, StageRegistry};

/// Consistent snapshot returned by `get`.
#[derive(Debug, Clone)]
pub struct WorkflowSnapshot {
    pub workflow: WorkflowRow,
    pub steps: Vec<WorkflowStepRow>,
    pub artifacts: Vec<WorkflowArtifactRow>,
}

/// Orchestrates autonomous workflows on detached tokio tasks.
pub struct WorkflowOrchestrator {
    db: Database,
    bus: Arc<EventBus>,
    registry: Arc<StageRegistry>,
    graph: Arc<dyn GraphStore>,
    config: Arc<EngineConfig>,
    /// Active workflows (workflow_id -> task handle)
    active: Arc<RwLock<HashMap<Uuid, JoinHandle<()>>>>,
    /// Cancellation tokens for running workflows
    cancel_tokens: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl WorkflowOrchestrator {
    pub fn new(
        db: Database,
        bus: Arc<EventBus>,
        registry: StageRegistry,
        graph: Arc<dyn GraphStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            bus,
            registry: Arc::new(registry),
            graph,
            config: Arc::new(config),
            active: Arc::new(RwLock::new(HashMap::new())),
            cancel_tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a workflow for an import: one row plus six pending steps,
    /// transactionally.
    pub async fn create(
        &self,
        import_id: Uuid,
        name: Option<String>,
    ) -> Result<WorkflowRow, EngineError> {
        let import = self
            .db
            .get_import(import_id)
            .await?
            .ok_or_else(|| EngineError::InvalidInput(format!("import {import_id} does not exist")))?;

        if let Some(existing) = self.db.find_active_workflow_for_import(import_id).await? {
            return Err(EngineError::Conflict(format!(
                "import {import_id} already has an active workflow ({})",
                existing.id
            )));
        }

        let name = name.unwrap_or_else(|| format!("autonomous: {}", import.name));
        let stages = StageKind::ALL
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let workflow = self
            .db
            .create_workflow(CreateWorkflow {
                name,
                import_id,
                stages,
            })
            .await?;

        tracing::info!(workflow_id = %workflow.id, %import_id, "workflow created");
        Ok(workflow)
    }

    /// Move the workflow to running and start its background task. Returns
    /// immediately; poll `get` for progress.
    pub async fn execute(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        let workflow = self
            .db
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))?;

        match workflow.status.as_str() {
            "pending" => {}
            "failed" => {
                // Re-execution rewinds to the first non-completed step.
                self.db.rewind_workflow(workflow_id).await?;
            }
            other => {
                return Err(EngineError::InvalidState(format!(
                    "workflow {workflow_id} is {other}, expected pending or failed"
                )));
            }
        }

        let transitioned = self
            .db
            .transition_workflow(workflow_id, &["pending", "failed"], "running")
            .await?;
        if !transitioned {
            return Err(EngineError::InvalidState(format!(
                "workflow {workflow_id} changed state concurrently"
            )));
        }

        self.spawn_run(workflow_id, workflow.import_id).await;
        Ok(())
    }

    /// Consistent snapshot of workflow, steps, and artifacts.
    pub async fn get(&self, workflow_id: Uuid) -> Result<WorkflowSnapshot, EngineError> {
        let workflow = self
            .db
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))?;
        let steps = self.db.list_steps(workflow_id).await?;
        let artifacts = self.db.list_artifacts(workflow_id).await?;

        Ok(WorkflowSnapshot {
            workflow,
            steps,
            artifacts,
        })
    }

    /// Request cooperative cancellation. A running stage observes the signal
    /// at its next suspension point; a pending workflow is cancelled
    /// directly.
    pub async fn cancel(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        let workflow = self
            .db
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::workflow_not_found(workflow_id))?;

        match workflow.status.as_str() {
            "pending" => {
                self.db
                    .transition_workflow(workflow_id, &["pending"], "cancelled")
                    .await?;
                tracing::info!(%workflow_id, "pending workflow cancelled");
                Ok(())
            }
            "running" => {
                let token = self.cancel_tokens.lock().await.get(&workflow_id).cloned();
                match token {
                    Some(token) => {
                        token.cancel();
                        tracing::info!(%workflow_id, "cancellation requested");
                    }
                    None => {
                        // Running in the database but not in this process
                        // (e.g. cancel raced recovery): finish it directly.
                        self.db
                            .transition_workflow(workflow_id, &["running"], "cancelled")
                            .await?;
                        tracing::info!(%workflow_id, "orphaned running workflow cancelled");
                    }
                }
                Ok(())
            }
            other => Err(EngineError::InvalidState(format!(
                "workflow {workflow_id} is {other}, expected pending or running"
            ))),
        }
    }

    /// Re-enter workflows that were running when the process died. Their
    /// interrupted step is reset to pending and the run resumes, relying on
    /// stage-handler idempotency.
    pub async fn recover_running_workflows(&self) -> Result<usize, EngineError> {
        let recovered = self.db.reset_running_steps().await?;
        let count = recovered.len();

        for workflow_id in recovered {
            let Some(workflow) = self.db.get_workflow(workflow_id).await? else {
                continue;
            };
            tracing::info!(%workflow_id, "resuming workflow after restart");
            self.spawn_run(workflow_id, workflow.import_id).await;
        }

        Ok(count)
    }

    pub async fn is_running(&self, workflow_id: Uuid) -> bool {
        self.active.read().await.contains_key(&workflow_id)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Wait for in-flight workflow tasks up to the deadline, then abort the
    /// stragglers. Aborted workflows keep their `running` row and resume via
    /// recovery on the next start.
    pub async fn shutdown(&self, deadline: Duration) {
        let handles: Vec<(Uuid, JoinHandle<()>)> =
            self.active.write().await.drain().collect();
        let started = Instant::now();

        for (workflow_id, handle) in handles {
            let remaining = deadline.saturating_sub(started.elapsed());
            let abort = handle.abort_handle();
            if tokio::time::timeout(remaining, handle).await.is_err() {
                abort.abort();
                tracing::warn!(%workflow_id, "workflow task did not stop before deadline, aborted");
            }
        }
    }

    async fn spawn_run(&self, workflow_id: Uuid, import_id: Uuid) {
        let cancel = CancellationToken::new();
        self.cancel_tokens
            .lock()
            .await
            .insert(workflow_id, cancel.clone());

        let run = WorkflowRun {
            db: self.db.clone(),
            bus: self.bus.clone(),
            registry: self.registry.clone(),
            graph: self.graph.clone(),
            config: self.config.clone(),
            workflow_id,
            import_id,
            cancel,
        };

        let active = self.active.clone();
        let cancel_tokens = self.cancel_tokens.clone();

        let handle = tokio::spawn(async move {
            run.execute().await;

            // Cleanup
            cancel_tokens.lock().await.remove(&workflow_id);
            active.write().await.remove(&workflow_id);
        });

        self.active.write().await.insert(workflow_id, handle);
    }
}
