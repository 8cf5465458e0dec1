// End-to-end engine tests over an in-memory database and graph store.
//
// These walk the full pipeline the way the HTTP layer would: register an
// import, create and execute a workflow, then observe persisted state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use mimir_contracts::StageKind;
use mimir_engine::prelude::*;
use mimir_engine::{ChainReactionHandler, ReactionConfig};
use mimir_storage::{CreateImport, Database};

struct FailingHandler {
    stage: StageKind,
}

#[async_trait]
impl StageHandler for FailingHandler {
    fn stage(&self) -> StageKind {
        self.stage
    }

    async fn execute(&self, _ctx: &StageContext) -> Result<StageOutput, EngineError> {
        Err(EngineError::HandlerFailed(
            "simulated training failure".to_string(),
        ))
    }
}

struct SlowHandler {
    stage: StageKind,
}

#[async_trait]
impl StageHandler for SlowHandler {
    fn stage(&self) -> StageKind {
        self.stage
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, EngineError> {
        for _ in 0..500 {
            ctx.check_cancelled()?;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(StageOutput::default())
    }
}

struct Engine {
    db: Database,
    bus: Arc<EventBus>,
    graph: Arc<InMemoryGraphStore>,
    orchestrator: Arc<WorkflowOrchestrator>,
}

async fn engine_with(registry: StageRegistry) -> Engine {
    let db = Database::in_memory().await.expect("in-memory db");
    let bus = Arc::new(EventBus::new());
    let graph = Arc::new(InMemoryGraphStore::new());
    let orchestrator = Arc::new(WorkflowOrchestrator::new(
        db.clone(),
        bus.clone(),
        registry,
        graph.clone(),
        EngineConfig::default(),
    ));

    Engine {
        db,
        bus,
        graph,
        orchestrator,
    }
}

async fn engine() -> Engine {
    engine_with(StageRegistry::builtin()).await
}

async fn sample_import(db: &Database) -> Uuid {
    db.create_import(CreateImport {
        name: "sensor readings".into(),
        columns: vec!["id".into(), "temperature".into(), "humidity".into()],
        rows: (0..10)
            .map(|i| {
                json!({
                    "id": i,
                    "temperature": 20.0 + i as f64 * 0.5,
                    "humidity": 40.0 + i as f64,
                })
            })
            .collect(),
    })
    .await
    .expect("import")
    .id
}

async fn wait_for_status(db: &Database, workflow_id: Uuid, status: &str) {
    for _ in 0..500 {
        let workflow = db.get_workflow(workflow_id).await.unwrap().unwrap();
        if workflow.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let workflow = db.get_workflow(workflow_id).await.unwrap().unwrap();
    panic!(
        "workflow never reached {status}; stuck at {} ({:?})",
        workflow.status, workflow.error_message
    );
}

#[tokio::test]
async fn happy_path_runs_all_six_stages() {
    let engine = engine().await;
    let import_id = sample_import(&engine.db).await;

    let workflow = engine.orchestrator.create(import_id, None).await.unwrap();
    assert_eq!(workflow.status, "pending");
    assert_eq!(workflow.total_steps, 6);

    engine.orchestrator.execute(workflow.id).await.unwrap();
    wait_for_status(&engine.db, workflow.id, "completed").await;

    let snapshot = engine.orchestrator.get(workflow.id).await.unwrap();
    assert_eq!(snapshot.workflow.completed_steps, 6);
    assert!(snapshot.workflow.completed_at.is_some());
    assert!(snapshot.workflow.completed_at.unwrap() >= snapshot.workflow.created_at);
    assert!(snapshot.workflow.current_stage.is_none());

    // All six steps completed, in order, with timestamps.
    assert_eq!(snapshot.steps.len(), 6);
    for (idx, step) in snapshot.steps.iter().enumerate() {
        assert_eq!(step.step_order, idx as i32 + 1);
        assert_eq!(step.status, "completed", "step {} not completed", step.stage);
        assert!(step.completed_at.unwrap() >= step.started_at.unwrap());
        assert!(step.output.is_some());
    }

    // completed_steps matches the actual completed step count.
    let completed = snapshot.steps.iter().filter(|s| s.status == "completed").count();
    assert_eq!(snapshot.workflow.completed_steps as usize, completed);

    // At least one artifact of each expected kind.
    for kind in ["schema", "ontology", "extraction", "model", "twin", "monitoring_job", "alert_rule"] {
        assert!(
            snapshot.artifacts.iter().any(|a| a.kind == kind),
            "missing {kind} artifact"
        );
    }

    // The monitoring job landed in the scheduler table.
    let jobs = engine.db.list_jobs().await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_type, "monitoring");
}

#[tokio::test]
async fn stage_failure_stops_the_pipeline() {
    let mut registry = StageRegistry::builtin();
    registry.register(Arc::new(FailingHandler {
        stage: StageKind::MlTraining,
    }));
    let engine = engine_with(registry).await;
    let import_id = sample_import(&engine.db).await;

    let workflow = engine.orchestrator.create(import_id, None).await.unwrap();
    engine.orchestrator.execute(workflow.id).await.unwrap();
    wait_for_status(&engine.db, workflow.id, "failed").await;

    let snapshot = engine.orchestrator.get(workflow.id).await.unwrap();
    assert!(snapshot
        .workflow
        .error_message
        .as_deref()
        .unwrap()
        .contains("simulated training failure"));

    // Exactly one failed step; everything before completed, after pending.
    let failed: Vec<_> = snapshot.steps.iter().filter(|s| s.status == "failed").collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].stage, "ml_training");
    assert!(failed[0].error_message.is_some());

    for step in &snapshot.steps {
        match step.stage.as_str() {
            "schema_inference" | "ontology_creation" | "entity_extraction" => {
                assert_eq!(step.status, "completed")
            }
            "twin_creation" | "monitoring_setup" => assert_eq!(step.status, "pending"),
            _ => {}
        }
    }

    // No twin artifact was produced.
    assert!(!snapshot.artifacts.iter().any(|a| a.kind == "twin"));
    assert!(engine
        .db
        .get_twin_for_workflow(workflow.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn failed_workflow_can_be_re_executed() {
    let mut registry = StageRegistry::builtin();
    registry.register(Arc::new(FailingHandler {
        stage: StageKind::MlTraining,
    }));
    let engine = engine_with(registry).await;
    let import_id = sample_import(&engine.db).await;

    let workflow = engine.orchestrator.create(import_id, None).await.unwrap();
    engine.orchestrator.execute(workflow.id).await.unwrap();
    wait_for_status(&engine.db, workflow.id, "failed").await;

    // Fix the handler and re-execute: resumes at ml_training.
    let orchestrator = WorkflowOrchestrator::new(
        engine.db.clone(),
        engine.bus.clone(),
        StageRegistry::builtin(),
        Arc::new(InMemoryGraphStore::new()),
        EngineConfig::default(),
    );

    orchestrator.execute(workflow.id).await.unwrap();
    wait_for_status(&engine.db, workflow.id, "completed").await;

    let snapshot = orchestrator.get(workflow.id).await.unwrap();
    assert_eq!(snapshot.workflow.completed_steps, 6);
    assert!(snapshot.workflow.error_message.is_none());
    assert!(snapshot.steps.iter().all(|s| s.status == "completed"));
}

#[tokio::test]
async fn crash_recovery_resumes_the_interrupted_stage() {
    let engine = engine().await;
    let import_id = sample_import(&engine.db).await;

    let workflow = engine.orchestrator.create(import_id, None).await.unwrap();

    // Simulate a crash mid-extraction: workflow running, the first two
    // stages genuinely executed, extraction left in running with no task
    // behind it.
    engine
        .db
        .transition_workflow(workflow.id, &["pending"], "running")
        .await
        .unwrap();

    let ctx = StageContext {
        workflow_id: workflow.id,
        import_id,
        db: engine.db.clone(),
        graph: engine.graph.clone(),
        cancel: tokio_util::sync::CancellationToken::new(),
        config: Arc::new(EngineConfig::default()),
    };

    let steps = engine.db.list_steps(workflow.id).await.unwrap();
    let prereqs: [Arc<dyn StageHandler>; 2] = [
        Arc::new(mimir_engine::stages::SchemaInferenceHandler),
        Arc::new(mimir_engine::stages::OntologyCreationHandler),
    ];
    for (step, handler) in steps[..2].iter().zip(prereqs) {
        engine
            .db
            .start_step(step.id, workflow.id, &step.stage)
            .await
            .unwrap();
        let output = handler.execute(&ctx).await.unwrap();
        engine
            .db
            .complete_step(step.id, workflow.id, output.payload, Some(&steps[2].stage))
            .await
            .unwrap();
    }
    engine
        .db
        .start_step(steps[2].id, workflow.id, &steps[2].stage)
        .await
        .unwrap();

    // Restart: running steps rewind to pending, then the run resumes.
    let recovered = engine.orchestrator.recover_running_workflows().await.unwrap();
    assert_eq!(recovered, 1);

    wait_for_status(&engine.db, workflow.id, "completed").await;

    let snapshot = engine.orchestrator.get(workflow.id).await.unwrap();
    assert_eq!(snapshot.workflow.completed_steps, 6);

    // Exactly one extraction artifact despite the re-run.
    let extractions: Vec<_> = snapshot
        .artifacts
        .iter()
        .filter(|a| a.kind == "extraction")
        .collect();
    assert_eq!(extractions.len(), 1);
}

#[tokio::test]
async fn cancellation_skips_the_running_stage() {
    let mut registry = StageRegistry::builtin();
    registry.register(Arc::new(SlowHandler {
        stage: StageKind::SchemaInference,
    }));
    let engine = engine_with(registry).await;
    let import_id = sample_import(&engine.db).await;

    let workflow = engine.orchestrator.create(import_id, None).await.unwrap();
    engine.orchestrator.execute(workflow.id).await.unwrap();

    // Give the slow stage a moment to start, then cancel.
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.orchestrator.cancel(workflow.id).await.unwrap();

    wait_for_status(&engine.db, workflow.id, "cancelled").await;

    let snapshot = engine.orchestrator.get(workflow.id).await.unwrap();
    let first = &snapshot.steps[0];
    assert_eq!(first.status, "skipped");
    // Later steps were never touched.
    assert!(snapshot.steps[1..].iter().all(|s| s.status == "pending"));
}

#[tokio::test]
async fn duplicate_active_workflow_is_a_conflict() {
    let engine = engine().await;
    let import_id = sample_import(&engine.db).await;

    engine.orchestrator.create(import_id, None).await.unwrap();
    let err = engine.orchestrator.create(import_id, None).await.unwrap_err();
    assert_eq!(err.code(), "conflict");
}

#[tokio::test]
async fn execute_rejects_bad_states() {
    let engine = engine().await;
    let import_id = sample_import(&engine.db).await;

    let missing = engine.orchestrator.execute(Uuid::now_v7()).await.unwrap_err();
    assert_eq!(missing.code(), "not_found");

    let workflow = engine.orchestrator.create(import_id, None).await.unwrap();
    engine.orchestrator.execute(workflow.id).await.unwrap();
    wait_for_status(&engine.db, workflow.id, "completed").await;

    let done = engine.orchestrator.execute(workflow.id).await.unwrap_err();
    assert_eq!(done.code(), "invalid_state");
}

#[tokio::test]
async fn create_rejects_unknown_import() {
    let engine = engine().await;

    let err = engine
        .orchestrator
        .create(Uuid::now_v7(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_input");
}

struct NoopDispatcher;

#[async_trait]
impl JobDispatcher for NoopDispatcher {
    async fn dispatch(
        &self,
        _job: &mimir_storage::SchedulerJobRow,
    ) -> Result<DispatchOutcome, EngineError> {
        Ok(DispatchOutcome::Completed)
    }
}

fn install_reactions(engine: &Engine) -> Arc<ChainReactionHandler> {
    let scheduler = Arc::new(JobScheduler::new(
        engine.db.clone(),
        engine.bus.clone(),
        Arc::new(NoopDispatcher),
        Duration::from_millis(50),
        5,
    ));
    let alerts = Arc::new(AlertManager::new(engine.db.clone(), RetryPolicy::default()));
    let reactions = Arc::new(ChainReactionHandler::new(
        engine.db.clone(),
        engine.bus.clone(),
        scheduler,
        engine.orchestrator.clone(),
        alerts,
        ReactionConfig::default(),
    ));
    reactions.clone().install();
    reactions
}

#[tokio::test]
async fn chain_reaction_starts_workflow_from_pipeline_event() {
    let engine = engine().await;
    let import_id = sample_import(&engine.db).await;
    let reactions = install_reactions(&engine);

    engine
        .bus
        .publish(Event::new(
            EventType::PipelineCompleted,
            "test",
            json!({
                "triggered_by": "user",
                "import_id": import_id.to_string(),
            }),
        ))
        .await;

    // The reaction runs detached; wait for the workflow it started.
    for _ in 0..500 {
        let workflows = engine.db.list_workflows(None).await.unwrap();
        if workflows
            .first()
            .is_some_and(|w| w.status == "completed")
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let workflows = engine.db.list_workflows(None).await.unwrap();
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0].status, "completed");

    let log = reactions.log(10);
    assert!(log
        .iter()
        .any(|e| e.event_type == "pipeline_completed" && e.outcome.contains("started")));
}

#[tokio::test]
async fn structural_change_chains_into_new_ontology_version_and_training() {
    let engine = engine().await;
    let import_id = sample_import(&engine.db).await;
    let reactions = install_reactions(&engine);

    // Extraction reporting unmodeled properties: the reaction publishes
    // ontology_version_created, which in turn triggers auto-ML training by
    // running the autonomous workflow over the import.
    engine
        .bus
        .publish(Event::new(
            EventType::ExtractionCompleted,
            "test",
            json!({
                "workflow_id": Uuid::now_v7().to_string(),
                "import_id": import_id.to_string(),
                "new_entities": 5,
                "structural_changes": true,
            }),
        ))
        .await;

    for _ in 0..500 {
        let workflows = engine.db.list_workflows(None).await.unwrap();
        if workflows.first().is_some_and(|w| w.status == "completed") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let workflows = engine.db.list_workflows(None).await.unwrap();
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0].status, "completed");

    let log = reactions.log(10);
    assert!(log
        .iter()
        .any(|e| e.event_type == "extraction_completed" && e.outcome == "published"));
    assert!(log
        .iter()
        .any(|e| e.event_type == "ontology_version_created" && e.outcome.contains("started")));
}

#[tokio::test]
async fn extraction_without_structural_changes_does_not_reversion() {
    let engine = engine().await;
    let reactions = install_reactions(&engine);

    engine
        .bus
        .publish(Event::new(
            EventType::ExtractionCompleted,
            "test",
            json!({
                "workflow_id": Uuid::now_v7().to_string(),
                "new_entities": 5,
                "structural_changes": false,
            }),
        ))
        .await;

    for _ in 0..200 {
        if !reactions.log(10).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let log = reactions.log(10);
    assert!(log
        .iter()
        .any(|e| e.event_type == "extraction_completed"
            && e.outcome.contains("no structural changes")));
    assert!(!log.iter().any(|e| e.event_type == "ontology_version_created"));
    assert!(engine.db.list_workflows(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn reaction_log_records_failures_without_surfacing_them() {
    let engine = engine().await;
    let reactions = install_reactions(&engine);

    // Unknown import: the reaction fails internally, publish still returns.
    engine
        .bus
        .publish(Event::new(
            EventType::PipelineCompleted,
            "test",
            json!({
                "triggered_by": "user",
                "import_id": Uuid::now_v7().to_string(),
            }),
        ))
        .await;

    for _ in 0..200 {
        if !reactions.log(10).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let log = reactions.log(10);
    assert!(log.iter().any(|e| e.outcome.starts_with("failed:")));
}
