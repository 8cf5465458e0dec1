// Mimir API server library
//
// `AppContext` owns the engine singletons and their lifecycle: startup in
// dependency order (persistence, event bus, alert manager, scheduler,
// chain reactions, orchestrator), teardown in reverse. The binary in
// main.rs is a thin wrapper; tests drive the router directly.

pub mod alerts;
pub mod common;
pub mod imports;
pub mod reactions;
pub mod scheduler;
pub mod twins;
pub mod workflows;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use mimir_contracts::*;
use mimir_engine::prelude::*;
use mimir_engine::{EventPipelineRunner, GraphStore, HttpGraphStore, InMemoryGraphStore};
use mimir_storage::Database;

/// All engine singletons, initialized once per process.
pub struct AppContext {
    pub config: EngineConfig,
    pub db: Arc<Database>,
    pub bus: Arc<EventBus>,
    pub alerts: Arc<AlertManager>,
    pub monitoring: Arc<MonitoringExecutor>,
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub scheduler: Arc<JobScheduler>,
    pub reactions: Arc<ChainReactionHandler>,
}

impl AppContext {
    /// Construct and wire every component. Recovery (scheduler timers,
    /// interrupted workflows) runs here; the scheduler tick loop starts
    /// before this returns.
    pub async fn initialize(config: EngineConfig) -> Result<Self> {
        // Persistence
        let db = if config.database_path == ":memory:" {
            Database::in_memory().await?
        } else {
            Database::from_path(&config.database_path).await?
        };

        // Event bus
        let bus = Arc::new(EventBus::new());

        // Graph store: HTTP endpoint when configured, in-memory otherwise.
        let graph: Arc<dyn GraphStore> = match &config.graph_store_url {
            Some(url) => Arc::new(HttpGraphStore::new(url.clone(), config.graph_dataset.clone())),
            None => Arc::new(InMemoryGraphStore::new()),
        };

        // Alert manager
        let retry = RetryPolicy::default().with_max_attempts(config.alert_retries);
        let alerts = Arc::new(AlertManager::new(db.clone(), retry));

        // Monitoring executor
        let monitoring = Arc::new(MonitoringExecutor::new(db.clone(), bus.clone()));

        // Orchestrator with the built-in stage handlers
        let orchestrator = Arc::new(WorkflowOrchestrator::new(
            db.clone(),
            bus.clone(),
            StageRegistry::builtin(),
            graph,
            config.clone(),
        ));

        // Scheduler, dispatching to the engine components
        let dispatcher = Arc::new(EngineJobDispatcher::new(
            db.clone(),
            monitoring.clone(),
            orchestrator.clone(),
            Arc::new(EventPipelineRunner::new(bus.clone())),
        ));
        let scheduler = Arc::new(JobScheduler::new(
            db.clone(),
            bus.clone(),
            dispatcher,
            config.scheduler_tick,
            config.max_job_failures,
        ));

        // Chain reactions
        let reactions = Arc::new(ChainReactionHandler::new(
            db.clone(),
            bus.clone(),
            scheduler.clone(),
            orchestrator.clone(),
            alerts.clone(),
            ReactionConfig::default(),
        ));
        reactions.clone().install();

        // Recovery, then start ticking.
        scheduler.recover_from_database().await?;
        orchestrator.recover_running_workflows().await?;
        scheduler.clone().start();

        Ok(Self {
            config,
            db: Arc::new(db),
            bus,
            alerts,
            monitoring,
            orchestrator,
            scheduler,
            reactions,
        })
    }

    /// Build the HTTP router over this context.
    pub fn router(&self) -> Router {
        let workflows_state = workflows::AppState {
            db: self.db.clone(),
            orchestrator: self.orchestrator.clone(),
        };
        let scheduler_state = scheduler::AppState {
            scheduler: self.scheduler.clone(),
        };
        let alerts_state = alerts::AppState {
            alerts: self.alerts.clone(),
        };
        let imports_state = imports::AppState {
            db: self.db.clone(),
        };
        let twins_state = twins::AppState {
            db: self.db.clone(),
        };
        let reactions_state = reactions::AppState {
            reactions: self.reactions.clone(),
        };

        Router::new()
            .route("/health", get(health))
            .merge(workflows::routes(workflows_state))
            .merge(scheduler::routes(scheduler_state))
            .merge(alerts::routes(alerts_state))
            .merge(imports::routes(imports_state))
            .merge(twins::routes(twins_state))
            .merge(reactions::routes(reactions_state))
            .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
    }

    /// Tear down in reverse initialization order, waiting for in-flight
    /// work up to the deadline.
    pub async fn shutdown(&self, deadline: Duration) {
        tracing::info!("shutting down engine components");
        self.orchestrator.shutdown(deadline).await;
        self.reactions.shutdown();
        self.scheduler.shutdown(deadline).await;
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        workflows::create_workflow,
        workflows::list_workflows,
        workflows::get_workflow,
        workflows::execute_workflow,
        workflows::cancel_workflow,
        scheduler::create_job,
        scheduler::list_jobs,
        scheduler::get_job,
        scheduler::update_job,
        scheduler::delete_job,
        scheduler::enable_job,
        scheduler::disable_job,
        alerts::list_alerts,
        alerts::get_alert,
        alerts::acknowledge_alert,
        alerts::resolve_alert,
        imports::create_import,
        imports::get_import,
        twins::create_observation,
        reactions::reaction_log,
        reactions::enable_reactions,
        reactions::disable_reactions,
    ),
    components(
        schemas(
            Workflow, WorkflowStep, WorkflowArtifact, WorkflowDetail,
            WorkflowStatus, StepStatus, StageKind, ArtifactKind,
            CreateWorkflowRequest, CreateWorkflowResponse,
            SchedulerJob, JobType, CreateJobRequest, UpdateJobRequest,
            MonitoringRule, RuleKind, Severity, ObservationRequest,
            Alert, AlertStatus, AlertDetail, AlertDelivery, DeliveryStatus,
            AcknowledgeRequest,
            Import, CreateImportRequest,
            ErrorResponse, ErrorDetail,
        )
    ),
    tags(
        (name = "workflows", description = "Autonomous workflow lifecycle"),
        (name = "scheduler", description = "Cron-driven job management"),
        (name = "alerts", description = "Alert querying and lifecycle"),
        (name = "imports", description = "Dataset registration"),
        (name = "twins", description = "Digital-twin observations"),
        (name = "reactions", description = "Chain-reaction observability")
    ),
    info(
        title = "Mimir API",
        version = "0.2.0",
        description = "Autonomous workflow engine: imports, workflows, scheduling, monitoring, alerting",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

/// Bind and serve until ctrl-c, then shut the context down gracefully.
pub async fn serve(ctx: AppContext) -> Result<()> {
    let app = ctx.router();
    let addr = ctx.config.bind_addr.clone();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    ctx.shutdown(Duration::from_secs(10)).await;
    Ok(())
}
