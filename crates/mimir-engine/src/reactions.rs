//! Chain-reaction handler
//!
//! Declarative wiring between subsystems: on event X, invoke action Y
//! through the scheduler/orchestrator/alert-manager APIs. Every reaction
//! runs on a detached task so publication never blocks on downstream work;
//! outcomes (including failures) land in a bounded in-memory log, never
//! back at the publisher.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use mimir_contracts::Severity;
use mimir_storage::Database;

use crate::alerts::AlertManager;
use crate::bus::{Event, EventBus, EventType, SubscriptionId};
use crate::orchestrator::WorkflowOrchestrator;
use crate::scheduler::JobScheduler;

const SOURCE: &str = "chain_reactions";

/// Tunables for the reaction table.
#[derive(Debug, Clone)]
pub struct ReactionConfig {
    /// Default for drift events that do not carry an `auto_remediate` flag.
    pub auto_remediate: bool,
    /// Minimum spacing between remediations of the same pipeline.
    pub drift_debounce: Duration,
    /// Minimum spacing between ontology re-versions of the same import.
    pub reversion_debounce: Duration,
    /// training_completed accuracy gate for the twin-update reaction.
    pub accuracy_threshold: f64,
    /// Bounded reaction-log size.
    pub log_capacity: usize,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            auto_remediate: true,
            drift_debounce: Duration::from_secs(300),
            reversion_debounce: Duration::from_secs(300),
            accuracy_threshold: 0.7,
            log_capacity: 1000,
        }
    }
}

/// One recorded reaction outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ReactionLogEntry {
    pub at: DateTime<Utc>,
    pub event_type: String,
    pub action: String,
    pub outcome: String,
}

/// Event-to-action wiring with a bounded reaction log and a global on/off
/// switch.
pub struct ChainReactionHandler {
    db: Database,
    bus: Arc<EventBus>,
    scheduler: Arc<JobScheduler>,
    orchestrator: Arc<WorkflowOrchestrator>,
    alerts: Arc<AlertManager>,
    config: ReactionConfig,
    log: Mutex<VecDeque<ReactionLogEntry>>,
    enabled: AtomicBool,
    drift_seen: Mutex<HashMap<String, Instant>>,
    reversion_seen: Mutex<HashMap<String, Instant>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl ChainReactionHandler {
    pub fn new(
        db: Database,
        bus: Arc<EventBus>,
        scheduler: Arc<JobScheduler>,
        orchestrator: Arc<WorkflowOrchestrator>,
        alerts: Arc<AlertManager>,
        config: ReactionConfig,
    ) -> Self {
        Self {
            db,
            bus,
            scheduler,
            orchestrator,
            alerts,
            config,
            log: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
            drift_seen: Mutex::new(HashMap::new()),
            reversion_seen: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe the canonical reaction table on the bus.
    pub fn install(self: Arc<Self>) {
        let table = [
            EventType::PipelineCompleted,
            EventType::DriftDetected,
            EventType::ExtractionCompleted,
            EventType::OntologyVersionCreated,
            EventType::TrainingCompleted,
            EventType::AlertRaised,
        ];

        let mut subscriptions = self.subscriptions.lock();
        for event_type in table {
            let handler = self.clone();
            let id = self.bus.subscribe(event_type, "chain_reactions", move |event| {
                let handler = handler.clone();
                async move {
                    if !handler.is_enabled() {
                        return Ok(());
                    }
                    // Detach so the publisher never waits on reaction work.
                    tokio::spawn(async move { handler.react(event).await });
                    Ok(())
                }
                .boxed()
            });
            subscriptions.push(id);
        }
    }

    /// Remove the bus subscriptions. In-flight reactions finish on their own
    /// tasks.
    pub fn shutdown(&self) {
        let mut subscriptions = self.subscriptions.lock();
        for id in subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        tracing::info!(enabled, "chain reactions toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Most recent log entries, newest first.
    pub fn log(&self, limit: usize) -> Vec<ReactionLogEntry> {
        let log = self.log.lock();
        log.iter().rev().take(limit).cloned().collect()
    }

    fn record(&self, event_type: EventType, action: &str, outcome: impl Into<String>) {
        let entry = ReactionLogEntry {
            at: Utc::now(),
            event_type: event_type.as_str().to_string(),
            action: action.to_string(),
            outcome: outcome.into(),
        };
        tracing::debug!(
            event_type = %entry.event_type,
            action = %entry.action,
            outcome = %entry.outcome,
            "reaction"
        );

        let mut log = self.log.lock();
        if log.len() >= self.config.log_capacity {
            log.pop_front();
        }
        log.push_back(entry);
    }

    async fn react(&self, event: Event) {
        match event.event_type {
            EventType::PipelineCompleted => self.on_pipeline_completed(&event).await,
            EventType::DriftDetected => self.on_drift_detected(&event).await,
            EventType::ExtractionCompleted => self.on_extraction_completed(&event).await,
            EventType::OntologyVersionCreated => self.on_ontology_version_created(&event).await,
            EventType::TrainingCompleted => self.on_training_completed(&event).await,
            EventType::AlertRaised => self.on_alert_raised(&event).await,
            _ => {}
        }
    }

    /// pipeline_completed (triggered_by user/schedule) -> enqueue extraction
    /// by starting the autonomous workflow for the pipeline's import.
    async fn on_pipeline_completed(&self, event: &Event) {
        const ACTION: &str = "enqueue extraction";

        let triggered_by = event.payload_str("triggered_by").unwrap_or("user");
        if !matches!(triggered_by, "user" | "schedule") {
            self.record(
                event.event_type,
                ACTION,
                format!("skipped: triggered_by={triggered_by}"),
            );
            return;
        }

        let Some(import_id) = self.payload_uuid(event, "import_id") else {
            self.record(event.event_type, ACTION, "skipped: no import reference");
            return;
        };

        self.start_workflow(event.event_type, ACTION, import_id).await;
    }

    /// drift_detected (auto_remediate) -> re-run the source pipeline,
    /// debounced per pipeline.
    async fn on_drift_detected(&self, event: &Event) {
        const ACTION: &str = "re-run source pipeline";

        let auto = event
            .payload_bool("auto_remediate")
            .unwrap_or(self.config.auto_remediate);
        if !auto {
            self.record(event.event_type, ACTION, "skipped: auto_remediate off");
            return;
        }

        let Some(pipeline_id) = event.payload_str("pipeline_id").map(str::to_string) else {
            self.record(event.event_type, ACTION, "skipped: no pipeline reference");
            return;
        };

        let debounced = {
            let mut seen = self.drift_seen.lock();
            match seen.get(&pipeline_id) {
                Some(last) if last.elapsed() < self.config.drift_debounce => true,
                _ => {
                    seen.insert(pipeline_id.clone(), Instant::now());
                    false
                }
            }
        };
        if debounced {
            self.record(event.event_type, ACTION, "skipped: debounced");
            return;
        }

        let job = match self.scheduler.find_job_by_target("pipeline", &pipeline_id).await {
            Ok(job) => job,
            Err(err) => {
                self.record(event.event_type, ACTION, format!("failed: {err}"));
                return;
            }
        };

        match job {
            Some(job) => match self.scheduler.trigger_now(&job.id).await {
                Ok(()) => {
                    self.record(
                        event.event_type,
                        ACTION,
                        format!("pipeline job '{}' pulled forward", job.id),
                    );
                }
                Err(err) => self.record(event.event_type, ACTION, format!("failed: {err}")),
            },
            None => self.record(event.event_type, ACTION, "skipped: no pipeline job"),
        }
    }

    /// extraction_completed (new entities, structural changes observed) ->
    /// announce a new ontology version, debounced per import so an import
    /// whose rows stay ahead of its schema cannot re-version in a loop.
    async fn on_extraction_completed(&self, event: &Event) {
        const ACTION: &str = "publish ontology_version_created";

        let new_entities = event.payload_i64("new_entities").unwrap_or(0);
        let structural = event.payload_bool("structural_changes").unwrap_or(false);

        if new_entities <= 0 || !structural {
            self.record(
                event.event_type,
                ACTION,
                "skipped: no structural changes".to_string(),
            );
            return;
        }

        let key = event
            .payload_str("import_id")
            .or_else(|| event.payload_str("workflow_id"))
            .unwrap_or("unscoped")
            .to_string();
        let debounced = {
            let mut seen = self.reversion_seen.lock();
            match seen.get(&key) {
                Some(last) if last.elapsed() < self.config.reversion_debounce => true,
                _ => {
                    seen.insert(key, Instant::now());
                    false
                }
            }
        };
        if debounced {
            self.record(event.event_type, ACTION, "skipped: debounced");
            return;
        }

        let mut payload = json!({ "new_entities": new_entities });
        if let Some(workflow_id) = event.payload_str("workflow_id") {
            payload["workflow_id"] = json!(workflow_id);
        }
        if let Some(import_id) = event.payload_str("import_id") {
            payload["import_id"] = json!(import_id);
        }

        self.bus
            .publish(Event::new(EventType::OntologyVersionCreated, SOURCE, payload))
            .await;
        self.record(event.event_type, ACTION, "published");
    }

    /// ontology_version_created -> trigger auto-ML training by running the
    /// autonomous workflow over the import again.
    async fn on_ontology_version_created(&self, event: &Event) {
        const ACTION: &str = "trigger auto-ML training";

        let Some(import_id) = self.payload_uuid(event, "import_id") else {
            self.record(event.event_type, ACTION, "skipped: no import reference");
            return;
        };

        self.start_workflow(event.event_type, ACTION, import_id).await;
    }

    /// training_completed (accuracy above the gate) -> refresh the digital
    /// twin and announce completion. The orchestrator's own pipeline runs
    /// its twin stage anyway, so those events are skipped.
    async fn on_training_completed(&self, event: &Event) {
        const ACTION: &str = "update digital twin";

        if event.source == "orchestrator" {
            self.record(event.event_type, ACTION, "skipped: pipeline-managed");
            return;
        }

        let accuracy = event.payload_f64("accuracy").unwrap_or(0.0);
        if accuracy < self.config.accuracy_threshold {
            self.record(
                event.event_type,
                ACTION,
                format!("skipped: accuracy {accuracy:.2} below threshold"),
            );
            return;
        }

        let Some(workflow_id) = self.payload_uuid(event, "workflow_id") else {
            self.record(event.event_type, ACTION, "skipped: no workflow reference");
            return;
        };

        let outcome = self.refresh_twin(workflow_id).await;
        match outcome {
            Ok(Some(twin_id)) => {
                self.bus
                    .publish(Event::new(
                        EventType::WorkflowCompleted,
                        SOURCE,
                        json!({ "workflow_id": workflow_id, "twin_id": twin_id }),
                    ))
                    .await;
                self.record(event.event_type, ACTION, format!("twin {twin_id} refreshed"));
            }
            Ok(None) => self.record(event.event_type, ACTION, "skipped: no twin for workflow"),
            Err(err) => self.record(event.event_type, ACTION, format!("failed: {err}")),
        }
    }

    /// alert_raised -> dispatch through the alert manager.
    async fn on_alert_raised(&self, event: &Event) {
        const ACTION: &str = "dispatch to alert manager";

        if let Some(alert_id) = self.payload_uuid(event, "alert_id") {
            match self.alerts.dispatch(alert_id).await {
                Ok(()) => self.record(event.event_type, ACTION, "dispatched"),
                Err(err) => self.record(event.event_type, ACTION, format!("failed: {err}")),
            }
            return;
        }

        // Row-less incident (e.g. scheduler auto-disable): notify without
        // delivery bookkeeping.
        let severity = event
            .payload_str("severity")
            .and_then(|s| s.parse::<Severity>().ok())
            .unwrap_or(Severity::Medium);
        let title = event.payload_str("title").unwrap_or("alert").to_string();
        let description = event.payload_str("description").unwrap_or("").to_string();

        match self.alerts.notify_adhoc(severity, &title, &description).await {
            Ok(()) => self.record(event.event_type, ACTION, "notified (ad-hoc)"),
            Err(err) => self.record(event.event_type, ACTION, format!("failed: {err}")),
        }
    }

    async fn start_workflow(&self, event_type: EventType, action: &str, import_id: Uuid) {
        let workflow = match self.orchestrator.create(import_id, None).await {
            Ok(workflow) => workflow,
            Err(crate::error::EngineError::Conflict(_)) => {
                self.record(event_type, action, "skipped: active workflow exists");
                return;
            }
            Err(err) => {
                self.record(event_type, action, format!("failed: {err}"));
                return;
            }
        };

        match self.orchestrator.execute(workflow.id).await {
            Ok(()) => self.record(
                event_type,
                action,
                format!("workflow {} started", workflow.id),
            ),
            Err(err) => self.record(event_type, action, format!("failed: {err}")),
        }
    }

    async fn refresh_twin(&self, workflow_id: Uuid) -> anyhow::Result<Option<Uuid>> {
        let Some(twin) = self.db.get_twin_for_workflow(workflow_id).await? else {
            return Ok(None);
        };

        let models = self.db.list_models_for_workflow(workflow_id).await?;
        let model_ids: Vec<Uuid> = models.iter().map(|m| m.id).collect();
        self.db
            .update_twin_state(twin.id, twin.state.clone(), Some(&model_ids))
            .await?;

        Ok(Some(twin.id))
    }

    fn payload_uuid(&self, event: &Event, key: &str) -> Option<Uuid> {
        event.payload_str(key).and_then(|s| s.parse().ok())
    }
}
