//! Built-in stage handlers
//!
//! Deliberately simple, deterministic implementations of the six pipeline
//! stages. The real schema-inference / ontology / ML algorithms are external
//! collaborators; what matters here is that each handler exercises the full
//! artifact protocol and the per-(workflow, stage) idempotency contract.

mod extraction;
mod monitoring_setup;
mod ontology;
mod schema;
mod training;
mod twin;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::orchestrator::StageHandler;

pub use extraction::EntityExtractionHandler;
pub use monitoring_setup::MonitoringSetupHandler;
pub use ontology::OntologyCreationHandler;
pub use schema::SchemaInferenceHandler;
pub use training::MlTrainingHandler;
pub use twin::TwinCreationHandler;

/// Column description produced by schema inference and consumed by the
/// downstream stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    /// One of: integer, float, boolean, text
    pub data_type: String,
    pub key_candidate: bool,
    /// Fraction of non-null samples agreeing with `data_type`.
    pub confidence: f64,
}

impl ColumnSpec {
    pub fn is_numeric(&self) -> bool {
        matches!(self.data_type.as_str(), "integer" | "float")
    }
}

/// One handler per stage, in pipeline order.
pub fn builtin_handlers() -> Vec<Arc<dyn StageHandler>> {
    vec![
        Arc::new(SchemaInferenceHandler),
        Arc::new(OntologyCreationHandler),
        Arc::new(EntityExtractionHandler),
        Arc::new(MlTrainingHandler::default()),
        Arc::new(TwinCreationHandler),
        Arc::new(MonitoringSetupHandler),
    ]
}

/// Extract a numeric sample from a JSON cell.
pub(crate) fn numeric_value(value: &serde_json::Value) -> Option<f64> {
    value.as_f64()
}

/// Reduce a free-form name to an identifier usable in URIs and Turtle.
pub(crate) fn sanitize_identifier(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        format!("_{cleaned}")
    } else if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::sync::Arc;

    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use mimir_storage::{CreateImport, Database};

    use crate::config::EngineConfig;
    use crate::graph::InMemoryGraphStore;
    use crate::orchestrator::StageContext;

    /// Context over a fresh in-memory database with a registered import.
    pub(crate) async fn stage_context() -> (StageContext, Arc<InMemoryGraphStore>) {
        stage_context_with(
            vec!["id".into(), "temperature".into(), "status".into()],
            vec![
                json!({"id": 1, "temperature": 20.5, "status": "ok"}),
                json!({"id": 2, "temperature": 21.5, "status": "ok"}),
                json!({"id": 3, "temperature": 19.0, "status": "warn"}),
            ],
        )
        .await
    }

    /// Same, but over a caller-supplied dataset.
    pub(crate) async fn stage_context_with(
        columns: Vec<String>,
        rows: Vec<serde_json::Value>,
    ) -> (StageContext, Arc<InMemoryGraphStore>) {
        let db = Database::in_memory().await.expect("in-memory db");
        let import = db
            .create_import(CreateImport {
                name: "sensor readings".into(),
                columns,
                rows,
            })
            .await
            .expect("import");

        let graph = Arc::new(InMemoryGraphStore::new());
        let ctx = StageContext {
            workflow_id: Uuid::now_v7(),
            import_id: import.id,
            db,
            graph: graph.clone(),
            cancel: CancellationToken::new(),
            config: Arc::new(EngineConfig::default()),
        };

        (ctx, graph)
    }
}
