//! Entity extraction stage
//!
//! Converts each sample row into RDF triples under the workflow's data
//! graph. The graph is cleared before loading, so re-runs never duplicate
//! entities. Row properties the ontology does not model are reported as a
//! structural change, which downstream wiring turns into a new ontology
//! version.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use mimir_contracts::{ArtifactKind, StageKind};

use crate::error::EngineError;
use crate::orchestrator::{StageArtifact, StageContext, StageHandler, StageOutput};

use super::{sanitize_identifier, ColumnSpec};

pub struct EntityExtractionHandler;

#[async_trait]
impl StageHandler for EntityExtractionHandler {
    fn stage(&self) -> StageKind {
        StageKind::EntityExtraction
    }

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, EngineError> {
        ctx.check_cancelled()?;

        let import = ctx
            .db
            .get_import(ctx.import_id)
            .await?
            .ok_or_else(|| {
                EngineError::HandlerFailed(format!("import {} is gone", ctx.import_id))
            })?;

        let ontology = ctx
            .db
            .get_ontology_for_workflow(ctx.workflow_id)
            .await?
            .ok_or_else(|| EngineError::HandlerFailed("no ontology for workflow".to_string()))?;

        let schema = ctx
            .db
            .get_inferred_schema_for_workflow(ctx.workflow_id)
            .await?
            .ok_or_else(|| {
                EngineError::HandlerFailed("no inferred schema for workflow".to_string())
            })?;
        let columns: Vec<ColumnSpec> = serde_json::from_value(schema.columns)
            .map_err(|e| EngineError::HandlerFailed(format!("schema decode: {e}")))?;

        let class_name = sanitize_identifier(&import.name);
        let data_graph = format!("{}/data", ctx.graph_uri());

        let (turtle, triples) = render_entities(ctx.workflow_id, &class_name, &import.rows);

        // Properties observed on entities that the ontology does not model;
        // any hit means the ontology needs a new version.
        let modeled: HashSet<String> = columns
            .iter()
            .map(|c| sanitize_identifier(&c.name))
            .collect();
        let new_properties = unmodeled_properties(&import.rows, &modeled);

        // Idempotency: the data graph holds only this workflow's entities.
        ctx.graph.clear_graph(&data_graph).await?;
        ctx.check_cancelled()?;
        if !turtle.is_empty() {
            ctx.graph.load_graph(&data_graph, &turtle).await?;
        }

        tracing::debug!(
            workflow_id = %ctx.workflow_id,
            entities = import.rows.len(),
            triples,
            ontology_graph = %ontology.graph_uri,
            "entities loaded"
        );

        Ok(StageOutput::new(json!({
            "entities": import.rows.len(),
            "triples": triples,
            "graph_uri": data_graph,
            "structural_changes": !new_properties.is_empty(),
            "new_properties": new_properties,
        }))
        .with_artifact(StageArtifact::new(
            ArtifactKind::Extraction,
            Uuid::now_v7(),
            format!("{} extraction", import.name),
        )))
    }
}

/// Sanitized row properties absent from the modeled set, sorted for
/// deterministic output.
fn unmodeled_properties(rows: &[serde_json::Value], modeled: &HashSet<String>) -> Vec<String> {
    let mut unmodeled = BTreeSet::new();

    for row in rows {
        let Some(object) = row.as_object() else {
            continue;
        };
        for (key, value) in object {
            if value.is_null() {
                continue;
            }
            let property = sanitize_identifier(key);
            if !modeled.contains(&property) {
                unmodeled.insert(property);
            }
        }
    }

    unmodeled.into_iter().collect()
}

/// Render one entity per row; one triple per non-null cell plus the type
/// assertion. Returns (turtle, triple count).
fn render_entities(
    workflow_id: Uuid,
    class_name: &str,
    rows: &[serde_json::Value],
) -> (String, i64) {
    if rows.is_empty() {
        return (String::new(), 0);
    }

    let mut turtle = String::new();
    turtle.push_str("@prefix mimir: <http://mimir-aip.io/ontology/> .\n\n");
    let mut triples = 0i64;

    for (idx, row) in rows.iter().enumerate() {
        let entity = format!("<mimir://workflows/{workflow_id}/entity/{idx}>");
        turtle.push_str(&format!("{entity} a mimir:{class_name} .\n"));
        triples += 1;

        let Some(object) = row.as_object() else {
            continue;
        };
        for (key, value) in object {
            if value.is_null() {
                continue;
            }
            let property = sanitize_identifier(key);
            let literal = turtle_literal(value);
            turtle.push_str(&format!("{entity} mimir:{property} {literal} .\n"));
            triples += 1;
        }
    }

    (turtle, triples)
}

fn turtle_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => {
            let text = match other {
                serde_json::Value::String(s) => s.clone(),
                _ => other.to_string(),
            };
            format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testutil::{stage_context, stage_context_with};
    use crate::stages::{OntologyCreationHandler, SchemaInferenceHandler};

    async fn run_prereqs(ctx: &crate::orchestrator::StageContext) {
        SchemaInferenceHandler.execute(ctx).await.unwrap();
        OntologyCreationHandler.execute(ctx).await.unwrap();
    }

    #[tokio::test]
    async fn loads_one_entity_per_row() {
        let (ctx, graph) = stage_context().await;
        run_prereqs(&ctx).await;

        let output = EntityExtractionHandler.execute(&ctx).await.unwrap();

        assert_eq!(output.payload["entities"], 3);
        // 3 rows x (1 type triple + 3 cells)
        assert_eq!(output.payload["triples"], 12);
        // Every row property is a declared column: no structural change.
        assert_eq!(output.payload["structural_changes"], false);

        let data_graph = format!("{}/data", ctx.graph_uri());
        assert_eq!(graph.statement_count(&data_graph), 12);
    }

    #[tokio::test]
    async fn flags_properties_the_ontology_does_not_model() {
        // Rows carry a "pressure" field the declared columns (and therefore
        // the inferred schema and ontology) know nothing about.
        let (ctx, _graph) = stage_context_with(
            vec!["id".into(), "temperature".into()],
            vec![
                serde_json::json!({"id": 1, "temperature": 20.5, "pressure": 1013.0}),
                serde_json::json!({"id": 2, "temperature": 21.5, "pressure": 1009.5}),
            ],
        )
        .await;
        run_prereqs(&ctx).await;

        let output = EntityExtractionHandler.execute(&ctx).await.unwrap();

        assert_eq!(output.payload["structural_changes"], true);
        assert_eq!(output.payload["new_properties"][0], "pressure");
    }

    #[tokio::test]
    async fn rerun_produces_no_duplicates() {
        let (ctx, graph) = stage_context().await;
        run_prereqs(&ctx).await;

        EntityExtractionHandler.execute(&ctx).await.unwrap();
        let second = EntityExtractionHandler.execute(&ctx).await.unwrap();

        let data_graph = format!("{}/data", ctx.graph_uri());
        assert_eq!(graph.document_count(&data_graph), 1);
        assert_eq!(second.payload["triples"], 12);
    }

    #[test]
    fn literals_are_escaped() {
        assert_eq!(turtle_literal(&serde_json::json!(true)), "true");
        assert_eq!(turtle_literal(&serde_json::json!(4.5)), "4.5");
        assert_eq!(
            turtle_literal(&serde_json::json!("say \"hi\"")),
            "\"say \\\"hi\\\"\""
        );
    }
}
