//! Ontology creation stage
//!
//! Renders a small Turtle document from the inferred schema (one class per
//! import, one datatype property per column) and loads it into the graph
//! store under the workflow's ontology graph.

use async_trait::async_trait;
use serde_json::json;

use mimir_contracts::{ArtifactKind, StageKind};

use crate::error::EngineError;
use crate::orchestrator::{StageArtifact, StageContext, StageHandler, StageOutput};

use super::{sanitize_identifier, ColumnSpec};

pub struct OntologyCreationHandler;

#[async_trait]
impl StageHandler for OntologyCreationHandler {
    fn stage(&self) -> StageKind {
        StageKind::OntologyCreation
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

        let schema = ctx
            .db
            .get_inferred_schema_for_workflow(ctx.workflow_id)
            .await?
            .ok_or_else(|| {
                EngineError::HandlerFailed("no inferred schema for workflow".to_string())
            })?;

        let columns: Vec<ColumnSpec> = serde_json::from_value(schema.columns)
            .map_err(|e| EngineError::HandlerFailed(format!("schema decode: {e}")))?;

        let graph_uri = format!("{}/ontology", ctx.graph_uri());
        let class_name = sanitize_identifier(&import.name);
        let turtle = render_turtle(&class_name, &columns);

        // Idempotency: replace both the row and the graph contents.
        ctx.db.delete_ontologies(ctx.workflow_id).await?;
        ctx.graph.clear_graph(&graph_uri).await?;

        ctx.check_cancelled()?;
        ctx.graph.load_graph(&graph_uri, &turtle).await?;

        let ontology = ctx
            .db
            .insert_ontology(
                ctx.workflow_id,
                &graph_uri,
                &turtle,
                1,
                columns.len() as i32,
            )
            .await?;

        Ok(StageOutput::new(json!({
            "classes": 1,
            "properties": columns.len(),
            "graph_uri": graph_uri,
        }))
        .with_artifact(StageArtifact::new(
            ArtifactKind::Ontology,
            ontology.id,
            format!("{} ontology", import.name),
        )))
    }
}

fn xsd_range(data_type: &str) -> &'static str {
    match data_type {
        "integer" => "xsd:integer",
        "float" => "xsd:decimal",
        "boolean" => "xsd:boolean",
        _ => "xsd:string",
    }
}

fn render_turtle(class_name: &str, columns: &[ColumnSpec]) -> String {
    let mut turtle = String::new();
    turtle.push_str("@prefix mimir: <http://mimir-aip.io/ontology/> .\n");
    turtle.push_str("@prefix owl: <http://www.w3.org/2002/07/owl#> .\n");
    turtle.push_str("@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .\n");
    turtle.push_str("@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .\n\n");

    turtle.push_str(&format!("mimir:{class_name} a owl:Class .\n"));

    for column in columns {
        let property = sanitize_identifier(&column.name);
        turtle.push_str(&format!(
            "mimir:{property} a owl:DatatypeProperty ;\n    rdfs:domain mimir:{class_name} ;\n    rdfs:range {} .\n",
            xsd_range(&column.data_type)
        ));
    }

    turtle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testutil::stage_context;
    use crate::stages::SchemaInferenceHandler;

    #[tokio::test]
    async fn renders_and_loads_ontology() {
        let (ctx, graph) = stage_context().await;
        SchemaInferenceHandler.execute(&ctx).await.unwrap();

        let output = OntologyCreationHandler.execute(&ctx).await.unwrap();

        assert_eq!(output.payload["classes"], 1);
        assert_eq!(output.payload["properties"], 3);
        assert_eq!(output.artifacts[0].kind, ArtifactKind::Ontology);

        let ontology = ctx
            .db
            .get_ontology_for_workflow(ctx.workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert!(ontology.turtle.contains("owl:Class"));
        assert!(ontology.turtle.contains("mimir:temperature"));
        assert_eq!(graph.document_count(&ontology.graph_uri), 1);
    }

    #[tokio::test]
    async fn fails_without_schema() {
        let (ctx, _graph) = stage_context().await;

        let err = OntologyCreationHandler.execute(&ctx).await.unwrap_err();
        assert_eq!(err.code(), "handler_failed");
    }

    #[tokio::test]
    async fn rerun_does_not_accumulate_graph_documents() {
        let (ctx, graph) = stage_context().await;
        SchemaInferenceHandler.execute(&ctx).await.unwrap();

        OntologyCreationHandler.execute(&ctx).await.unwrap();
        OntologyCreationHandler.execute(&ctx).await.unwrap();

        let ontology = ctx
            .db
            .get_ontology_for_workflow(ctx.workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(graph.document_count(&ontology.graph_uri), 1);
    }

    #[test]
    fn turtle_maps_types_to_xsd() {
        let columns = vec![
            ColumnSpec {
                name: "id".into(),
                data_type: "integer".into(),
                key_candidate: true,
                confidence: 1.0,
            },
            ColumnSpec {
                name: "ok".into(),
                data_type: "boolean".into(),
                key_candidate: false,
                confidence: 1.0,
            },
        ];
        let turtle = render_turtle("Sensors", &columns);
        assert!(turtle.contains("rdfs:range xsd:integer"));
        assert!(turtle.contains("rdfs:range xsd:boolean"));
    }
}
