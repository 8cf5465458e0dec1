//! Schema inference stage
//!
//! Derives column types from the import's sample rows by literal inspection.
//! Deterministic for a fixed sample: same rows, same schema.

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::json;

use mimir_contracts::{ArtifactKind, StageKind};

use crate::error::EngineError;
use crate::orchestrator::{StageArtifact, StageContext, StageHandler, StageOutput};

use super::ColumnSpec;

pub struct SchemaInferenceHandler;

#[async_trait]
impl StageHandler for SchemaInferenceHandler {
    fn stage(&self) -> StageKind {
        StageKind::SchemaInference
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

        // Idempotency: drop output of any previous attempt for this workflow.
        ctx.db.delete_inferred_schemas(ctx.workflow_id).await?;

        let mut columns = Vec::with_capacity(import.columns.len());
        let mut key_found = false;

        for name in &import.columns {
            let mut spec = infer_column(name, &import.rows);
            if !key_found && spec.key_candidate {
                key_found = true;
            } else {
                spec.key_candidate = false;
            }
            columns.push(spec);
        }

        let columns_json = serde_json::to_value(&columns)
            .map_err(|e| EngineError::HandlerFailed(format!("schema serialization: {e}")))?;

        let schema = ctx
            .db
            .insert_inferred_schema(ctx.workflow_id, ctx.import_id, columns_json)
            .await?;

        let key_candidate = columns
            .iter()
            .find(|c| c.key_candidate)
            .map(|c| c.name.clone());

        Ok(StageOutput::new(json!({
            "columns": columns.len(),
            "key_candidate": key_candidate,
        }))
        .with_artifact(StageArtifact::new(
            ArtifactKind::Schema,
            schema.id,
            format!("{} schema", import.name),
        )))
    }
}

/// Type, key-candidacy, and confidence for one column over the sample rows.
fn infer_column(name: &str, rows: &[serde_json::Value]) -> ColumnSpec {
    let values: Vec<&serde_json::Value> = rows
        .iter()
        .filter_map(|row| row.get(name))
        .filter(|v| !v.is_null())
        .collect();

    if values.is_empty() {
        return ColumnSpec {
            name: name.to_string(),
            data_type: "text".to_string(),
            key_candidate: false,
            confidence: 0.0,
        };
    }

    let mut integers = 0usize;
    let mut floats = 0usize;
    let mut booleans = 0usize;
    let mut texts = 0usize;

    for value in &values {
        match value {
            serde_json::Value::Bool(_) => booleans += 1,
            serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => integers += 1,
            serde_json::Value::Number(_) => floats += 1,
            _ => texts += 1,
        }
    }

    // Integers mixed with floats degrade to float; anything mixed with text
    // degrades to text.
    let total = values.len();
    let (data_type, matching) = if texts > 0 {
        ("text", texts + integers + floats + booleans)
    } else if booleans == total {
        ("boolean", booleans)
    } else if integers == total {
        ("integer", integers)
    } else if integers + floats == total {
        ("float", integers + floats)
    } else {
        ("text", total)
    };

    let distinct: HashSet<String> = values.iter().map(|v| v.to_string()).collect();
    let key_candidate = distinct.len() == rows.len() && total == rows.len();

    ColumnSpec {
        name: name.to_string(),
        data_type: data_type.to_string(),
        key_candidate,
        confidence: matching as f64 / total as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testutil::stage_context;

    #[tokio::test]
    async fn infers_types_and_key() {
        let (ctx, _graph) = stage_context().await;

        let output = SchemaInferenceHandler.execute(&ctx).await.unwrap();

        assert_eq!(output.payload["columns"], 3);
        assert_eq!(output.payload["key_candidate"], "id");
        assert_eq!(output.artifacts.len(), 1);
        assert_eq!(output.artifacts[0].kind, ArtifactKind::Schema);

        let schema = ctx
            .db
            .get_inferred_schema_for_workflow(ctx.workflow_id)
            .await
            .unwrap()
            .unwrap();
        let columns: Vec<ColumnSpec> = serde_json::from_value(schema.columns).unwrap();
        assert_eq!(columns[0].data_type, "integer");
        assert!(columns[0].key_candidate);
        assert_eq!(columns[1].data_type, "float");
        assert_eq!(columns[2].data_type, "text");
    }

    #[tokio::test]
    async fn rerun_replaces_previous_schema() {
        let (ctx, _graph) = stage_context().await;

        let first = SchemaInferenceHandler.execute(&ctx).await.unwrap();
        let second = SchemaInferenceHandler.execute(&ctx).await.unwrap();

        // Re-invocation on the same workflow leaves exactly one schema row.
        let schema = ctx
            .db
            .get_inferred_schema_for_workflow(ctx.workflow_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(schema.id, second.artifacts[0].artifact_id);
        assert_ne!(first.artifacts[0].artifact_id, second.artifacts[0].artifact_id);
        // Structural content is identical across runs.
        assert_eq!(first.payload, second.payload);
    }

    #[test]
    fn mixed_numbers_degrade_to_float() {
        let rows = vec![
            serde_json::json!({"v": 1}),
            serde_json::json!({"v": 1.5}),
        ];
        let spec = infer_column("v", &rows);
        assert_eq!(spec.data_type, "float");
        assert_eq!(spec.confidence, 1.0);
    }

    #[test]
    fn all_null_column_is_text_with_zero_confidence() {
        let rows = vec![serde_json::json!({"v": null}), serde_json::json!({})];
        let spec = infer_column("v", &rows);
        assert_eq!(spec.data_type, "text");
        assert_eq!(spec.confidence, 0.0);
        assert!(!spec.key_candidate);
    }
}
