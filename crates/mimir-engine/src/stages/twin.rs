//! Twin creation stage
//!
//! Materialises a digital twin holding the latest observed state (the last
//! sample row, keyed by column) and references to the models trained for
//! this workflow.

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use mimir_contracts::{ArtifactKind, StageKind};

use crate::error::EngineError;
use crate::orchestrator::{StageArtifact, StageContext, StageHandler, StageOutput};

pub struct TwinCreationHandler;

#[async_trait]
impl StageHandler for TwinCreationHandler {
    fn stage(&self) -> StageKind {
        StageKind::TwinCreation
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

        let models = ctx.db.list_models_for_workflow(ctx.workflow_id).await?;
        let model_ids: Vec<Uuid> = models.iter().map(|m| m.id).collect();

        // Idempotency: a re-run replaces the twin; rules attached to the old
        // twin go with it.
        if let Some(previous) = ctx.db.get_twin_for_workflow(ctx.workflow_id).await? {
            ctx.db.delete_rules_for_workflow_twin(previous.id).await?;
        }
        ctx.db.delete_twins(ctx.workflow_id).await?;

        let state = import
            .rows
            .last()
            .cloned()
            .unwrap_or_else(|| json!({}));

        let twin = ctx
            .db
            .insert_twin(
                ctx.workflow_id,
                &format!("{} twin", import.name),
                state,
                &model_ids,
            )
            .await?;

        Ok(StageOutput::new(json!({
            "twin_id": twin.id,
            "models": model_ids.len(),
        }))
        .with_artifact(StageArtifact::new(
            ArtifactKind::Twin,
            twin.id,
            twin.name.clone(),
        )))
    }
}
