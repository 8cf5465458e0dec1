//! ML training stage
//!
//! For each detected regression target (numeric column with inference
//! confidence at or above the threshold, key columns excluded) fits a
//! mean-predictor baseline over the sample values and records its metrics.
//! Zero detected targets is a valid outcome, not a failure.

use async_trait::async_trait;
use serde_json::json;

use mimir_contracts::{ArtifactKind, StageKind};

use crate::error::EngineError;
use crate::orchestrator::{StageArtifact, StageContext, StageHandler, StageOutput};

use super::{numeric_value, ColumnSpec};

pub struct MlTrainingHandler {
    /// Minimum inference confidence for a column to become a target.
    pub confidence_threshold: f64,
}

impl Default for MlTrainingHandler {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
        }
    }
}

#[async_trait]
impl StageHandler for MlTrainingHandler {
    fn stage(&self) -> StageKind {
        StageKind::MlTraining
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

        // Idempotency: retrain from scratch for this workflow.
        ctx.db.delete_models(ctx.workflow_id).await?;

        let targets: Vec<&ColumnSpec> = columns
            .iter()
            .filter(|c| {
                c.is_numeric() && !c.key_candidate && c.confidence >= self.confidence_threshold
            })
            .collect();

        let mut output = StageOutput::default();
        let mut trained = Vec::new();
        let mut best_accuracy = 0.0f64;

        for target in targets {
            ctx.check_cancelled()?;

            let samples: Vec<f64> = import
                .rows
                .iter()
                .filter_map(|row| row.get(&target.name))
                .filter_map(numeric_value)
                .collect();

            if samples.is_empty() {
                continue;
            }

            let metrics = fit_mean_predictor(&samples);
            let accuracy = metrics.accuracy;

            let model = ctx
                .db
                .insert_model(
                    ctx.workflow_id,
                    &target.name,
                    "mean_regressor",
                    json!({
                        "mean": metrics.mean,
                        "mse": metrics.mse,
                        "accuracy": metrics.accuracy,
                        "samples": samples.len(),
                    }),
                )
                .await?;

            output = output.with_artifact(StageArtifact::new(
                ArtifactKind::Model,
                model.id,
                format!("{} model", target.name),
            ));
            trained.push(target.name.clone());
            best_accuracy = best_accuracy.max(accuracy);
        }

        output.payload = json!({
            "models": trained.len(),
            "targets": trained,
            "accuracy": best_accuracy,
        });

        Ok(output)
    }
}

struct BaselineMetrics {
    mean: f64,
    mse: f64,
    /// Bounded (0, 1] proxy for model quality: 1 / (1 + mse).
    accuracy: f64,
}

fn fit_mean_predictor(samples: &[f64]) -> BaselineMetrics {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let mse = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    BaselineMetrics {
        mean,
        mse,
        accuracy: 1.0 / (1.0 + mse),
    }
}
