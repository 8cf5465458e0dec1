//! Monitoring setup stage
//!
//! Attaches one default range rule per numeric column to the workflow's twin
//! (bounds = observed min/max widened by 20%) and registers the recurring
//! monitoring job with the scheduler. The job row is inserted with a null
//! next_run_at; the running scheduler picks it up on its next tick.

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use mimir_contracts::{ArtifactKind, StageKind};
use mimir_storage::{CreateMonitoringRule, CreateSchedulerJob};

use crate::error::EngineError;
use crate::orchestrator::{StageArtifact, StageContext, StageHandler, StageOutput};

use super::{numeric_value, ColumnSpec};

/// Cron line for the per-twin monitoring job.
const MONITORING_CRON: &str = "*/1 * * * *";

pub struct MonitoringSetupHandler;

#[async_trait]
impl StageHandler for MonitoringSetupHandler {
    fn stage(&self) -> StageKind {
        StageKind::MonitoringSetup
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

        let twin = ctx
            .db
            .get_twin_for_workflow(ctx.workflow_id)
            .await?
            .ok_or_else(|| EngineError::HandlerFailed("no twin for workflow".to_string()))?;

        let schema = ctx
            .db
            .get_inferred_schema_for_workflow(ctx.workflow_id)
            .await?
            .ok_or_else(|| {
                EngineError::HandlerFailed("no inferred schema for workflow".to_string())
            })?;

        let columns: Vec<ColumnSpec> = serde_json::from_value(schema.columns)
            .map_err(|e| EngineError::HandlerFailed(format!("schema decode: {e}")))?;

        // Idempotency: rules and the job are recreated from scratch.
        ctx.db.delete_rules_for_workflow_twin(twin.id).await?;
        let job_id = format!("monitoring-{}", ctx.workflow_id);
        ctx.db.delete_job(&job_id).await?;

        let mut output = StageOutput::default();
        let mut rules = 0usize;

        for column in columns.iter().filter(|c| c.is_numeric() && !c.key_candidate) {
            ctx.check_cancelled()?;

            let Some((low, high)) = observed_bounds(&import.rows, &column.name) else {
                continue;
            };

            let rule = ctx
                .db
                .insert_rule(CreateMonitoringRule {
                    name: format!("{} range", column.name),
                    twin_id: twin.id,
                    property: column.name.clone(),
                    kind: "range".to_string(),
                    low: Some(low),
                    high: Some(high),
                    window: None,
                    z_threshold: None,
                    severity: "medium".to_string(),
                    enabled: true,
                })
                .await?;

            output = output.with_artifact(StageArtifact::new(
                ArtifactKind::AlertRule,
                rule.id,
                rule.name.clone(),
            ));
            rules += 1;
        }

        let inserted = ctx
            .db
            .insert_job(CreateSchedulerJob {
                id: job_id.clone(),
                name: format!("monitor {}", twin.name),
                job_type: "monitoring".to_string(),
                target: twin.id.to_string(),
                cron_expr: MONITORING_CRON.to_string(),
                enabled: true,
                next_run_at: None,
            })
            .await?;
        if !inserted {
            return Err(EngineError::HandlerFailed(format!(
                "monitoring job {job_id} already exists"
            )));
        }

        output = output.with_artifact(StageArtifact::new(
            ArtifactKind::MonitoringJob,
            Uuid::now_v7(),
            job_id.clone(),
        ));
        output.payload = json!({
            "rules": rules,
            "job_id": job_id,
            "twin_id": twin.id,
        });

        Ok(output)
    }
}

/// Observed [min, max] widened by 20% of the span (or of the magnitude when
/// the column is constant).
fn observed_bounds(rows: &[serde_json::Value], column: &str) -> Option<(f64, f64)> {
    let samples: Vec<f64> = rows
        .iter()
        .filter_map(|row| row.get(column))
        .filter_map(numeric_value)
        .collect();

    if samples.is_empty() {
        return None;
    }

    let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    let margin = if span > 0.0 {
        span * 0.2
    } else {
        (max.abs() * 0.2).max(1.0)
    };

    Some((min - margin, max + margin))
}
