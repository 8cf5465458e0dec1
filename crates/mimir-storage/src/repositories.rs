// Repository layer for database operations
//
// Status transitions use compare-and-set updates (UPDATE ... WHERE status IN ...)
// so concurrent writers can never skip a state machine edge. Multi-row
// transitions (step + owning workflow) run inside a transaction.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::*;
use crate::schema;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database file and apply the schema.
    pub async fn from_path(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        schema::ensure_schema(&pool).await?;
        tracing::info!(path, "database opened");
        Ok(Self { pool })
    }

    /// Private in-memory database, used by tests.
    ///
    /// Pinned to a single connection: each sqlite :memory: connection is
    /// its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        schema::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============================================
    // Imports
    // ============================================

    pub async fn create_import(&self, input: CreateImport) -> Result<ImportRow> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let columns_json = serde_json::to_string(&input.columns)?;
        let rows_json = serde_json::to_string(&input.rows)?;

        sqlx::query(
            r#"
            INSERT INTO imports (id, name, row_count, columns, rows, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(input.rows.len() as i64)
        .bind(&columns_json)
        .bind(&rows_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_import(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("import {id} vanished after insert"))
    }

    pub async fn get_import(&self, id: Uuid) -> Result<Option<ImportRow>> {
        let row = sqlx::query_as::<_, ImportRow>(
            r#"
            SELECT id, name, row_count, columns, rows, created_at
            FROM imports
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // Workflows
    // ============================================

    /// Create a workflow with one pending step per stage, transactionally.
    pub async fn create_workflow(&self, input: CreateWorkflow) -> Result<WorkflowRow> {
        anyhow::ensure!(
            !input.stages.is_empty(),
            "workflow must have at least one stage"
        );

        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO autonomous_workflows
                (id, name, import_id, status, current_stage, total_steps, completed_steps,
                 created_at, updated_at)
            VALUES (?, ?, ?, 'pending', ?, ?, 0, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(input.import_id)
        .bind(&input.stages[0])
        .bind(input.stages.len() as i32)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for (idx, stage) in input.stages.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO workflow_steps (workflow_id, stage, step_order, status)
                VALUES (?, ?, ?, 'pending')
                "#,
            )
            .bind(id)
            .bind(stage)
            .bind(idx as i32 + 1)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_workflow(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("workflow {id} vanished after insert"))
    }

    pub async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowRow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            SELECT id, name, import_id, status, current_stage, total_steps, completed_steps,
                   error_message, created_at, updated_at, completed_at
            FROM autonomous_workflows
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_workflows(&self, status: Option<&str>) -> Result<Vec<WorkflowRow>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, WorkflowRow>(
                    r#"
                    SELECT id, name, import_id, status, current_stage, total_steps,
                           completed_steps, error_message, created_at, updated_at, completed_at
                    FROM autonomous_workflows
                    WHERE status = ?
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(status)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, WorkflowRow>(
                    r#"
                    SELECT id, name, import_id, status, current_stage, total_steps,
                           completed_steps, error_message, created_at, updated_at, completed_at
                    FROM autonomous_workflows
                    ORDER BY created_at DESC
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    /// Latest non-terminal workflow for an import, if any.
    pub async fn find_active_workflow_for_import(
        &self,
        import_id: Uuid,
    ) -> Result<Option<WorkflowRow>> {
        let row = sqlx::query_as::<_, WorkflowRow>(
            r#"
            SELECT id, name, import_id, status, current_stage, total_steps, completed_steps,
                   error_message, created_at, updated_at, completed_at
            FROM autonomous_workflows
            WHERE import_id = ? AND status IN ('pending', 'running')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(import_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Compare-and-set workflow status. Returns false when the workflow was
    /// not in any of the expected states (or does not exist).
    pub async fn transition_workflow(
        &self,
        id: Uuid,
        from: &[&str],
        to: &str,
    ) -> Result<bool> {
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            r#"
            UPDATE autonomous_workflows
            SET status = ?, updated_at = ?
            WHERE id = ? AND status IN ({placeholders})
            "#
        );

        let mut query = sqlx::query(&sql).bind(to).bind(Utc::now()).bind(id);
        for status in from {
            query = query.bind(*status);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear a failed workflow's error and rewind its failed/skipped steps to
    /// pending so a re-execute resumes at the first non-completed step.
    pub async fn rewind_workflow(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE workflow_steps
            SET status = 'pending', started_at = NULL, completed_at = NULL,
                error_message = NULL, output = NULL
            WHERE workflow_id = ? AND status IN ('failed', 'skipped', 'running')
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE autonomous_workflows
            SET error_message = NULL, completed_at = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    // ============================================
    // Workflow steps
    // ============================================

    pub async fn list_steps(&self, workflow_id: Uuid) -> Result<Vec<WorkflowStepRow>> {
        let rows = sqlx::query_as::<_, WorkflowStepRow>(
            r#"
            SELECT id, workflow_id, stage, step_order, status, started_at, completed_at,
                   error_message, output
            FROM workflow_steps
            WHERE workflow_id = ?
            ORDER BY step_order
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Mark a pending step running (compare-and-set) and point the workflow's
    /// current_stage at it.
    pub async fn start_step(&self, step_id: i64, workflow_id: Uuid, stage: &str) -> Result<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE workflow_steps
            SET status = 'running', started_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(step_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE autonomous_workflows
            SET current_stage = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(stage)
        .bind(now)
        .bind(workflow_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Complete a running step, bump the workflow's progress, and either
    /// advance to the next stage or finish the workflow, in one transaction.
    pub async fn complete_step(
        &self,
        step_id: i64,
        workflow_id: Uuid,
        output: serde_json::Value,
        next_stage: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE workflow_steps
            SET status = 'completed', completed_at = ?, output = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(now)
        .bind(&output)
        .bind(step_id)
        .execute(&mut *tx)
        .await?;

        match next_stage {
            Some(stage) => {
                sqlx::query(
                    r#"
                    UPDATE autonomous_workflows
                    SET completed_steps = completed_steps + 1, current_stage = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(stage)
                .bind(now)
                .bind(workflow_id)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE autonomous_workflows
                    SET completed_steps = completed_steps + 1, current_stage = NULL,
                        status = 'completed', completed_at = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(now)
                .bind(now)
                .bind(workflow_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Fail a running step and its workflow together.
    pub async fn fail_step(
        &self,
        step_id: i64,
        workflow_id: Uuid,
        error_message: &str,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE workflow_steps
            SET status = 'failed', completed_at = ?, error_message = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(now)
        .bind(error_message)
        .bind(step_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE autonomous_workflows
            SET status = 'failed', error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(error_message)
        .bind(now)
        .bind(workflow_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Skip a running step (cancellation observed) and cancel its workflow.
    pub async fn skip_step_and_cancel(&self, step_id: i64, workflow_id: Uuid) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE workflow_steps
            SET status = 'skipped', completed_at = ?
            WHERE id = ? AND status IN ('running', 'pending')
            "#,
        )
        .bind(now)
        .bind(step_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE autonomous_workflows
            SET status = 'cancelled', updated_at = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(now)
        .bind(workflow_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Reset the running step of every running workflow back to pending and
    /// return the affected workflow IDs. Called once at startup; re-execution
    /// relies on stage-handler idempotency.
    pub async fn reset_running_steps(&self) -> Result<Vec<Uuid>> {
        let workflows = self.list_workflows(Some("running")).await?;
        let mut recovered = Vec::with_capacity(workflows.len());

        for workflow in workflows {
            sqlx::query(
                r#"
                UPDATE workflow_steps
                SET status = 'pending', started_at = NULL
                WHERE workflow_id = ? AND status = 'running'
                "#,
            )
            .bind(workflow.id)
            .execute(&self.pool)
            .await?;
            recovered.push(workflow.id);
        }

        Ok(recovered)
    }

    // ============================================
    // Workflow artifacts
    // ============================================

    pub async fn insert_artifact(&self, input: CreateArtifact) -> Result<WorkflowArtifactRow> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO workflow_artifacts (id, workflow_id, stage, kind, artifact_id, name, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(input.workflow_id)
        .bind(&input.stage)
        .bind(&input.kind)
        .bind(input.artifact_id)
        .bind(&input.name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(WorkflowArtifactRow {
            id,
            workflow_id: input.workflow_id,
            stage: input.stage,
            kind: input.kind,
            artifact_id: input.artifact_id,
            name: input.name,
            created_at: now,
        })
    }

    pub async fn list_artifacts(&self, workflow_id: Uuid) -> Result<Vec<WorkflowArtifactRow>> {
        let rows = sqlx::query_as::<_, WorkflowArtifactRow>(
            r#"
            SELECT id, workflow_id, stage, kind, artifact_id, name, created_at
            FROM workflow_artifacts
            WHERE workflow_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Drop artifact records for one (workflow, stage) before a re-run.
    pub async fn clear_stage_artifacts(&self, workflow_id: Uuid, stage: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM workflow_artifacts
            WHERE workflow_id = ? AND stage = ?
            "#,
        )
        .bind(workflow_id)
        .bind(stage)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    // ============================================
    // Scheduler jobs
    // ============================================

    /// Insert a job. Returns false on a duplicate id.
    pub async fn insert_job(&self, input: CreateSchedulerJob) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO scheduler_jobs
                (id, name, job_type, target, cron_expr, enabled, next_run_at,
                 consecutive_failures, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&input.id)
        .bind(&input.name)
        .bind(&input.job_type)
        .bind(&input.target)
        .bind(&input.cron_expr)
        .bind(input.enabled)
        .bind(input.next_run_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<SchedulerJobRow>> {
        let row = sqlx::query_as::<_, SchedulerJobRow>(
            r#"
            SELECT id, name, job_type, target, cron_expr, enabled, last_run_at, next_run_at,
                   consecutive_failures, last_error, created_at, updated_at
            FROM scheduler_jobs
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_jobs(&self) -> Result<Vec<SchedulerJobRow>> {
        let rows = sqlx::query_as::<_, SchedulerJobRow>(
            r#"
            SELECT id, name, job_type, target, cron_expr, enabled, last_run_at, next_run_at,
                   consecutive_failures, last_error, created_at, updated_at
            FROM scheduler_jobs
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn list_enabled_jobs(&self) -> Result<Vec<SchedulerJobRow>> {
        let rows = sqlx::query_as::<_, SchedulerJobRow>(
            r#"
            SELECT id, name, job_type, target, cron_expr, enabled, last_run_at, next_run_at,
                   consecutive_failures, last_error, created_at, updated_at
            FROM scheduler_jobs
            WHERE enabled = 1
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn update_job(
        &self,
        id: &str,
        input: UpdateSchedulerJob,
    ) -> Result<Option<SchedulerJobRow>> {
        sqlx::query(
            r#"
            UPDATE scheduler_jobs
            SET
                name = COALESCE(?, name),
                cron_expr = COALESCE(?, cron_expr),
                enabled = COALESCE(?, enabled),
                next_run_at = COALESCE(?, next_run_at),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&input.name)
        .bind(&input.cron_expr)
        .bind(input.enabled)
        .bind(input.next_run_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_job(id).await
    }

    pub async fn delete_job(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduler_jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_job_enabled(&self, id: &str, enabled: bool) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduler_jobs
            SET enabled = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(enabled)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a successful run: failure counter resets.
    pub async fn record_job_success(
        &self,
        id: &str,
        ran_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduler_jobs
            SET last_run_at = ?, next_run_at = ?, consecutive_failures = 0,
                last_error = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(ran_at)
        .bind(next_run_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a failed run and return the new consecutive-failure count.
    pub async fn record_job_failure(
        &self,
        id: &str,
        ran_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
        error: &str,
    ) -> Result<i32> {
        sqlx::query(
            r#"
            UPDATE scheduler_jobs
            SET last_run_at = ?, next_run_at = ?,
                consecutive_failures = consecutive_failures + 1,
                last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(ran_at)
        .bind(next_run_at)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        let count: i32 =
            sqlx::query_scalar("SELECT consecutive_failures FROM scheduler_jobs WHERE id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    pub async fn set_job_next_run(
        &self,
        id: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduler_jobs
            SET next_run_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(next_run_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ============================================
    // Monitoring rules
    // ============================================

    pub async fn insert_rule(&self, input: CreateMonitoringRule) -> Result<MonitoringRuleRow> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO monitoring_rules
                (id, name, twin_id, property, kind, low, high, window, z_threshold,
                 severity, enabled, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(input.twin_id)
        .bind(&input.property)
        .bind(&input.kind)
        .bind(input.low)
        .bind(input.high)
        .bind(input.window)
        .bind(input.z_threshold)
        .bind(&input.severity)
        .bind(input.enabled)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(MonitoringRuleRow {
            id,
            name: input.name,
            twin_id: input.twin_id,
            property: input.property,
            kind: input.kind,
            low: input.low,
            high: input.high,
            window: input.window,
            z_threshold: input.z_threshold,
            severity: input.severity,
            enabled: input.enabled,
            created_at: now,
        })
    }

    pub async fn get_rule(&self, id: Uuid) -> Result<Option<MonitoringRuleRow>> {
        let row = sqlx::query_as::<_, MonitoringRuleRow>(
            r#"
            SELECT id, name, twin_id, property, kind, low, high, window, z_threshold,
                   severity, enabled, created_at
            FROM monitoring_rules
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_enabled_rules_for_twin(
        &self,
        twin_id: Uuid,
    ) -> Result<Vec<MonitoringRuleRow>> {
        let rows = sqlx::query_as::<_, MonitoringRuleRow>(
            r#"
            SELECT id, name, twin_id, property, kind, low, high, window, z_threshold,
                   severity, enabled, created_at
            FROM monitoring_rules
            WHERE twin_id = ? AND enabled = 1
            ORDER BY created_at
            "#,
        )
        .bind(twin_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn delete_rules_for_workflow_twin(&self, twin_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM monitoring_rules WHERE twin_id = ?")
            .bind(twin_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // ============================================
    // Alerts
    // ============================================

    pub async fn insert_alert(&self, input: CreateAlert) -> Result<AlertRow> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO alerts
                (id, rule_id, severity, title, description, status, occurrence_count,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 'active', 1, ?, ?)
            "#,
        )
        .bind(id)
        .bind(input.rule_id)
        .bind(&input.severity)
        .bind(&input.title)
        .bind(&input.description)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_alert(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("alert {id} vanished after insert"))
    }

    pub async fn get_alert(&self, id: Uuid) -> Result<Option<AlertRow>> {
        let row = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, rule_id, severity, title, description, status, occurrence_count,
                   created_at, updated_at, acknowledged_by, acknowledged_at, resolved_at
            FROM alerts
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn find_active_alert_for_rule(&self, rule_id: Uuid) -> Result<Option<AlertRow>> {
        let row = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, rule_id, severity, title, description, status, occurrence_count,
                   created_at, updated_at, acknowledged_by, acknowledged_at, resolved_at
            FROM alerts
            WHERE rule_id = ? AND status = 'active'
            LIMIT 1
            "#,
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Fold a repeated firing into the existing active alert.
    pub async fn touch_alert_occurrence(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE alerts
            SET occurrence_count = occurrence_count + 1, updated_at = ?
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_alerts(
        &self,
        status: Option<&str>,
        severity: Option<&str>,
    ) -> Result<Vec<AlertRow>> {
        let rows = sqlx::query_as::<_, AlertRow>(
            r#"
            SELECT id, rule_id, severity, title, description, status, occurrence_count,
                   created_at, updated_at, acknowledged_by, acknowledged_at, resolved_at
            FROM alerts
            WHERE (? IS NULL OR status = ?)
              AND (? IS NULL OR severity = ?)
            ORDER BY created_at DESC
            "#,
        )
        .bind(status)
        .bind(status)
        .bind(severity)
        .bind(severity)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// active -> acknowledged. Returns false when the alert is in another state.
    pub async fn acknowledge_alert(&self, id: Uuid, acknowledged_by: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET status = 'acknowledged', acknowledged_by = ?, acknowledged_at = ?, updated_at = ?
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(acknowledged_by)
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// {active, acknowledged} -> resolved.
    pub async fn resolve_alert(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET status = 'resolved', resolved_at = ?, updated_at = ?
            WHERE id = ? AND status IN ('active', 'acknowledged')
            "#,
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Alert routes and deliveries
    // ============================================

    pub async fn insert_alert_route(&self, input: CreateAlertRoute) -> Result<AlertRouteRow> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let channels_json = serde_json::to_string(&input.channels)?;

        sqlx::query(
            r#"
            INSERT INTO alert_routes (id, position, min_severity, max_severity, twin_id, channels, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(input.position)
        .bind(&input.min_severity)
        .bind(&input.max_severity)
        .bind(input.twin_id)
        .bind(&channels_json)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(AlertRouteRow {
            id,
            position: input.position,
            min_severity: input.min_severity,
            max_severity: input.max_severity,
            twin_id: input.twin_id,
            channels: input.channels,
            created_at: now,
        })
    }

    pub async fn list_alert_routes(&self) -> Result<Vec<AlertRouteRow>> {
        let rows = sqlx::query_as::<_, AlertRouteRow>(
            r#"
            SELECT id, position, min_severity, max_severity, twin_id, channels, created_at
            FROM alert_routes
            ORDER BY position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn upsert_delivery(
        &self,
        alert_id: Uuid,
        channel: &str,
        status: &str,
        attempts: i32,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_deliveries (alert_id, channel, status, attempts, last_error, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (alert_id, channel) DO UPDATE SET
                status = excluded.status,
                attempts = excluded.attempts,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(alert_id)
        .bind(channel)
        .bind(status)
        .bind(attempts)
        .bind(last_error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_deliveries(&self, alert_id: Uuid) -> Result<Vec<AlertDeliveryRow>> {
        let rows = sqlx::query_as::<_, AlertDeliveryRow>(
            r#"
            SELECT alert_id, channel, status, attempts, last_error, updated_at
            FROM alert_deliveries
            WHERE alert_id = ?
            ORDER BY channel
            "#,
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ============================================
    // Inferred schemas
    // ============================================

    pub async fn insert_inferred_schema(
        &self,
        workflow_id: Uuid,
        import_id: Uuid,
        columns: serde_json::Value,
    ) -> Result<InferredSchemaRow> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO inferred_schemas (id, workflow_id, import_id, columns, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(workflow_id)
        .bind(import_id)
        .bind(&columns)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(InferredSchemaRow {
            id,
            workflow_id,
            import_id,
            columns,
            created_at: now,
        })
    }

    pub async fn get_inferred_schema_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<InferredSchemaRow>> {
        let row = sqlx::query_as::<_, InferredSchemaRow>(
            r#"
            SELECT id, workflow_id, import_id, columns, created_at
            FROM inferred_schemas
            WHERE workflow_id = ?
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn delete_inferred_schemas(&self, workflow_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM inferred_schemas WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // ============================================
    // Ontologies
    // ============================================

    pub async fn insert_ontology(
        &self,
        workflow_id: Uuid,
        graph_uri: &str,
        turtle: &str,
        class_count: i32,
        property_count: i32,
    ) -> Result<OntologyRow> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO ontologies (id, workflow_id, graph_uri, turtle, class_count, property_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(workflow_id)
        .bind(graph_uri)
        .bind(turtle)
        .bind(class_count)
        .bind(property_count)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(OntologyRow {
            id,
            workflow_id,
            graph_uri: graph_uri.to_string(),
            turtle: turtle.to_string(),
            class_count,
            property_count,
            created_at: now,
        })
    }

    pub async fn get_ontology_for_workflow(&self, workflow_id: Uuid) -> Result<Option<OntologyRow>> {
        let row = sqlx::query_as::<_, OntologyRow>(
            r#"
            SELECT id, workflow_id, graph_uri, turtle, class_count, property_count, created_at
            FROM ontologies
            WHERE workflow_id = ?
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn delete_ontologies(&self, workflow_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ontologies WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // ============================================
    // Models
    // ============================================

    pub async fn insert_model(
        &self,
        workflow_id: Uuid,
        target_column: &str,
        model_kind: &str,
        metrics: serde_json::Value,
    ) -> Result<ModelRow> {
        let id = Uuid::now_v7();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO models (id, workflow_id, target_column, model_kind, metrics, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(workflow_id)
        .bind(target_column)
        .bind(model_kind)
        .bind(&metrics)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(ModelRow {
            id,
            workflow_id,
            target_column: target_column.to_string(),
            model_kind: model_kind.to_string(),
            metrics,
            created_at: now,
        })
    }

    pub async fn list_models_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<ModelRow>> {
        let rows = sqlx::query_as::<_, ModelRow>(
            r#"
            SELECT id, workflow_id, target_column, model_kind, metrics, created_at
            FROM models
            WHERE workflow_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn delete_models(&self, workflow_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM models WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // ============================================
    // Digital twins and observations
    // ============================================

    pub async fn insert_twin(
        &self,
        workflow_id: Uuid,
        name: &str,
        state: serde_json::Value,
        model_ids: &[Uuid],
    ) -> Result<DigitalTwinRow> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let model_ids_json = serde_json::to_string(model_ids)?;

        sqlx::query(
            r#"
            INSERT INTO digital_twins (id, workflow_id, name, state, model_ids, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(workflow_id)
        .bind(name)
        .bind(&state)
        .bind(&model_ids_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(DigitalTwinRow {
            id,
            workflow_id,
            name: name.to_string(),
            state,
            model_ids: model_ids.to_vec(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_twin(&self, id: Uuid) -> Result<Option<DigitalTwinRow>> {
        let row = sqlx::query_as::<_, DigitalTwinRow>(
            r#"
            SELECT id, workflow_id, name, state, model_ids, created_at, updated_at
            FROM digital_twins
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_twin_for_workflow(&self, workflow_id: Uuid) -> Result<Option<DigitalTwinRow>> {
        let row = sqlx::query_as::<_, DigitalTwinRow>(
            r#"
            SELECT id, workflow_id, name, state, model_ids, created_at, updated_at
            FROM digital_twins
            WHERE workflow_id = ?
            "#,
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    /// Merge new property values into the twin's state and bump updated_at.
    pub async fn update_twin_state(
        &self,
        twin_id: Uuid,
        state: serde_json::Value,
        model_ids: Option<&[Uuid]>,
    ) -> Result<bool> {
        let model_ids_json = model_ids.map(serde_json::to_string).transpose()?;
        let result = sqlx::query(
            r#"
            UPDATE digital_twins
            SET state = ?, model_ids = COALESCE(?, model_ids), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&state)
        .bind(&model_ids_json)
        .bind(Utc::now())
        .bind(twin_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_twins(&self, workflow_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM digital_twins WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn insert_observation(
        &self,
        twin_id: Uuid,
        property: &str,
        value: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO twin_observations (twin_id, property, value, observed_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(twin_id)
        .bind(property)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Last `limit` samples for a property, newest first.
    pub async fn recent_observations(
        &self,
        twin_id: Uuid,
        property: &str,
        limit: i64,
    ) -> Result<Vec<TwinObservationRow>> {
        let rows = sqlx::query_as::<_, TwinObservationRow>(
            r#"
            SELECT id, twin_id, property, value, observed_at
            FROM twin_observations
            WHERE twin_id = ? AND property = ?
            ORDER BY observed_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(twin_id)
        .bind(property)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_db() -> Database {
        Database::in_memory().await.expect("in-memory db")
    }

    fn sample_import() -> CreateImport {
        CreateImport {
            name: "sensors".into(),
            columns: vec!["id".into(), "temperature".into()],
            rows: vec![
                json!({"id": 1, "temperature": 20.5}),
                json!({"id": 2, "temperature": 21.0}),
            ],
        }
    }

    #[tokio::test]
    async fn import_round_trip() {
        let db = test_db().await;
        let import = db.create_import(sample_import()).await.unwrap();

        assert_eq!(import.row_count, 2);
        assert_eq!(import.columns, vec!["id", "temperature"]);

        let fetched = db.get_import(import.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, import.id);
        assert_eq!(fetched.rows.len(), 2);
    }

    #[tokio::test]
    async fn workflow_creation_inserts_pending_steps() {
        let db = test_db().await;
        let import = db.create_import(sample_import()).await.unwrap();

        let workflow = db
            .create_workflow(CreateWorkflow {
                name: "run".into(),
                import_id: import.id,
                stages: vec!["schema_inference".into(), "ontology_creation".into()],
            })
            .await
            .unwrap();

        assert_eq!(workflow.status, "pending");
        assert_eq!(workflow.total_steps, 2);
        assert_eq!(workflow.completed_steps, 0);
        assert_eq!(workflow.current_stage.as_deref(), Some("schema_inference"));

        let steps = db.list_steps(workflow.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.status == "pending"));
        assert_eq!(steps[0].step_order, 1);
        assert_eq!(steps[1].step_order, 2);
    }

    #[tokio::test]
    async fn zero_stage_workflow_is_rejected() {
        let db = test_db().await;
        let import = db.create_import(sample_import()).await.unwrap();

        let result = db
            .create_workflow(CreateWorkflow {
                name: "empty".into(),
                import_id: import.id,
                stages: vec![],
            })
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn workflow_transition_is_compare_and_set() {
        let db = test_db().await;
        let import = db.create_import(sample_import()).await.unwrap();
        let workflow = db
            .create_workflow(CreateWorkflow {
                name: "run".into(),
                import_id: import.id,
                stages: vec!["schema_inference".into()],
            })
            .await
            .unwrap();

        assert!(db
            .transition_workflow(workflow.id, &["pending", "failed"], "running")
            .await
            .unwrap());
        // Second identical CAS fails: workflow is no longer pending.
        assert!(!db
            .transition_workflow(workflow.id, &["pending"], "running")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn completing_last_step_completes_workflow() {
        let db = test_db().await;
        let import = db.create_import(sample_import()).await.unwrap();
        let workflow = db
            .create_workflow(CreateWorkflow {
                name: "run".into(),
                import_id: import.id,
                stages: vec!["schema_inference".into()],
            })
            .await
            .unwrap();

        db.transition_workflow(workflow.id, &["pending"], "running")
            .await
            .unwrap();

        let steps = db.list_steps(workflow.id).await.unwrap();
        assert!(db
            .start_step(steps[0].id, workflow.id, "schema_inference")
            .await
            .unwrap());
        db.complete_step(steps[0].id, workflow.id, json!({"ok": true}), None)
            .await
            .unwrap();

        let workflow = db.get_workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(workflow.status, "completed");
        assert_eq!(workflow.completed_steps, 1);
        assert!(workflow.completed_at.is_some());
        assert!(workflow.current_stage.is_none());
    }

    #[tokio::test]
    async fn failing_step_fails_workflow() {
        let db = test_db().await;
        let import = db.create_import(sample_import()).await.unwrap();
        let workflow = db
            .create_workflow(CreateWorkflow {
                name: "run".into(),
                import_id: import.id,
                stages: vec!["schema_inference".into(), "ontology_creation".into()],
            })
            .await
            .unwrap();

        db.transition_workflow(workflow.id, &["pending"], "running")
            .await
            .unwrap();
        let steps = db.list_steps(workflow.id).await.unwrap();
        db.start_step(steps[0].id, workflow.id, "schema_inference")
            .await
            .unwrap();
        db.fail_step(steps[0].id, workflow.id, "boom").await.unwrap();

        let workflow = db.get_workflow(workflow.id).await.unwrap().unwrap();
        assert_eq!(workflow.status, "failed");
        assert_eq!(workflow.error_message.as_deref(), Some("boom"));

        let steps = db.list_steps(workflow.id).await.unwrap();
        assert_eq!(steps[0].status, "failed");
        assert_eq!(steps[1].status, "pending");
    }

    #[tokio::test]
    async fn reset_running_steps_rewinds_for_recovery() {
        let db = test_db().await;
        let import = db.create_import(sample_import()).await.unwrap();
        let workflow = db
            .create_workflow(CreateWorkflow {
                name: "run".into(),
                import_id: import.id,
                stages: vec!["schema_inference".into()],
            })
            .await
            .unwrap();

        db.transition_workflow(workflow.id, &["pending"], "running")
            .await
            .unwrap();
        let steps = db.list_steps(workflow.id).await.unwrap();
        db.start_step(steps[0].id, workflow.id, "schema_inference")
            .await
            .unwrap();

        let recovered = db.reset_running_steps().await.unwrap();
        assert_eq!(recovered, vec![workflow.id]);

        let steps = db.list_steps(workflow.id).await.unwrap();
        assert_eq!(steps[0].status, "pending");
        assert!(steps[0].started_at.is_none());
    }

    #[tokio::test]
    async fn duplicate_job_id_is_rejected() {
        let db = test_db().await;
        let job = CreateSchedulerJob {
            id: "job-1".into(),
            name: "tick".into(),
            job_type: "monitoring".into(),
            target: Uuid::now_v7().to_string(),
            cron_expr: "*/1 * * * *".into(),
            enabled: true,
            next_run_at: None,
        };

        assert!(db.insert_job(job.clone()).await.unwrap());
        assert!(!db.insert_job(job).await.unwrap());
    }

    #[tokio::test]
    async fn job_failure_counter_increments_and_resets() {
        let db = test_db().await;
        db.insert_job(CreateSchedulerJob {
            id: "job-1".into(),
            name: "tick".into(),
            job_type: "monitoring".into(),
            target: "t".into(),
            cron_expr: "*/1 * * * *".into(),
            enabled: true,
            next_run_at: None,
        })
        .await
        .unwrap();

        let now = Utc::now();
        assert_eq!(
            db.record_job_failure("job-1", now, None, "nope").await.unwrap(),
            1
        );
        assert_eq!(
            db.record_job_failure("job-1", now, None, "nope").await.unwrap(),
            2
        );

        db.record_job_success("job-1", now, None).await.unwrap();
        let job = db.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.consecutive_failures, 0);
        assert!(job.last_error.is_none());
    }

    #[tokio::test]
    async fn alert_dedup_and_lifecycle() {
        let db = test_db().await;
        let rule = db
            .insert_rule(CreateMonitoringRule {
                name: "temp high".into(),
                twin_id: Uuid::now_v7(),
                property: "temperature".into(),
                kind: "threshold".into(),
                low: None,
                high: Some(30.0),
                window: None,
                z_threshold: None,
                severity: "high".into(),
                enabled: true,
            })
            .await
            .unwrap();

        let alert = db
            .insert_alert(CreateAlert {
                rule_id: rule.id,
                severity: "high".into(),
                title: "temp high".into(),
                description: "temperature above 30".into(),
            })
            .await
            .unwrap();

        let active = db.find_active_alert_for_rule(rule.id).await.unwrap().unwrap();
        assert_eq!(active.id, alert.id);

        db.touch_alert_occurrence(alert.id).await.unwrap();
        let alert = db.get_alert(alert.id).await.unwrap().unwrap();
        assert_eq!(alert.occurrence_count, 2);

        assert!(db.acknowledge_alert(alert.id, "ops").await.unwrap());
        // Acknowledging twice is a no-op on status.
        assert!(!db.acknowledge_alert(alert.id, "ops").await.unwrap());
        assert!(db.resolve_alert(alert.id).await.unwrap());
        assert!(!db.resolve_alert(alert.id).await.unwrap());

        let alert = db.get_alert(alert.id).await.unwrap().unwrap();
        assert_eq!(alert.status, "resolved");
        assert_eq!(alert.acknowledged_by.as_deref(), Some("ops"));
        assert!(alert.resolved_at.unwrap() >= alert.created_at);
    }

    #[tokio::test]
    async fn observations_come_back_newest_first() {
        let db = test_db().await;
        let twin_id = Uuid::now_v7();

        for value in [1.0, 2.0, 3.0] {
            db.insert_observation(twin_id, "temperature", value)
                .await
                .unwrap();
        }

        let recent = db
            .recent_observations(twin_id, "temperature", 2)
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].value, 3.0);
        assert_eq!(recent[1].value, 2.0);
    }
}
