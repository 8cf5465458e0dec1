// Embedded schema bootstrap
//
// The whole schema is idempotent (CREATE TABLE IF NOT EXISTS) and applied
// once at startup. SQLite type affinity keeps the DDL compact: UUIDs are
// BLOBs, timestamps are RFC 3339 TEXT, JSON columns are TEXT.

use anyhow::Result;
use sqlx::SqlitePool;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS imports (
    id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    row_count INTEGER NOT NULL,
    columns TEXT NOT NULL,
    rows TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS autonomous_workflows (
    id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    import_id BLOB NOT NULL REFERENCES imports(id),
    status TEXT NOT NULL,
    current_stage TEXT,
    total_steps INTEGER NOT NULL,
    completed_steps INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    CHECK (total_steps > 0),
    CHECK (completed_steps <= total_steps)
);

CREATE INDEX IF NOT EXISTS idx_workflows_import ON autonomous_workflows(import_id);
CREATE INDEX IF NOT EXISTS idx_workflows_status ON autonomous_workflows(status);

CREATE TABLE IF NOT EXISTS workflow_steps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id BLOB NOT NULL REFERENCES autonomous_workflows(id),
    stage TEXT NOT NULL,
    step_order INTEGER NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT,
    output TEXT,
    UNIQUE (workflow_id, step_order)
);

CREATE TABLE IF NOT EXISTS workflow_artifacts (
    id BLOB PRIMARY KEY,
    workflow_id BLOB NOT NULL REFERENCES autonomous_workflows(id),
    stage TEXT NOT NULL,
    kind TEXT NOT NULL,
    artifact_id BLOB NOT NULL,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_artifacts_workflow ON workflow_artifacts(workflow_id);

CREATE TABLE IF NOT EXISTS scheduler_jobs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    job_type TEXT NOT NULL,
    target TEXT NOT NULL,
    cron_expr TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    last_run_at TEXT,
    next_run_at TEXT,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS monitoring_rules (
    id BLOB PRIMARY KEY,
    name TEXT NOT NULL,
    twin_id BLOB NOT NULL,
    property TEXT NOT NULL,
    kind TEXT NOT NULL,
    low REAL,
    high REAL,
    window INTEGER,
    z_threshold REAL,
    severity TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rules_twin ON monitoring_rules(twin_id);

CREATE TABLE IF NOT EXISTS alerts (
    id BLOB PRIMARY KEY,
    rule_id BLOB NOT NULL REFERENCES monitoring_rules(id),
    severity TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    status TEXT NOT NULL,
    occurrence_count INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    acknowledged_by TEXT,
    acknowledged_at TEXT,
    resolved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_alerts_rule_status ON alerts(rule_id, status);

CREATE TABLE IF NOT EXISTS alert_routes (
    id BLOB PRIMARY KEY,
    position INTEGER NOT NULL,
    min_severity TEXT NOT NULL,
    max_severity TEXT NOT NULL,
    twin_id BLOB,
    channels TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alert_deliveries (
    alert_id BLOB NOT NULL REFERENCES alerts(id),
    channel TEXT NOT NULL,
    status TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (alert_id, channel)
);

CREATE TABLE IF NOT EXISTS inferred_schemas (
    id BLOB PRIMARY KEY,
    workflow_id BLOB NOT NULL,
    import_id BLOB NOT NULL,
    columns TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ontologies (
    id BLOB PRIMARY KEY,
    workflow_id BLOB NOT NULL,
    graph_uri TEXT NOT NULL,
    turtle TEXT NOT NULL,
    class_count INTEGER NOT NULL,
    property_count INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS models (
    id BLOB PRIMARY KEY,
    workflow_id BLOB NOT NULL,
    target_column TEXT NOT NULL,
    model_kind TEXT NOT NULL,
    metrics TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS digital_twins (
    id BLOB PRIMARY KEY,
    workflow_id BLOB NOT NULL,
    name TEXT NOT NULL,
    state TEXT NOT NULL,
    model_ids TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS twin_observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    twin_id BLOB NOT NULL,
    property TEXT NOT NULL,
    value REAL NOT NULL,
    observed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_observations_twin_property
    ON twin_observations(twin_id, property, observed_at);
"#;

/// Apply the embedded schema. Safe to call on every startup.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
