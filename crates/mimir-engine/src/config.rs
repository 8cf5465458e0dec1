//! Engine configuration, read once from the environment at startup.

use std::time::Duration;

use anyhow::{Context, Result};

/// Runtime configuration for the engine and its HTTP wrapper.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite database file path (`:memory:` allowed for tests).
    pub database_path: String,
    /// Base URL of the RDF graph store; None selects the in-memory store.
    pub graph_store_url: Option<String>,
    /// Dataset name within the graph store.
    pub graph_dataset: String,
    /// Scheduler tick resolution.
    pub scheduler_tick: Duration,
    /// Consecutive failures before a scheduled job is auto-disabled.
    pub max_job_failures: i32,
    /// Delivery attempts per notification channel.
    pub alert_retries: u32,
    /// Optional per-stage timeout; None means unbounded.
    pub stage_timeout: Option<Duration>,
    /// Opaque LLM provider identifier passed through to stage handlers.
    pub llm_provider: Option<String>,
    /// HTTP bind address.
    pub bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: "mimir.db".to_string(),
            graph_store_url: None,
            graph_dataset: "mimir".to_string(),
            scheduler_tick: Duration::from_secs(1),
            max_job_failures: 5,
            alert_retries: 3,
            stage_timeout: None,
            llm_provider: None,
            bind_addr: "0.0.0.0:9000".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `MIMIR_*` environment variables, falling back
    /// to defaults. Malformed numeric values are a configuration error.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let scheduler_tick = match std::env::var("MIMIR_SCHEDULER_TICK_MS") {
            Ok(raw) => Duration::from_millis(
                raw.parse::<u64>()
                    .context("MIMIR_SCHEDULER_TICK_MS must be an integer")?,
            ),
            Err(_) => defaults.scheduler_tick,
        };

        let max_job_failures = match std::env::var("MIMIR_MAX_JOB_FAILURES") {
            Ok(raw) => raw
                .parse::<i32>()
                .context("MIMIR_MAX_JOB_FAILURES must be an integer")?,
            Err(_) => defaults.max_job_failures,
        };

        let alert_retries = match std::env::var("MIMIR_ALERT_RETRIES") {
            Ok(raw) => raw
                .parse::<u32>()
                .context("MIMIR_ALERT_RETRIES must be an integer")?,
            Err(_) => defaults.alert_retries,
        };

        let stage_timeout = match std::env::var("MIMIR_STAGE_TIMEOUT_SECS") {
            Ok(raw) => Some(Duration::from_secs(
                raw.parse::<u64>()
                    .context("MIMIR_STAGE_TIMEOUT_SECS must be an integer")?,
            )),
            Err(_) => None,
        };

        Ok(Self {
            database_path: std::env::var("MIMIR_DATABASE_PATH")
                .unwrap_or(defaults.database_path),
            graph_store_url: std::env::var("MIMIR_GRAPH_STORE_URL").ok(),
            graph_dataset: std::env::var("MIMIR_GRAPH_DATASET").unwrap_or(defaults.graph_dataset),
            scheduler_tick,
            max_job_failures,
            alert_retries,
            stage_timeout,
            llm_provider: std::env::var("MIMIR_LLM_PROVIDER").ok(),
            bind_addr: std::env::var("MIMIR_BIND_ADDR").unwrap_or(defaults.bind_addr),
        })
    }
}
