//! Stage handler contract
//!
//! The six pipeline stages are variants behind a single capability: a typed
//! handler that turns (workflow context, accumulated artifacts) into new
//! artifacts and an output payload, or a failure. Concrete handlers live in
//! `crate::stages`; the registry lets tests swap individual entries.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use mimir_contracts::{ArtifactKind, StageKind};
use mimir_storage::Database;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::graph::GraphStore;

/// Execution context handed to a stage handler.
///
/// Carries the cancellation signal; well-behaved handlers check it at their
/// own I/O boundaries via `check_cancelled`.
#[derive(Clone)]
pub struct StageContext {
    pub workflow_id: Uuid,
    pub import_id: Uuid,
    pub db: Database,
    pub graph: Arc<dyn GraphStore>,
    pub cancel: CancellationToken,
    pub config: Arc<EngineConfig>,
}

impl StageContext {
    /// Per-workflow graph URI; all RDF output of a workflow lives under it.
    pub fn graph_uri(&self) -> String {
        format!("mimir://workflows/{}", self.workflow_id)
    }

    /// Surface cancellation as a typed error at handler suspension points.
    pub fn check_cancelled(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A typed artifact reference emitted by a stage.
#[derive(Debug, Clone)]
pub struct StageArtifact {
    pub kind: ArtifactKind,
    pub artifact_id: Uuid,
    pub name: String,
}

impl StageArtifact {
    pub fn new(kind: ArtifactKind, artifact_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            kind,
            artifact_id,
            name: name.into(),
        }
    }
}

/// What a stage produced: artifacts plus an opaque payload recorded on the
/// step row.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub payload: serde_json::Value,
    pub artifacts: Vec<StageArtifact>,
}

impl StageOutput {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            artifacts: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: StageArtifact) -> Self {
        self.artifacts.push(artifact);
        self
    }
}

/// One pipeline stage.
///
/// Handlers must be idempotent per (workflow, stage): recovery after a crash
/// re-executes the stage that was running. Handlers achieve this by
/// namespacing outputs under the workflow ID and deleting partial outputs
/// for that ID before beginning.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> StageKind;

    async fn execute(&self, ctx: &StageContext) -> Result<StageOutput, EngineError>;
}

/// Registry of stage handlers keyed by stage kind.
pub struct StageRegistry {
    handlers: HashMap<StageKind, Arc<dyn StageHandler>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry populated with the built-in handlers for all six stages.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for handler in crate::stages::builtin_handlers() {
            registry.register(handler);
        }
        registry
    }

    /// Register (or replace) the handler for its stage.
    pub fn register(&mut self, handler: Arc<dyn StageHandler>) {
        tracing::info!(stage = %handler.stage(), "registered stage handler");
        self.handlers.insert(handler.stage(), handler);
    }

    pub fn get(&self, stage: StageKind) -> Result<Arc<dyn StageHandler>, EngineError> {
        self.handlers.get(&stage).cloned().ok_or_else(|| {
            EngineError::HandlerFailed(format!("no handler registered for stage {stage}"))
        })
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
