//! # Autonomous Workflow Engine
//!
//! The core of the Mimir data platform: from one imported dataset it drives
//! schema inference, ontology synthesis, entity extraction, model training,
//! twin construction, and monitoring setup as a persistent, resumable
//! pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   WorkflowOrchestrator                       │
//! │   (one detached task per workflow, stages in strict order)  │
//! └─────────────────────────────────────────────────────────────┘
//!            │                        │
//!            ▼                        ▼
//! ┌──────────────────────┐  ┌──────────────────────────────────┐
//! │       EventBus       │  │          mimir-storage           │
//! │ (sync fan-out, chain │  │ (SQLite: workflows, steps, jobs, │
//! │  reactions detach)   │  │  rules, alerts, artifacts)       │
//! └──────────────────────┘  └──────────────────────────────────┘
//!            │                        ▲
//!            ▼                        │
//! ┌──────────────────────┐  ┌──────────────────────────────────┐
//! │     JobScheduler     │─▶│ MonitoringExecutor / AlertManager │
//! │ (cron heap + tick)   │  └──────────────────────────────────┘
//! └──────────────────────┘
//! ```
//!
//! Startup order: persistence → event bus → alert manager → scheduler →
//! chain-reaction handler → orchestrator. Tear down in reverse; every
//! component exposes a graceful-shutdown entry point.

pub mod alerts;
pub mod bus;
pub mod config;
pub mod error;
pub mod graph;
pub mod monitoring;
pub mod orchestrator;
pub mod reactions;
pub mod scheduler;
pub mod stages;

/// Prelude for common imports
pub mod prelude {
    pub use crate::alerts::{AlertManager, AlertMessage, NotificationChannel, RetryPolicy};
    pub use crate::bus::{Event, EventBus, EventType};
    pub use crate::config::EngineConfig;
    pub use crate::error::EngineError;
    pub use crate::graph::{GraphStore, HttpGraphStore, InMemoryGraphStore};
    pub use crate::monitoring::MonitoringExecutor;
    pub use crate::orchestrator::{
        StageContext, StageHandler, StageOutput, StageRegistry, WorkflowOrchestrator,
    };
    pub use crate::reactions::{ChainReactionHandler, ReactionConfig};
    pub use crate::scheduler::{
        CronSchedule, DispatchOutcome, EngineJobDispatcher, JobDispatcher, JobScheduler,
        PipelineRunner,
    };
}

// Re-export key types at crate root
pub use alerts::{AlertManager, AlertMessage, LogChannel, NotificationChannel, RetryPolicy};
pub use bus::{Event, EventBus, EventType};
pub use config::EngineConfig;
pub use error::EngineError;
pub use graph::{GraphStore, HttpGraphStore, InMemoryGraphStore};
pub use monitoring::MonitoringExecutor;
pub use orchestrator::{
    StageArtifact, StageContext, StageHandler, StageOutput, StageRegistry, WorkflowOrchestrator,
    WorkflowSnapshot,
};
pub use reactions::{ChainReactionHandler, ReactionConfig, ReactionLogEntry};
pub use scheduler::{
    CronSchedule, DispatchOutcome, EngineJobDispatcher, EventPipelineRunner, JobDispatcher,
    JobScheduler, PipelineRunner,
};
