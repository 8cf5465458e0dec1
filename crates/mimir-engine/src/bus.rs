// Event Bus
//
// In-process typed pub/sub. Publish synchronously fans out to the handlers
// registered for the event's type, in registration order, on the publisher's
// task. A handler's error or panic is logged and never reaches the publisher
// or the handlers after it. Nothing is buffered, replayed, or persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// ============================================================================
// Event taxonomy (closed set for the core)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PipelineCompleted,
    DriftDetected,
    ExtractionCompleted,
    TrainingStarted,
    TrainingCompleted,
    OntologyVersionCreated,
    StageCompleted,
    StageFailed,
    WorkflowCompleted,
    WorkflowFailed,
    AlertRaised,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipelineCompleted => "pipeline_completed",
            Self::DriftDetected => "drift_detected",
            Self::ExtractionCompleted => "extraction_completed",
            Self::TrainingStarted => "training_started",
            Self::TrainingCompleted => "training_completed",
            Self::OntologyVersionCreated => "ontology_version_created",
            Self::StageCompleted => "stage_completed",
            Self::StageFailed => "stage_failed",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
            Self::AlertRaised => "alert_raised",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Event
// ============================================================================

/// In-memory value passed through the bus. Ephemeral: subsystems persist
/// their own side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Component that published the event.
    pub source: String,
    /// Free-form string-keyed payload.
    pub payload: serde_json::Value,
    pub ts: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            source: source.into(),
            payload,
            ts: Utc::now(),
        }
    }

    /// String field accessor for payload lookups in handlers.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }

    pub fn payload_bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(|v| v.as_bool())
    }

    pub fn payload_f64(&self, key: &str) -> Option<f64> {
        self.payload.get(key).and_then(|v| v.as_f64())
    }

    pub fn payload_i64(&self, key: &str) -> Option<i64> {
        self.payload.get(key).and_then(|v| v.as_i64())
    }
}

// ============================================================================
// Bus
// ============================================================================

/// Async event handler. Errors are logged by the bus, not propagated.
pub type EventHandler =
    Arc<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Handle returned by `subscribe`, usable for unsubscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    name: String,
    handler: EventHandler,
}

/// In-process publish/subscribe hub.
///
/// The subscription table sits behind a short-held RwLock; the handler list
/// is cloned out before any handler runs so the lock is never held across an
/// await point.
pub struct EventBus {
    subscriptions: RwLock<HashMap<EventType, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for an event type. `name` shows up in logs when the
    /// handler errors.
    pub fn subscribe<F>(&self, event_type: EventType, name: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let subscription = Subscription {
            id,
            name: name.into(),
            handler: Arc::new(handler),
        };

        self.subscriptions
            .write()
            .entry(event_type)
            .or_default()
            .push(subscription);

        id
    }

    /// Remove a subscription. Unknown handles are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut table = self.subscriptions.write();
        for subs in table.values_mut() {
            subs.retain(|s| s.id != id);
        }
    }

    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.subscriptions
            .read()
            .get(&event_type)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Synchronously invoke every handler registered for the event's type, in
    /// registration order. Returns only after all handlers have returned.
    pub async fn publish(&self, event: Event) {
        let handlers: Vec<(String, EventHandler)> = {
            let table = self.subscriptions.read();
            table
                .get(&event.event_type)
                .map(|subs| {
                    subs.iter()
                        .map(|s| (s.name.clone(), s.handler.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        tracing::debug!(
            event_type = %event.event_type,
            source = %event.source,
            handlers = handlers.len(),
            "publishing event"
        );

        for (name, handler) in handlers {
            let fut = std::panic::AssertUnwindSafe(handler(event.clone())).catch_unwind();
            match fut.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(
                        event_type = %event.event_type,
                        handler = %name,
                        error = %err,
                        "event handler failed"
                    );
                }
                Err(_panic) => {
                    tracing::error!(
                        event_type = %event.event_type,
                        handler = %name,
                        "event handler panicked"
                    );
                }
            }
        }
    }
}
