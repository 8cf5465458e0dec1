//! Alert manager
//!
//! Routes newly raised alerts to notification channels and owns alert state
//! transitions. Routing rules live in the database and are evaluated in
//! order; first match wins, and alerts with no match are recorded but not
//! dispatched. Channel delivery retries with exponential backoff and the
//! per-channel status lands in `alert_deliveries`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use uuid::Uuid;

use mimir_contracts::Severity;
use mimir_storage::{AlertDeliveryRow, AlertRouteRow, AlertRow, Database};

use crate::error::EngineError;

/// Retry configuration for channel delivery.
///
/// Exponential backoff with jitter to avoid thundering herd when several
/// channels fail at once.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Backoff multiplier.
    pub backoff_coefficient: f64,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay before the given attempt number (1-based; attempt 1 has none).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(attempt as i32 - 2);

        let jittered = if self.jitter > 0.0 {
            let range = base * self.jitter;
            let offset = rand::thread_rng().gen_range(-range..=range);
            (base + offset).max(0.0)
        } else {
            base
        };

        Duration::from_secs_f64(jittered)
    }
}

/// Structured message handed to a notification channel.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AlertMessage {
    pub alert_id: Option<Uuid>,
    pub severity: Severity,
    pub title: String,
    pub description: String,
}

/// A named notification sink (slack, email, webhook, ...).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, message: &AlertMessage) -> anyhow::Result<()>;
}

/// Built-in channel that emits the alert as a structured log line. Always
/// registered so high-severity routing works without external services.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &AlertMessage) -> anyhow::Result<()> {
        tracing::warn!(
            alert_id = ?message.alert_id,
            severity = %message.severity,
            title = %message.title,
            description = %message.description,
            "alert notification"
        );
        Ok(())
    }
}

/// Generic webhook channel: POSTs the message as JSON. Covers slack-style
/// incoming webhooks.
pub struct WebhookChannel {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &AlertMessage) -> anyhow::Result<()> {
        let response = self.client.post(&self.url).json(message).send().await?;
        anyhow::ensure!(
            response.status().is_success(),
            "webhook returned {}",
            response.status()
        );
        Ok(())
    }
}

/// Severity-based router with per-channel delivery retries.
pub struct AlertManager {
    db: Database,
    channels: RwLock<HashMap<String, Arc<dyn NotificationChannel>>>,
    retry: RetryPolicy,
}

impl AlertManager {
    pub fn new(db: Database, retry: RetryPolicy) -> Self {
        let manager = Self {
            db,
            channels: RwLock::new(HashMap::new()),
            retry,
        };
        manager.register_channel(Arc::new(LogChannel));
        manager
    }

    pub fn register_channel(&self, channel: Arc<dyn NotificationChannel>) {
        self.channels
            .write()
            .insert(channel.name().to_string(), channel);
    }

    // ========================================================================
    // State transitions
    // ========================================================================

    /// active -> acknowledged. Re-acknowledging an acknowledged alert is a
    /// permitted no-op.
    pub async fn acknowledge(
        &self,
        alert_id: Uuid,
        acknowledged_by: &str,
    ) -> Result<AlertRow, EngineError> {
        if acknowledged_by.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "acknowledged_by is required".to_string(),
            ));
        }

        if self.db.acknowledge_alert(alert_id, acknowledged_by).await? {
            return self.get(alert_id).await;
        }

        let alert = self.get(alert_id).await?;
        match alert.status.as_str() {
            "acknowledged" => Ok(alert),
            other => Err(EngineError::InvalidState(format!(
                "cannot acknowledge alert in status {other}"
            ))),
        }
    }

    /// {active, acknowledged} -> resolved.
    pub async fn resolve(&self, alert_id: Uuid) -> Result<AlertRow, EngineError> {
        if self.db.resolve_alert(alert_id).await? {
            return self.get(alert_id).await;
        }

        let alert = self.get(alert_id).await?;
        Err(EngineError::InvalidState(format!(
            "cannot resolve alert in status {}",
            alert.status
        )))
    }

    pub async fn get(&self, alert_id: Uuid) -> Result<AlertRow, EngineError> {
        self.db
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| EngineError::not_found("alert", alert_id))
    }

    pub async fn get_detail(
        &self,
        alert_id: Uuid,
    ) -> Result<(AlertRow, Vec<AlertDeliveryRow>), EngineError> {
        let alert = self.get(alert_id).await?;
        let deliveries = self.db.list_deliveries(alert_id).await?;
        Ok((alert, deliveries))
    }

    pub async fn list(
        &self,
        status: Option<&str>,
        severity: Option<&str>,
    ) -> Result<Vec<AlertRow>, EngineError> {
        Ok(self.db.list_alerts(status, severity).await?)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Route a stored alert to the channels of the first matching route.
    pub async fn dispatch(&self, alert_id: Uuid) -> Result<(), EngineError> {
        let alert = self.get(alert_id).await?;
        let severity: Severity = alert
            .severity
            .parse()
            .map_err(EngineError::InvalidInput)?;

        let twin_id = match self.db.get_rule(alert.rule_id).await? {
            Some(rule) => Some(rule.twin_id),
            None => None,
        };

        let Some(route) = self.matching_route(severity, twin_id).await? else {
            tracing::info!(%alert_id, %severity, "no matching alert route, not dispatched");
            return Ok(());
        };

        let message = AlertMessage {
            alert_id: Some(alert.id),
            severity,
            title: alert.title.clone(),
            description: alert.description.clone(),
        };

        for channel_name in &route.channels {
            self.deliver(alert.id, channel_name, &message).await?;
        }

        Ok(())
    }

    /// Send a routed notification for an incident that has no alert row
    /// (e.g. a scheduler auto-disable). Delivery status is not recorded.
    pub async fn notify_adhoc(
        &self,
        severity: Severity,
        title: &str,
        description: &str,
    ) -> Result<(), EngineError> {
        let Some(route) = self.matching_route(severity, None).await? else {
            tracing::info!(%severity, title, "no matching alert route for ad-hoc notification");
            return Ok(());
        };

        let message = AlertMessage {
            alert_id: None,
            severity,
            title: title.to_string(),
            description: description.to_string(),
        };

        for channel_name in &route.channels {
            let channel = self.channels.read().get(channel_name).cloned();
            match channel {
                Some(channel) => {
                    if let Err(err) = channel.send(&message).await {
                        tracing::warn!(channel = %channel_name, error = %err, "ad-hoc notification failed");
                    }
                }
                None => {
                    tracing::warn!(channel = %channel_name, "notification channel not registered");
                }
            }
        }

        Ok(())
    }

    /// First route (by position) whose severity range and twin scope match.
    async fn matching_route(
        &self,
        severity: Severity,
        twin_id: Option<Uuid>,
    ) -> Result<Option<AlertRouteRow>, EngineError> {
        let routes = self.db.list_alert_routes().await?;

        for route in routes {
            let min: Severity = route
                .min_severity
                .parse()
                .map_err(EngineError::InvalidInput)?;
            let max: Severity = route
                .max_severity
                .parse()
                .map_err(EngineError::InvalidInput)?;

            if severity < min || severity > max {
                continue;
            }
            if let Some(scope) = route.twin_id {
                if twin_id != Some(scope) {
                    continue;
                }
            }
            return Ok(Some(route));
        }

        Ok(None)
    }

    /// Deliver to one channel with bounded retries, recording status after
    /// every attempt.
    async fn deliver(
        &self,
        alert_id: Uuid,
        channel_name: &str,
        message: &AlertMessage,
    ) -> Result<(), EngineError> {
        let channel = self.channels.read().get(channel_name).cloned();
        let Some(channel) = channel else {
            self.db
                .upsert_delivery(alert_id, channel_name, "failed", 0, Some("channel not registered"))
                .await?;
            tracing::warn!(channel = %channel_name, "notification channel not registered");
            return Ok(());
        };

        self.db
            .upsert_delivery(alert_id, channel_name, "pending", 0, None)
            .await?;

        let mut last_error = String::new();
        for attempt in 1..=self.retry.max_attempts {
            let delay = self.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match channel.send(message).await {
                Ok(()) => {
                    self.db
                        .upsert_delivery(alert_id, channel_name, "sent", attempt as i32, None)
                        .await?;
                    tracing::info!(%alert_id, channel = %channel_name, attempt, "alert delivered");
                    return Ok(());
                }
                Err(err) => {
                    last_error = err.to_string();
                    self.db
                        .upsert_delivery(
                            alert_id,
                            channel_name,
                            "pending",
                            attempt as i32,
                            Some(&last_error),
                        )
                        .await?;
                    tracing::warn!(
                        %alert_id,
                        channel = %channel_name,
                        attempt,
                        error = %last_error,
                        "alert delivery attempt failed"
                    );
                }
            }
        }

        self.db
            .upsert_delivery(
                alert_id,
                channel_name,
                "failed",
                self.retry.max_attempts as i32,
                Some(&last_error),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimir_storage::{CreateAlert, CreateAlertRoute, CreateMonitoringRule};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        name: String,
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl NotificationChannel for CountingChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&self, _message: &AlertMessage) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                anyhow::bail!("transient failure");
            }
            Ok(())
        }
    }

    async fn setup() -> (AlertManager, Database) {
        let db = Database::in_memory().await.unwrap();
        let retry = RetryPolicy {
            max_attempts: 3,
            initial_interval: Duration::from_millis(1),
            backoff_coefficient: 2.0,
            jitter: 0.0,
        };
        let manager = AlertManager::new(db.clone(), retry);
        (manager, db)
    }

    async fn make_alert(db: &Database, severity: &str) -> AlertRow {
        let rule = db
            .insert_rule(CreateMonitoringRule {
                name: "test rule".to_string(),
                twin_id: Uuid::now_v7(),
                property: "temperature".to_string(),
                kind: "threshold".to_string(),
                low: None,
                high: Some(30.0),
                window: None,
                z_threshold: None,
                severity: severity.to_string(),
                enabled: true,
            })
            .await
            .unwrap();

        db.insert_alert(CreateAlert {
            rule_id: rule.id,
            severity: severity.to_string(),
            title: "temperature out of range".to_string(),
            description: "temperature = 42".to_string(),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_monotonic() {
        let (manager, db) = setup().await;
        let alert = make_alert(&db, "high").await;

        let acked = manager.acknowledge(alert.id, "ops").await.unwrap();
        assert_eq!(acked.status, "acknowledged");
        assert_eq!(acked.acknowledged_by.as_deref(), Some("ops"));

        // Re-acknowledging is a no-op, not an error.
        let again = manager.acknowledge(alert.id, "ops").await.unwrap();
        assert_eq!(again.status, "acknowledged");

        let resolved = manager.resolve(alert.id).await.unwrap();
        assert_eq!(resolved.status, "resolved");
        assert!(resolved.resolved_at.unwrap() >= resolved.acknowledged_at.unwrap());

        // resolved is terminal.
        let err = manager.resolve(alert.id).await.unwrap_err();
        assert_eq!(err.code(), "invalid_state");
        let err = manager.acknowledge(alert.id, "ops").await.unwrap_err();
        assert_eq!(err.code(), "invalid_state");
    }

    #[tokio::test]
    async fn resolve_straight_from_active() {
        let (manager, db) = setup().await;
        let alert = make_alert(&db, "low").await;

        let resolved = manager.resolve(alert.id).await.unwrap();
        assert_eq!(resolved.status, "resolved");
        assert!(resolved.acknowledged_by.is_none());
    }

    #[tokio::test]
    async fn dispatch_uses_first_matching_route() {
        let (manager, db) = setup().await;

        db.insert_alert_route(CreateAlertRoute {
            position: 1,
            min_severity: "critical".to_string(),
            max_severity: "critical".to_string(),
            twin_id: None,
            channels: vec!["pager".to_string()],
        })
        .await
        .unwrap();
        db.insert_alert_route(CreateAlertRoute {
            position: 2,
            min_severity: "low".to_string(),
            max_severity: "high".to_string(),
            twin_id: None,
            channels: vec!["counting".to_string()],
        })
        .await
        .unwrap();

        let channel = Arc::new(CountingChannel {
            name: "counting".to_string(),
            calls: AtomicUsize::new(0),
            fail_first: 0,
        });
        manager.register_channel(channel.clone());

        let alert = make_alert(&db, "high").await;
        manager.dispatch(alert.id).await.unwrap();

        assert_eq!(channel.calls.load(Ordering::SeqCst), 1);

        let deliveries = db.list_deliveries(alert.id).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].channel, "counting");
        assert_eq!(deliveries[0].status, "sent");
        assert_eq!(deliveries[0].attempts, 1);
    }

    #[tokio::test]
    async fn delivery_retries_then_succeeds() {
        let (manager, db) = setup().await;

        db.insert_alert_route(CreateAlertRoute {
            position: 1,
            min_severity: "low".to_string(),
            max_severity: "critical".to_string(),
            twin_id: None,
            channels: vec!["flaky".to_string()],
        })
        .await
        .unwrap();

        let channel = Arc::new(CountingChannel {
            name: "flaky".to_string(),
            calls: AtomicUsize::new(0),
            fail_first: 2,
        });
        manager.register_channel(channel.clone());

        let alert = make_alert(&db, "medium").await;
        manager.dispatch(alert.id).await.unwrap();

        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
        let deliveries = db.list_deliveries(alert.id).await.unwrap();
        assert_eq!(deliveries[0].status, "sent");
        assert_eq!(deliveries[0].attempts, 3);
    }

    #[tokio::test]
    async fn exhausted_retries_record_failure() {
        let (manager, db) = setup().await;

        db.insert_alert_route(CreateAlertRoute {
            position: 1,
            min_severity: "low".to_string(),
            max_severity: "critical".to_string(),
            twin_id: None,
            channels: vec!["dead".to_string()],
        })
        .await
        .unwrap();

        let channel = Arc::new(CountingChannel {
            name: "dead".to_string(),
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
        });
        manager.register_channel(channel.clone());

        let alert = make_alert(&db, "medium").await;
        manager.dispatch(alert.id).await.unwrap();

        assert_eq!(channel.calls.load(Ordering::SeqCst), 3);
        let deliveries = db.list_deliveries(alert.id).await.unwrap();
        assert_eq!(deliveries[0].status, "failed");
        assert_eq!(deliveries[0].last_error.as_deref(), Some("transient failure"));
    }

    #[tokio::test]
    async fn unmatched_alert_is_recorded_but_not_dispatched() {
        let (manager, db) = setup().await;

        // Only route wants critical; alert is low.
        db.insert_alert_route(CreateAlertRoute {
            position: 1,
            min_severity: "critical".to_string(),
            max_severity: "critical".to_string(),
            twin_id: None,
            channels: vec!["log".to_string()],
        })
        .await
        .unwrap();

        let alert = make_alert(&db, "low").await;
        manager.dispatch(alert.id).await.unwrap();

        assert!(db.list_deliveries(alert.id).await.unwrap().is_empty());
    }

    #[test]
    fn backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));
    }
}
