//! Monitoring executor
//!
//! Evaluates each enabled rule of a twin against its observation
//! time-series and raises alerts. Invoked by the scheduler through the
//! twin's monitoring job, never on a hot loop.
//!
//! Duplicate suppression is keyed on (rule, active): a firing with an
//! existing active alert folds into it as an occurrence update instead of a
//! second row.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use mimir_contracts::{RuleKind, Severity};
use mimir_storage::{CreateAlert, Database, MonitoringRuleRow};

use crate::bus::{Event, EventBus, EventType};
use crate::error::EngineError;

const SOURCE: &str = "monitoring";

/// Default sample window for trend/anomaly rules.
const DEFAULT_WINDOW: i64 = 20;
/// Default z-score threshold for anomaly rules.
const DEFAULT_Z_THRESHOLD: f64 = 3.0;

/// Validate rule parameters per kind. Called before a rule row is inserted.
pub fn validate_rule(
    kind: RuleKind,
    low: Option<f64>,
    high: Option<f64>,
    window: Option<i32>,
) -> Result<(), EngineError> {
    match kind {
        RuleKind::Threshold => {
            if low.is_none() && high.is_none() {
                return Err(EngineError::InvalidInput(
                    "threshold rule needs at least one bound".to_string(),
                ));
            }
        }
        RuleKind::Range => match (low, high) {
            (Some(low), Some(high)) if low <= high => {}
            (Some(_), Some(_)) => {
                return Err(EngineError::InvalidInput(
                    "range rule needs low <= high".to_string(),
                ));
            }
            _ => {
                return Err(EngineError::InvalidInput(
                    "range rule needs both bounds".to_string(),
                ));
            }
        },
        RuleKind::Trend => {
            if window.unwrap_or(0) < 2 {
                return Err(EngineError::InvalidInput(
                    "trend rule needs a window of at least 2".to_string(),
                ));
            }
        }
        RuleKind::Anomaly => {}
    }
    Ok(())
}

/// A rule that fired.
#[derive(Debug)]
struct Firing {
    observed: f64,
    detail: String,
    /// Magnitude at or beyond 2x the rule's margin elevates severity.
    escalate: bool,
}

pub struct MonitoringExecutor {
    db: Database,
    bus: Arc<EventBus>,
}

impl MonitoringExecutor {
    pub fn new(db: Database, bus: Arc<EventBus>) -> Self {
        Self { db, bus }
    }

    /// Evaluate every enabled rule attached to the twin. Returns how many
    /// rules fired.
    pub async fn run_for_twin(&self, twin_id: Uuid) -> Result<usize, EngineError> {
        let rules = self.db.list_enabled_rules_for_twin(twin_id).await?;
        let mut fired = 0usize;

        for rule in rules {
            match self.evaluate(&rule).await {
                Ok(Some(firing)) => {
                    self.raise(&rule, firing).await?;
                    fired += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(rule_id = %rule.id, error = %err, "rule evaluation failed");
                }
            }
        }

        Ok(fired)
    }

    async fn evaluate(&self, rule: &MonitoringRuleRow) -> Result<Option<Firing>, EngineError> {
        let kind: RuleKind = rule
            .kind
            .parse()
            .map_err(EngineError::InvalidInput)?;

        match kind {
            RuleKind::Threshold | RuleKind::Range => {
                let Some(value) = self.current_value(rule).await? else {
                    return Ok(None);
                };
                Ok(evaluate_bounds(rule, value))
            }
            RuleKind::Trend => {
                let window = rule.window.map(i64::from).unwrap_or(DEFAULT_WINDOW).max(2);
                let samples = self.window_values(rule, window).await?;
                if samples.len() < 2 {
                    return Ok(None);
                }
                Ok(evaluate_trend(rule, &samples))
            }
            RuleKind::Anomaly => {
                let window = rule.window.map(i64::from).unwrap_or(DEFAULT_WINDOW).max(3);
                let samples = self.window_values(rule, window).await?;
                if samples.len() < 3 {
                    return Ok(None);
                }
                Ok(evaluate_anomaly(rule, &samples))
            }
        }
    }

    /// Latest observation, falling back to the twin's materialised state.
    async fn current_value(&self, rule: &MonitoringRuleRow) -> Result<Option<f64>, EngineError> {
        let recent = self
            .db
            .recent_observations(rule.twin_id, &rule.property, 1)
            .await?;
        if let Some(latest) = recent.first() {
            return Ok(Some(latest.value));
        }

        let twin = self.db.get_twin(rule.twin_id).await?;
        Ok(twin.and_then(|t| t.state.get(&rule.property).and_then(|v| v.as_f64())))
    }

    /// Last `window` samples in chronological order.
    async fn window_values(
        &self,
        rule: &MonitoringRuleRow,
        window: i64,
    ) -> Result<Vec<f64>, EngineError> {
        let mut recent = self
            .db
            .recent_observations(rule.twin_id, &rule.property, window)
            .await?;
        recent.reverse();
        Ok(recent.into_iter().map(|o| o.value).collect())
    }

    /// Create the alert, or fold the firing into the existing active one.
    async fn raise(&self, rule: &MonitoringRuleRow, firing: Firing) -> Result<(), EngineError> {
        if let Some(active) = self.db.find_active_alert_for_rule(rule.id).await? {
            self.db.touch_alert_occurrence(active.id).await?;
            tracing::debug!(
                rule_id = %rule.id,
                alert_id = %active.id,
                "firing folded into active alert"
            );
            return Ok(());
        }

        let mut severity: Severity = rule
            .severity
            .parse()
            .map_err(EngineError::InvalidInput)?;
        if firing.escalate {
            severity = severity.escalate();
        }

        let alert = self
            .db
            .insert_alert(CreateAlert {
                rule_id: rule.id,
                severity: severity.to_string(),
                title: rule.name.clone(),
                description: firing.detail.clone(),
            })
            .await?;

        tracing::warn!(
            rule_id = %rule.id,
            alert_id = %alert.id,
            %severity,
            observed = firing.observed,
            "alert raised"
        );

        self.bus
            .publish(Event::new(
                EventType::AlertRaised,
                SOURCE,
                json!({
                    "alert_id": alert.id,
                    "rule_id": rule.id,
                    "severity": severity.to_string(),
                    "title": alert.title,
                }),
            ))
            .await;

        Ok(())
    }
}

/// Threshold and range share bound evaluation; range requires both bounds
/// and escalates by distance outside them.
fn evaluate_bounds(rule: &MonitoringRuleRow, value: f64) -> Option<Firing> {
    let violated_bound = match (rule.low, rule.high) {
        (Some(low), _) if value < low => Some(low),
        (_, Some(high)) if value > high => Some(high),
        _ => None,
    }?;

    // Margin: half the configured span when both bounds exist, the bound's
    // magnitude otherwise.
    let margin = match (rule.low, rule.high) {
        (Some(low), Some(high)) if high > low => (high - low) / 2.0,
        _ => violated_bound.abs().max(1.0),
    };
    let excess = (value - violated_bound).abs();

    Some(Firing {
        observed: value,
        detail: format!(
            "{} = {value}, outside [{}, {}]",
            rule.property,
            rule.low.map_or("-inf".to_string(), |v| v.to_string()),
            rule.high.map_or("+inf".to_string(), |v| v.to_string()),
        ),
        escalate: excess >= 2.0 * margin,
    })
}

/// Least-squares slope over the window; `high` holds the configured maximum
/// rate per sample.
fn evaluate_trend(rule: &MonitoringRuleRow, samples: &[f64]) -> Option<Firing> {
    let rate = rule.high.or(rule.low)?.abs();
    let slope = linear_slope(samples);

    if slope.abs() <= rate {
        return None;
    }

    Some(Firing {
        observed: slope,
        detail: format!(
            "{} slope {slope:.4} exceeds rate {rate} over {} samples",
            rule.property,
            samples.len()
        ),
        escalate: slope.abs() >= 2.0 * rate,
    })
}

fn evaluate_anomaly(rule: &MonitoringRuleRow, samples: &[f64]) -> Option<Firing> {
    let threshold = rule.z_threshold.unwrap_or(DEFAULT_Z_THRESHOLD);
    let (history, latest) = samples.split_at(samples.len() - 1);
    let latest = latest[0];

    let n = history.len() as f64;
    let mean = history.iter().sum::<f64>() / n;
    let variance = history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let z = if std_dev > 0.0 {
        (latest - mean) / std_dev
    } else if latest != mean {
        f64::INFINITY
    } else {
        0.0
    };

    if z.abs() <= threshold {
        return None;
    }

    Some(Firing {
        observed: latest,
        detail: format!(
            "{} = {latest}, z-score {:.2} exceeds {threshold}",
            rule.property,
            z
        ),
        escalate: z.abs() >= 2.0 * threshold,
    })
}

fn linear_slope(samples: &[f64]) -> f64 {
    let n = samples.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = samples.iter().sum::<f64>() / n;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (idx, value) in samples.iter().enumerate() {
        let dx = idx as f64 - mean_x;
        numerator += dx * (value - mean_y);
        denominator += dx * dx;
    }

    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimir_storage::CreateMonitoringRule;

    async fn setup() -> (MonitoringExecutor, Database, Uuid) {
        let db = Database::in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new());
        let executor = MonitoringExecutor::new(db.clone(), bus);
        (executor, db, Uuid::now_v7())
    }

    async fn rule(
        db: &Database,
        twin_id: Uuid,
        kind: &str,
        low: Option<f64>,
        high: Option<f64>,
        window: Option<i32>,
        z: Option<f64>,
    ) -> MonitoringRuleRow {
        db.insert_rule(CreateMonitoringRule {
            name: format!("{kind} rule"),
            twin_id,
            property: "temperature".to_string(),
            kind: kind.to_string(),
            low,
            high,
            window,
            z_threshold: z,
            severity: "medium".to_string(),
            enabled: true,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn threshold_fires_on_violation() {
        let (executor, db, twin_id) = setup().await;
        rule(&db, twin_id, "threshold", None, Some(30.0), None, None).await;

        db.insert_observation(twin_id, "temperature", 25.0).await.unwrap();
        assert_eq!(executor.run_for_twin(twin_id).await.unwrap(), 0);

        db.insert_observation(twin_id, "temperature", 35.0).await.unwrap();
        assert_eq!(executor.run_for_twin(twin_id).await.unwrap(), 1);

        let alerts = db.list_alerts(Some("active"), None).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, "medium");
    }

    #[tokio::test]
    async fn repeated_firing_folds_into_one_active_alert() {
        let (executor, db, twin_id) = setup().await;
        rule(&db, twin_id, "threshold", None, Some(30.0), None, None).await;

        db.insert_observation(twin_id, "temperature", 40.0).await.unwrap();
        executor.run_for_twin(twin_id).await.unwrap();
        executor.run_for_twin(twin_id).await.unwrap();

        let alerts = db.list_alerts(Some("active"), None).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].occurrence_count, 2);
    }

    #[tokio::test]
    async fn range_escalates_on_large_excursion() {
        let (executor, db, twin_id) = setup().await;
        // Span 10, half-span margin 5: escalation at 10 past a bound.
        rule(&db, twin_id, "range", Some(10.0), Some(20.0), None, None).await;

        db.insert_observation(twin_id, "temperature", 35.0).await.unwrap();
        executor.run_for_twin(twin_id).await.unwrap();

        let alerts = db.list_alerts(Some("active"), None).await.unwrap();
        assert_eq!(alerts[0].severity, "high");
    }

    #[tokio::test]
    async fn trend_fires_on_steep_slope() {
        let (executor, db, twin_id) = setup().await;
        rule(&db, twin_id, "trend", None, Some(1.0), Some(5), None).await;

        for value in [10.0, 13.0, 16.0, 19.0, 22.0] {
            db.insert_observation(twin_id, "temperature", value).await.unwrap();
        }

        assert_eq!(executor.run_for_twin(twin_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn anomaly_fires_on_outlier() {
        let (executor, db, twin_id) = setup().await;
        rule(&db, twin_id, "anomaly", None, None, Some(10), Some(3.0)).await;

        for value in [10.0, 10.1, 9.9, 10.0, 10.1, 9.9, 10.0, 10.1, 9.9] {
            db.insert_observation(twin_id, "temperature", value).await.unwrap();
        }
        db.insert_observation(twin_id, "temperature", 50.0).await.unwrap();

        assert_eq!(executor.run_for_twin(twin_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn no_observations_means_no_firing() {
        let (executor, db, twin_id) = setup().await;
        rule(&db, twin_id, "threshold", Some(0.0), None, None, None).await;

        assert_eq!(executor.run_for_twin(twin_id).await.unwrap(), 0);
        assert!(db.list_alerts(None, None).await.unwrap().is_empty());
    }

    #[test]
    fn rule_validation_rejects_bad_parameters() {
        assert!(validate_rule(RuleKind::Threshold, None, None, None).is_err());
        assert!(validate_rule(RuleKind::Threshold, Some(1.0), None, None).is_ok());
        assert!(validate_rule(RuleKind::Range, Some(5.0), Some(1.0), None).is_err());
        assert!(validate_rule(RuleKind::Range, Some(1.0), Some(5.0), None).is_ok());
        assert!(validate_rule(RuleKind::Trend, None, None, Some(1)).is_err());
        assert!(validate_rule(RuleKind::Trend, None, None, Some(2)).is_ok());
    }

    #[test]
    fn slope_of_linear_series_is_exact() {
        assert!((linear_slope(&[0.0, 2.0, 4.0, 6.0]) - 2.0).abs() < 1e-9);
        assert_eq!(linear_slope(&[5.0]), 0.0);
    }
}
