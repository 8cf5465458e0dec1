// Monitoring rule DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// How a rule evaluates its observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Fire when the current value crosses either configured bound
    Threshold,
    /// Fire when the current value leaves [low, high]
    Range,
    /// Fire when the fitted slope over the window exceeds the rate
    Trend,
    /// Fire when the latest value's |z-score| exceeds the threshold
    Anomaly,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Threshold => write!(f, "threshold"),
            Self::Range => write!(f, "range"),
            Self::Trend => write!(f, "trend"),
            Self::Anomaly => write!(f, "anomaly"),
        }
    }
}

impl std::str::FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "threshold" => Ok(Self::Threshold),
            "range" => Ok(Self::Range),
            "trend" => Ok(Self::Trend),
            "anomaly" => Ok(Self::Anomaly),
            other => Err(format!("unknown rule kind: {other}")),
        }
    }
}

/// Severity level, ordered low to critical so escalation can compare.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// One level up, capped at critical.
    pub fn escalate(&self) -> Severity {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Threshold or trend rule attached to a twin property.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MonitoringRule {
    pub id: Uuid,
    pub name: String,
    pub twin_id: Uuid,
    pub property: String,
    pub kind: RuleKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
    /// Sample-window size for trend/anomaly rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<i32>,
    /// Z-score threshold for anomaly rules (default 3.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub z_threshold: Option<f64>,
    pub severity: Severity,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Request to append a twin observation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ObservationRequest {
    pub property: String,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn severity_escalation_caps_at_critical() {
        assert_eq!(Severity::Low.escalate(), Severity::Medium);
        assert_eq!(Severity::High.escalate(), Severity::Critical);
        assert_eq!(Severity::Critical.escalate(), Severity::Critical);
    }
}
