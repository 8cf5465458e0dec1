//! Cron expression handling
//!
//! Jobs are configured with standard 5-field expressions (minute, hour,
//! day-of-month, month, day-of-week) plus the `@hourly`-style nicknames.
//! The underlying parser wants a seconds field, so 5-field expressions are
//! normalised by prefixing second 0. Zero steps and wrong field counts are
//! rejected before they reach the parser.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::error::EngineError;

/// A validated cron schedule.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    schedule: cron::Schedule,
    expr: String,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, EngineError> {
        let normalized = normalize(expr)?;
        let schedule = cron::Schedule::from_str(&normalized).map_err(|e| {
            EngineError::InvalidInput(format!("invalid cron expression '{expr}': {e}"))
        })?;

        Ok(Self {
            schedule,
            expr: expr.trim().to_string(),
        })
    }

    /// Validate without keeping the schedule.
    pub fn validate(expr: &str) -> Result<(), EngineError> {
        Self::parse(expr).map(|_| ())
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// The least occurrence strictly greater than `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

fn normalize(expr: &str) -> Result<String, EngineError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(EngineError::InvalidInput(
            "cron expression is empty".to_string(),
        ));
    }

    // Nicknames (@hourly, @daily, ...) pass straight through.
    if expr.starts_with('@') {
        return Ok(expr.to_string());
    }

    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(EngineError::InvalidInput(format!(
            "cron expression '{expr}' has {} fields, expected 5",
            fields.len()
        )));
    }

    for field in &fields {
        if let Some((_, step)) = field.split_once('/') {
            if step.parse::<u64>() == Ok(0) {
                return Err(EngineError::InvalidInput(format!(
                    "cron expression '{expr}' has a zero step"
                )));
            }
        }
    }

    Ok(format!("0 {expr}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn accepts_standard_five_field_forms() {
        for expr in ["*/5 * * * *", "0 9 * * 1-5", "15,45 */2 1 * *", "* * * * *"] {
            assert!(CronSchedule::validate(expr).is_ok(), "{expr} should parse");
        }
    }

    #[test]
    fn accepts_nicknames() {
        for expr in ["@hourly", "@daily", "@weekly", "@monthly", "@yearly"] {
            assert!(CronSchedule::validate(expr).is_ok(), "{expr} should parse");
        }
    }

    #[test]
    fn rejects_zero_step() {
        let err = CronSchedule::validate("*/0 * * * *").unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronSchedule::validate("* * * *").is_err());
        assert!(CronSchedule::validate("* * * * * *").is_err());
        assert!(CronSchedule::validate("").is_err());
        assert!(CronSchedule::validate("not a cron").is_err());
    }

    #[test]
    fn next_occurrence_is_strictly_in_the_future() {
        let schedule = CronSchedule::parse("*/1 * * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let next = schedule.next_after(at).unwrap();
        assert!(next > at);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 12, 1, 0).unwrap());
    }

    #[test]
    fn every_five_minutes_lands_on_boundaries() {
        let schedule = CronSchedule::parse("*/5 * * * *").unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 3, 10).unwrap();

        let next = schedule.next_after(at).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap());
    }
}
