use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::ScheduleError;

/// When the dispatcher fires: a fixed poll interval, or a cron expression
/// evaluated in a configured timezone for beat-style schedules.
#[derive(Debug, Clone)]
pub enum Trigger {
    Interval(Duration),
    Cron { schedule: cron::Schedule, timezone: Tz },
}

impl Trigger {
    pub fn interval(period: Duration) -> Self {
        Self::Interval(period)
    }

    pub fn cron(expr: &str, timezone: &str) -> Result<Self, ScheduleError> {
        let tz: Tz = timezone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(timezone.to_string()))?;
        let normalized = normalize_schedule(expr);
        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidExpression {
                expr: normalized.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self::Cron {
            schedule,
            timezone: tz,
        })
    }

    /// How long to sleep from `from` until the next run should start.
    pub fn next_delay(&self, from: DateTime<Utc>) -> Result<Duration, ScheduleError> {
        match self {
            Self::Interval(period) => Ok(*period),
            Self::Cron { schedule, timezone } => {
                let from_local = from.with_timezone(timezone);
                let next_local = schedule
                    .after(&from_local)
                    .next()
                    .ok_or(ScheduleError::NoFutureOccurrence)?;
                let next = next_local.with_timezone(&Utc);
                Ok((next - from).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }
}

// the `cron` crate requires 6-field (second-granularity) expressions,
// so standard 5-field crontab input gets a seconds field prepended
fn normalize_schedule(expr: &str) -> String {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let joined = fields.join(" ");
    if fields.len() == 5 {
        format!("0 {joined}")
    } else {
        joined
    }
}
