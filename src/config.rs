use std::time::Duration;

use crate::error::{ConfigError, ScheduleError};
use crate::functions::dispatch::DEFAULT_BATCH_SIZE;
use crate::retry::RetryPolicy;
use crate::schedule::Trigger;
use crate::services::clickhouse::ClickHouseConfig;
use crate::services::event_log::DEFAULT_INSERT_BATCH_SIZE;

/// Runtime configuration, read from the environment. Everything except
/// `DATABASE_URL` has a default.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Rows claimed per dispatch pass.
    pub batch_size: u32,
    /// Rows per sink insert; large claims are split into sub-batches.
    pub sink_batch_size: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Trigger cadence when no cron schedule is configured.
    pub poll_interval: Duration,
    /// Optional cron expression; set, it replaces interval polling.
    pub schedule: Option<String>,
    pub timezone: String,
    pub clickhouse: ClickHouseConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_env`] but with an injected lookup, so tests
    /// never have to mutate process environment.
    pub fn from_source<F>(source: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = source("DATABASE_URL").ok_or(ConfigError::Missing {
            name: "DATABASE_URL",
        })?;

        Ok(Self {
            database_url,
            batch_size: parse(&source, "OUTBOXD_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            sink_batch_size: parse(&source, "OUTBOXD_SINK_BATCH_SIZE", DEFAULT_INSERT_BATCH_SIZE)?,
            max_retries: parse(&source, "OUTBOXD_MAX_RETRIES", 5)?,
            backoff_base: Duration::from_secs(parse(&source, "OUTBOXD_BACKOFF_BASE_SECS", 60)?),
            backoff_max: Duration::from_secs(parse(&source, "OUTBOXD_BACKOFF_MAX_SECS", 600)?),
            poll_interval: Duration::from_millis(parse(&source, "OUTBOXD_POLL_MS", 1000)?),
            schedule: source("OUTBOXD_SCHEDULE").filter(|s| !s.trim().is_empty()),
            timezone: source("OUTBOXD_TZ").unwrap_or_else(|| "UTC".to_string()),
            clickhouse: ClickHouseConfig {
                url: source("CLICKHOUSE_URL")
                    .unwrap_or_else(|| "http://localhost:8123".to_string()),
                database: source("CLICKHOUSE_DATABASE").unwrap_or_else(|| "default".to_string()),
                table: source("CLICKHOUSE_EVENT_LOG_TABLE")
                    .unwrap_or_else(|| "event_log".to_string()),
                user: source("CLICKHOUSE_USER"),
                password: source("CLICKHOUSE_PASSWORD"),
            },
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.backoff_base,
            max_delay: self.backoff_max,
        }
    }

    pub fn trigger(&self) -> Result<Trigger, ScheduleError> {
        match &self.schedule {
            Some(expr) => Trigger::cron(expr, &self.timezone),
            None => Ok(Trigger::interval(self.poll_interval)),
        }
    }
}

fn parse<T, F>(source: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match source(name) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse() {
            Ok(value) => Ok(value),
            Err(_) => Err(ConfigError::Invalid { name, value: raw }),
        },
    }
}
