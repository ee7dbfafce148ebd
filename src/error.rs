use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("sink rejected batch ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A single dispatch pass failed. The variant names the phase so operators
/// can tell a claim problem from a sink outage in the logs.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to claim pending events: {0}")]
    Claim(#[source] StoreError),
    #[error("failed to deliver claimed batch: {0}")]
    Deliver(#[source] SinkError),
    #[error("failed to mark claimed batch processed: {0}")]
    Mark(#[source] StoreError),
}

/// The retry budget ran out. Carries the last cause; the records involved
/// are still pending and will be picked up by the next scheduled run.
#[derive(Debug, Error)]
#[error("giving up after {attempts} attempts: {source}")]
pub struct RetryExhausted<E>
where
    E: std::error::Error + 'static,
{
    pub attempts: u32,
    #[source]
    pub source: E,
}

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
    #[error("invalid cron expression `{expr}`: {reason}")]
    InvalidExpression { expr: String, reason: String },
    #[error("cron has no future occurrences")]
    NoFutureOccurrence,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not set")]
    Missing { name: &'static str },
    #[error("invalid value for {name}: `{value}`")]
    Invalid { name: &'static str, value: String },
}
