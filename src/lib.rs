pub mod config;
pub mod error;
pub mod functions;
pub mod retry;
pub mod schedule;
pub mod schema;
pub mod services;
pub mod store;

pub use config::Config;
pub use error::{
    ConfigError, DispatchError, RetryExhausted, ScheduleError, SinkError, StoreError,
};
pub use functions::dispatch::{DEFAULT_BATCH_SIZE, DispatchSummary, Dispatcher, run_dispatcher};
pub use retry::{RetryPolicy, run_with_retry};
pub use schedule::Trigger;
pub use schema::outbox::{EventLogEntry, EventOutboxRecord, NewOutboxEvent};
pub use services::clickhouse::{ClickHouseConfig, ClickHouseSink};
pub use services::event_log::{EventLogService, EventSink, SinkConnection, prepare_rows};
pub use store::{ClaimedBatch, MemoryOutboxStore, OutboxStore, PgOutboxStore, WriteTx};
