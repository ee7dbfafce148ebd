pub mod clickhouse;
pub mod event_log;

pub use clickhouse::*;
pub use event_log::*;
