use outboxd::config::Config;
use outboxd::functions::dispatch::{Dispatcher, run_dispatcher};
use outboxd::services::clickhouse::ClickHouseSink;
use outboxd::services::event_log::EventLogService;
use outboxd::store::PgOutboxStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let store = PgOutboxStore::connect(&config.database_url).await?;
    store.migrate().await?;
    tracing::info!("outbox store ready");

    let sink = ClickHouseSink::new(config.clickhouse.clone());
    let event_log = EventLogService::with_insert_batch_size(sink, config.sink_batch_size);
    let dispatcher = Dispatcher::new(store, event_log, config.batch_size);

    let trigger = config.trigger()?;
    let policy = config.retry_policy();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    tracing::info!(
        batch_size = config.batch_size,
        sink_batch_size = config.sink_batch_size,
        scheduled = config.schedule.is_some(),
        "dispatcher starting"
    );
    run_dispatcher(dispatcher, policy, trigger, shutdown_rx).await
}
