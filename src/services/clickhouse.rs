use crate::error::SinkError;
use crate::schema::outbox::EventLogEntry;
use crate::services::event_log::{EventSink, SinkConnection};

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub url: String,
    pub database: String,
    pub table: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Event sink backed by the ClickHouse HTTP interface. Rows go out as
/// `INSERT ... FORMAT JSONEachRow`, one JSON document per line.
pub struct ClickHouseSink {
    client: reqwest::Client,
    config: ClickHouseConfig,
}

impl ClickHouseSink {
    pub fn new(config: ClickHouseConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");
        Self { client, config }
    }
}

#[async_trait::async_trait]
impl EventSink for ClickHouseSink {
    type Conn = ClickHouseConnection;

    async fn open(&self) -> Result<ClickHouseConnection, SinkError> {
        // /ping answers without auth; catches a dead sink before any claim
        // transaction work is wasted on it
        let response = self
            .client
            .get(join_url(&self.config.url, "/ping"))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(ClickHouseConnection {
            client: self.client.clone(),
            config: self.config.clone(),
        })
    }
}

pub struct ClickHouseConnection {
    client: reqwest::Client,
    config: ClickHouseConfig,
}

#[async_trait::async_trait]
impl SinkConnection for ClickHouseConnection {
    async fn insert_batch(&self, rows: &[EventLogEntry]) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(join_url(&self.config.url, "/"))
            .query(&[("query", insert_sql(&self.config))])
            .body(encode_rows(rows)?);

        if let Some(user) = &self.config.user {
            request = request.header("X-ClickHouse-User", user);
        }
        if let Some(password) = &self.config.password {
            request = request.header("X-ClickHouse-Key", password);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "clickhouse: insert rejected");
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

fn insert_sql(config: &ClickHouseConfig) -> String {
    format!(
        "INSERT INTO {}.{} (event_type, event_date_time, environment, event_context, metadata_version) FORMAT JSONEachRow",
        config.database, config.table
    )
}

fn encode_rows(rows: &[EventLogEntry]) -> Result<String, SinkError> {
    let mut body = String::new();
    for row in rows {
        body.push_str(&serde_json::to_string(row)?);
        body.push('\n');
    }
    Ok(body)
}
