use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::error::StoreError;
use crate::schema::outbox::{EventOutboxRecord, NewOutboxEvent};
use crate::store::{ClaimedBatch, OutboxStore, WriteTx};

const POOL_MAX_CONNECTIONS: u32 = 8;

// one UPDATE statement per this many claimed rows
const MARK_CHUNK_SIZE: usize = 1000;

#[derive(Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl OutboxStore for PgOutboxStore {
    type WriteTx = PgWriteTx;
    type Claim = PgClaim;

    async fn begin(&self) -> Result<PgWriteTx, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(PgWriteTx { tx })
    }

    async fn claim_pending(&self, limit: u32) -> Result<PgClaim, StoreError> {
        let mut tx = self.pool.begin().await?;

        let records: Vec<EventOutboxRecord> = sqlx::query_as(
            r#"
            SELECT id, event_type, event_context, environment, metadata_version,
                   event_date_time, processed, processed_at
            FROM event_outbox
            WHERE processed = false
            ORDER BY id
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await?;

        Ok(PgClaim { tx, records })
    }

    async fn pending_count(&self) -> Result<u64, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM event_outbox WHERE processed = false")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

pub struct PgWriteTx {
    tx: Transaction<'static, Postgres>,
}

impl PgWriteTx {
    /// Executor for business statements that must commit atomically with the
    /// outbox append.
    pub fn executor(&mut self) -> &mut PgConnection {
        &mut *self.tx
    }
}

#[async_trait::async_trait]
impl WriteTx for PgWriteTx {
    async fn append(&mut self, event: NewOutboxEvent) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO event_outbox
                (event_type, event_context, environment, metadata_version, event_date_time, processed)
            VALUES ($1, $2, $3, $4, now(), false)
            RETURNING id
            "#,
        )
        .bind(&event.event_type)
        .bind(&event.event_context)
        .bind(&event.environment)
        .bind(event.metadata_version)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Claimed rows plus the transaction whose `FOR UPDATE` locks cover them.
/// Dropping it rolls the transaction back and the locks go with it.
pub struct PgClaim {
    tx: Transaction<'static, Postgres>,
    records: Vec<EventOutboxRecord>,
}

#[async_trait::async_trait]
impl ClaimedBatch for PgClaim {
    fn records(&self) -> &[EventOutboxRecord] {
        &self.records
    }

    async fn commit_processed(mut self, processed_at: DateTime<Utc>) -> Result<(), StoreError> {
        for chunk in self.records.chunks(MARK_CHUNK_SIZE) {
            let ids: Vec<i64> = chunk.iter().map(|r| r.id).collect();
            sqlx::query(
                "UPDATE event_outbox SET processed = true, processed_at = $2 WHERE id = ANY($1)",
            )
            .bind(&ids)
            .bind(processed_at)
            .execute(&mut *self.tx)
            .await?;
        }
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
