use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::schema::outbox::{EventOutboxRecord, NewOutboxEvent};

pub mod memory;
pub mod postgres;

pub use memory::MemoryOutboxStore;
pub use postgres::PgOutboxStore;

/// Storage capability for the outbox table. The writer side opens a
/// transaction with [`OutboxStore::begin`] so the outbox append commits or
/// rolls back together with the business change; the dispatcher side claims
/// pending rows under non-blocking row locks with
/// [`OutboxStore::claim_pending`].
#[async_trait::async_trait]
pub trait OutboxStore: Send + Sync {
    type WriteTx: WriteTx;
    type Claim: ClaimedBatch;

    async fn begin(&self) -> Result<Self::WriteTx, StoreError>;

    /// Select up to `limit` unprocessed rows in ascending id order, locking
    /// them for the lifetime of the returned claim. Rows already locked by a
    /// concurrent claimer are skipped, never waited on.
    async fn claim_pending(&self, limit: u32) -> Result<Self::Claim, StoreError>;

    async fn pending_count(&self) -> Result<u64, StoreError>;
}

/// An open write transaction. Dropping it without [`WriteTx::commit`] rolls
/// everything back, outbox rows included.
#[async_trait::async_trait]
pub trait WriteTx: Send {
    async fn append(&mut self, event: NewOutboxEvent) -> Result<i64, StoreError>;
    async fn commit(self) -> Result<(), StoreError>;
    async fn rollback(self) -> Result<(), StoreError>;
}

/// A set of claimed rows plus the transaction holding their locks. Either
/// the whole claim is marked processed and committed, or it is rolled back
/// and every row returns to pending. Dropping the claim releases the locks
/// without marking anything.
#[async_trait::async_trait]
pub trait ClaimedBatch: Send {
    fn records(&self) -> &[EventOutboxRecord];

    async fn commit_processed(self, processed_at: DateTime<Utc>) -> Result<(), StoreError>;
    async fn rollback(self) -> Result<(), StoreError>;
}
