use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::schema::outbox::{EventOutboxRecord, NewOutboxEvent};
use crate::store::{ClaimedBatch, OutboxStore, WriteTx};

#[derive(Default)]
struct State {
    next_id: i64,
    rows: BTreeMap<i64, EventOutboxRecord>,
    locked: BTreeSet<i64>,
}

/// Outbox store backed by process memory. Keeps the same claim semantics as
/// the Postgres backend (row locks, skip over locked rows, rollback on drop)
/// so dispatcher behavior can be exercised without a database.
#[derive(Clone, Default)]
pub struct MemoryOutboxStore {
    state: Arc<Mutex<State>>,
}

impl MemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<EventOutboxRecord> {
        self.lock().rows.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("outbox state lock poisoned")
    }
}

#[async_trait::async_trait]
impl OutboxStore for MemoryOutboxStore {
    type WriteTx = MemoryWriteTx;
    type Claim = MemoryClaim;

    async fn begin(&self) -> Result<MemoryWriteTx, StoreError> {
        Ok(MemoryWriteTx {
            state: self.state.clone(),
            staged: Vec::new(),
        })
    }

    async fn claim_pending(&self, limit: u32) -> Result<MemoryClaim, StoreError> {
        let mut state = self.lock();

        let mut records = Vec::new();
        for (id, row) in &state.rows {
            if records.len() == limit as usize {
                break;
            }
            if row.processed || state.locked.contains(id) {
                continue;
            }
            records.push(row.clone());
        }
        for record in &records {
            state.locked.insert(record.id);
        }

        drop(state);
        Ok(MemoryClaim {
            state: self.state.clone(),
            records,
            released: false,
        })
    }

    async fn pending_count(&self) -> Result<u64, StoreError> {
        Ok(self.lock().rows.values().filter(|r| !r.processed).count() as u64)
    }
}

/// Staged appends become visible only on commit.
pub struct MemoryWriteTx {
    state: Arc<Mutex<State>>,
    staged: Vec<EventOutboxRecord>,
}

#[async_trait::async_trait]
impl WriteTx for MemoryWriteTx {
    async fn append(&mut self, event: NewOutboxEvent) -> Result<i64, StoreError> {
        let mut state = self.state.lock().expect("outbox state lock poisoned");
        state.next_id += 1;
        let id = state.next_id;
        drop(state);

        self.staged.push(EventOutboxRecord {
            id,
            event_type: event.event_type,
            event_context: event.event_context,
            environment: event.environment,
            metadata_version: event.metadata_version,
            event_date_time: Utc::now(),
            processed: false,
            processed_at: None,
        });
        Ok(id)
    }

    async fn commit(self) -> Result<(), StoreError> {
        let mut state = self.state.lock().expect("outbox state lock poisoned");
        for record in self.staged {
            state.rows.insert(record.id, record);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub struct MemoryClaim {
    state: Arc<Mutex<State>>,
    records: Vec<EventOutboxRecord>,
    released: bool,
}

impl MemoryClaim {
    fn release(&mut self, mark_processed_at: Option<DateTime<Utc>>) {
        if self.released {
            return;
        }
        self.released = true;

        // recover from poisoning; the claim must still mark its rows and
        // free its locks
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for record in &self.records {
            if let Some(at) = mark_processed_at {
                if let Some(row) = state.rows.get_mut(&record.id) {
                    row.processed = true;
                    row.processed_at = Some(at);
                }
            }
            state.locked.remove(&record.id);
        }
    }
}

#[async_trait::async_trait]
impl ClaimedBatch for MemoryClaim {
    fn records(&self) -> &[EventOutboxRecord] {
        &self.records
    }

    async fn commit_processed(mut self, processed_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.release(Some(processed_at));
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.release(None);
        Ok(())
    }
}

impl Drop for MemoryClaim {
    fn drop(&mut self) {
        self.release(None);
    }
}
