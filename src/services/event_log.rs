use std::collections::BTreeSet;

use crate::error::SinkError;
use crate::schema::outbox::{EventLogEntry, EventOutboxRecord};

pub const DEFAULT_INSERT_BATCH_SIZE: usize = 1000;

/// Turn claimed records into sink rows. Pure and index-aligned with the
/// input; preparing the same records twice yields byte-identical rows.
pub fn prepare_rows(records: &[EventOutboxRecord]) -> Vec<EventLogEntry> {
    records.iter().map(EventLogEntry::from_record).collect()
}

#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    type Conn: SinkConnection;

    /// Acquire a connection scoped to one dispatch pass. Dropped on every
    /// exit path.
    async fn open(&self) -> Result<Self::Conn, SinkError>;
}

#[async_trait::async_trait]
pub trait SinkConnection: Send {
    /// Returning `Ok` means the sink durably accepted every row. A batch is
    /// never partially accepted from the caller's point of view.
    async fn insert_batch(&self, rows: &[EventLogEntry]) -> Result<(), SinkError>;
}

/// Owns the sink and the sub-batch size. Large deliveries are split into
/// sub-batches sent sequentially over one connection; the first failed
/// sub-batch aborts the rest and propagates, so the caller can roll back the
/// whole claim.
pub struct EventLogService<K> {
    sink: K,
    insert_batch_size: usize,
}

impl<K: EventSink> EventLogService<K> {
    pub fn new(sink: K) -> Self {
        Self::with_insert_batch_size(sink, DEFAULT_INSERT_BATCH_SIZE)
    }

    pub fn with_insert_batch_size(sink: K, insert_batch_size: usize) -> Self {
        Self {
            sink,
            insert_batch_size: insert_batch_size.max(1),
        }
    }

    pub async fn insert_events(&self, rows: &[EventLogEntry]) -> Result<(), SinkError> {
        if rows.is_empty() {
            tracing::debug!("event log: nothing to insert");
            return Ok(());
        }

        let conn = self.sink.open().await?;
        let total_batches = rows.len().div_ceil(self.insert_batch_size);

        for (index, chunk) in rows.chunks(self.insert_batch_size).enumerate() {
            let batch = index + 1;
            if let Err(error) = conn.insert_batch(chunk).await {
                tracing::error!(
                    rows = chunk.len(),
                    batch,
                    total_batches,
                    error = %error,
                    "event log: sub-batch insert failed"
                );
                return Err(error);
            }
            tracing::info!(
                rows = chunk.len(),
                batch,
                total_batches,
                event_types = ?distinct_event_types(chunk),
                "event log: sub-batch inserted"
            );
        }

        Ok(())
    }
}

fn distinct_event_types(rows: &[EventLogEntry]) -> BTreeSet<&str> {
    rows.iter().map(|r| r.event_type.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};

    fn record(id: i64, context: serde_json::Value) -> EventOutboxRecord {
        EventOutboxRecord {
            id,
            event_type: "user_created".to_string(),
            event_context: context,
            environment: "Test".to_string(),
            metadata_version: 1,
            event_date_time: Utc::now(),
            processed: false,
            processed_at: None,
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        state: Arc<Mutex<SinkState>>,
    }

    #[derive(Default)]
    struct SinkState {
        opens: usize,
        calls: usize,
        fail_on_call: Option<usize>,
        batches: Vec<Vec<EventLogEntry>>,
    }

    impl RecordingSink {
        fn failing_on(call: usize) -> Self {
            let sink = Self::default();
            sink.state.lock().unwrap().fail_on_call = Some(call);
            sink
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.state
                .lock()
                .unwrap()
                .batches
                .iter()
                .map(Vec::len)
                .collect()
        }

        fn opens(&self) -> usize {
            self.state.lock().unwrap().opens
        }
    }

    struct RecordingConn {
        state: Arc<Mutex<SinkState>>,
    }

    #[async_trait::async_trait]
    impl EventSink for RecordingSink {
        type Conn = RecordingConn;

        async fn open(&self) -> Result<RecordingConn, SinkError> {
            self.state.lock().unwrap().opens += 1;
            Ok(RecordingConn {
                state: self.state.clone(),
            })
        }
    }

    #[async_trait::async_trait]
    impl SinkConnection for RecordingConn {
        async fn insert_batch(&self, rows: &[EventLogEntry]) -> Result<(), SinkError> {
            let mut state = self.state.lock().unwrap();
            state.calls += 1;
            if state.fail_on_call == Some(state.calls) {
                return Err(SinkError::Rejected {
                    status: 500,
                    body: "injected failure".to_string(),
                });
            }
            state.batches.push(rows.to_vec());
            Ok(())
        }
    }

    #[test]
    fn prepare_is_canonical_and_idempotent() {
        let records = vec![record(
            1,
            serde_json::json!({"z_last": true, "a_first": {"nested": [1, 2]}}),
        )];

        let first = prepare_rows(&records);
        let second = prepare_rows(&records);

        assert_eq!(first, second);
        assert_eq!(
            first[0].event_context,
            r#"{"a_first":{"nested":[1,2]},"z_last":true}"#
        );
    }

    #[test]
    fn prepare_aligns_with_input_order() {
        let records = vec![
            record(3, serde_json::json!({"n": 3})),
            record(1, serde_json::json!({"n": 1})),
        ];

        let rows = prepare_rows(&records);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event_context, r#"{"n":3}"#);
        assert_eq!(rows[1].event_context, r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn splits_into_sub_batches() {
        let records: Vec<_> = (0..2500)
            .map(|n| record(n, serde_json::json!({"n": n})))
            .collect();
        let rows = prepare_rows(&records);

        let sink = RecordingSink::default();
        let service = EventLogService::with_insert_batch_size(sink.clone(), 1000);
        service.insert_events(&rows).await.unwrap();

        assert_eq!(sink.batch_sizes(), vec![1000, 1000, 500]);
        assert_eq!(sink.opens(), 1);
    }

    #[tokio::test]
    async fn failed_sub_batch_stops_the_rest() {
        let records: Vec<_> = (0..2500)
            .map(|n| record(n, serde_json::json!({"n": n})))
            .collect();
        let rows = prepare_rows(&records);

        let sink = RecordingSink::failing_on(2);
        let service = EventLogService::with_insert_batch_size(sink.clone(), 1000);
        let err = service.insert_events(&rows).await.unwrap_err();

        assert!(matches!(err, SinkError::Rejected { status: 500, .. }));
        // only the first sub-batch got through, the third was never sent
        assert_eq!(sink.batch_sizes(), vec![1000]);
        assert_eq!(sink.state.lock().unwrap().calls, 2);
    }

    #[tokio::test]
    async fn empty_input_skips_the_sink() {
        let sink = RecordingSink::default();
        let service = EventLogService::new(sink.clone());

        service.insert_events(&[]).await.unwrap();
        assert_eq!(sink.opens(), 0);
    }
}
