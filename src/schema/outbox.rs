use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the `event_outbox` table. Written together with the business
/// change that caused it, later claimed and flipped to processed by the
/// dispatcher. Rows are never deleted here.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EventOutboxRecord {
    pub id: i64,
    pub event_type: String,
    pub event_context: serde_json::Value,
    pub environment: String,
    pub metadata_version: i32,
    pub event_date_time: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Writer-side input. `id` and `event_date_time` are assigned by the store
/// at append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub event_type: String,
    pub environment: String,
    pub event_context: serde_json::Value,
    pub metadata_version: i32,
}

impl NewOutboxEvent {
    pub fn new(event_type: &str, environment: &str, event_context: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            environment: environment.to_string(),
            event_context,
            metadata_version: 1,
        }
    }

    pub fn with_metadata_version(mut self, metadata_version: i32) -> Self {
        self.metadata_version = metadata_version;
        self
    }
}

/// A prepared sink row. Serializes to one flat JSON object per row, with
/// `event_context` flattened to its canonical JSON text so the sink stores a
/// stable string column regardless of context shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub event_type: String,
    #[serde(with = "sink_datetime")]
    pub event_date_time: DateTime<Utc>,
    pub environment: String,
    pub event_context: String,
    pub metadata_version: i32,
}

impl EventLogEntry {
    pub fn from_record(record: &EventOutboxRecord) -> Self {
        Self {
            event_type: record.event_type.clone(),
            event_date_time: record.event_date_time,
            environment: record.environment.clone(),
            // serde_json orders object keys, so repeated serialization of the
            // same context is byte-identical
            event_context: record.event_context.to_string(),
            metadata_version: record.metadata_version,
        }
    }
}

// ClickHouse DateTime64(6) does not accept RFC 3339, so the sink column uses
// the plain `YYYY-MM-DD hh:mm:ss.ffffff` form in UTC.
mod sink_datetime {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_defaults_metadata_version() {
        let event = NewOutboxEvent::new("user_created", "Test", serde_json::json!({"id": 1}));
        assert_eq!(event.metadata_version, 1);

        let versioned = event.with_metadata_version(3);
        assert_eq!(versioned.metadata_version, 3);
    }

    #[test]
    fn entry_serializes_sink_datetime_format() {
        let record = EventOutboxRecord {
            id: 1,
            event_type: "user_created".to_string(),
            event_context: serde_json::json!({"user_id": 42}),
            environment: "Test".to_string(),
            metadata_version: 1,
            event_date_time: DateTime::parse_from_rfc3339("2024-03-01T12:30:45.123456Z")
                .unwrap()
                .with_timezone(&Utc),
            processed: false,
            processed_at: None,
        };

        let entry = EventLogEntry::from_record(&record);
        let json: serde_json::Value = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event_date_time"], "2024-03-01 12:30:45.123456");
        assert_eq!(json["event_context"], r#"{"user_id":42}"#);
    }

    #[test]
    fn entry_datetime_round_trips() {
        let record = EventOutboxRecord {
            id: 7,
            event_type: "order_placed".to_string(),
            event_context: serde_json::json!({}),
            environment: "Local".to_string(),
            metadata_version: 1,
            event_date_time: Utc::now(),
            processed: false,
            processed_at: None,
        };

        let entry = EventLogEntry::from_record(&record);
        let encoded = serde_json::to_string(&entry).unwrap();
        let decoded: EventLogEntry = serde_json::from_str(&encoded).unwrap();
        // microsecond precision is what the sink stores
        assert_eq!(
            decoded.event_date_time.timestamp_micros(),
            entry.event_date_time.timestamp_micros()
        );
    }
}
