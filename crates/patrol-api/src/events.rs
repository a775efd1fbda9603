//! `POST /api/events/bulk` ingestion: validates and normalizes, then hands
//! off to an `EventSink` — the concrete event store is out of this crate's
//! scope, so an in-memory sink backs tests and demos.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    pub id: Uuid,
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Batch-level envelope carried alongside the events themselves
/// (`spec.md` §6: "body carries batch id, session id, events, and batch
/// metadata including the owning job id").
#[derive(Debug, Clone, Deserialize)]
pub struct BatchMetadata {
    pub job_id: Uuid,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NormalizedBatch {
    pub batch_id: Uuid,
    pub session_id: Uuid,
    pub job_id: Uuid,
    pub metadata: serde_json::Value,
    pub events: Vec<NormalizedEvent>,
}

/// Returns `Err` with the index of the first invalid event, so the caller
/// can report a precise 400 rather than failing the whole batch blind.
pub fn normalize(raw: Vec<RawEvent>) -> Result<Vec<NormalizedEvent>, usize> {
    raw.into_iter()
        .enumerate()
        .map(|(idx, event)| {
            if event.event_type.trim().is_empty() {
                return Err(idx);
            }
            Ok(NormalizedEvent {
                id: Uuid::new_v4(),
                event_type: event.event_type,
                data: event.data,
                timestamp: event.timestamp.unwrap_or_else(Utc::now),
                metadata: event.metadata.unwrap_or_else(|| serde_json::json!({})),
            })
        })
        .collect()
}

#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn store_bulk(&self, batch: NormalizedBatch) -> anyhow::Result<()>;
}

/// Test/demo sink; a real deployment swaps in a store-backed implementation.
#[derive(Default)]
pub struct InMemoryEventSink {
    batches: tokio::sync::Mutex<Vec<NormalizedBatch>>,
}

#[async_trait::async_trait]
impl EventSink for InMemoryEventSink {
    async fn store_bulk(&self, batch: NormalizedBatch) -> anyhow::Result<()> {
        self.batches.lock().await.push(batch);
        Ok(())
    }
}

impl InMemoryEventSink {
    pub async fn len(&self) -> usize {
        self.batches.lock().await.iter().map(|b| b.events.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_events_missing_a_type() {
        let raw = vec![RawEvent {
            event_type: "   ".to_string(),
            data: serde_json::json!({}),
            timestamp: None,
            metadata: None,
        }];
        assert_eq!(normalize(raw), Err(0));
    }

    #[test]
    fn fills_in_timestamp_and_metadata_defaults() {
        let raw = vec![RawEvent {
            event_type: "page_loaded".to_string(),
            data: serde_json::json!({"url": "https://x"}),
            timestamp: None,
            metadata: None,
        }];
        let normalized = normalize(raw).unwrap();
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].event_type, "page_loaded");
        assert_eq!(normalized[0].metadata, serde_json::json!({}));
    }
}
