//! Ordered retrieval of stored events.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::event::{EventMetadata, StoredEvent};
use crate::payload::EventPayload;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("event source backend failure: {0}")]
    Backend(String),

    #[error("event out of order: sequence {got} after {last}")]
    OutOfOrder { last: i64, got: i64 },

    #[error("failed to encode event: {0}")]
    Encode(String),

    /// Internal lock poisoning.
    #[error("event source lock poisoned")]
    Poisoned,
}

/// Upstream, append-only event log.
///
/// Implementations must return events with `sequence_number > after`, in
/// strictly increasing sequence order, at most `limit` of them. An empty page
/// means the caller has caught up.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn get_events(&self, after: i64, limit: usize) -> Result<Vec<StoredEvent>, SourceError>;
}

/// In-memory event log for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryEventSource {
    events: RwLock<Vec<StoredEvent>>,
}

impl InMemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an already-numbered event; sequence numbers must increase.
    pub fn push(&self, event: StoredEvent) -> Result<(), SourceError> {
        let mut events = self.events.write().map_err(|_| SourceError::Poisoned)?;
        if let Some(last) = events.last() {
            if event.sequence_number <= last.sequence_number {
                return Err(SourceError::OutOfOrder {
                    last: last.sequence_number,
                    got: event.sequence_number,
                });
            }
        }
        events.push(event);
        Ok(())
    }

    /// Append a typed payload with the next sequence number.
    pub fn append(
        &self,
        stream_id: impl Into<String>,
        category: impl Into<String>,
        payload: impl Into<EventPayload>,
        metadata: EventMetadata,
    ) -> Result<StoredEvent, SourceError> {
        let mut events = self.events.write().map_err(|_| SourceError::Poisoned)?;
        let next = events.last().map(|e| e.sequence_number + 1).unwrap_or(1);
        let event = StoredEvent::new(
            next,
            stream_id,
            category,
            &payload.into(),
            Utc::now(),
            metadata,
        )
        .map_err(|e| SourceError::Encode(e.to_string()))?;
        events.push(event.clone());
        Ok(event)
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    async fn get_events(&self, after: i64, limit: usize) -> Result<Vec<StoredEvent>, SourceError> {
        let events = self.events.read().map_err(|_| SourceError::Poisoned)?;
        // sorted by sequence number
        let start = events.partition_point(|e| e.sequence_number <= after);
        Ok(events.iter().skip(start).take(limit).cloned().collect())
    }
}
