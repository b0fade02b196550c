//! Events as read from the log: sequence number, identity, type tag,
//! JSON data and the batch metadata used to allocate timelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use circlegraph_core::MemberId;

use crate::payload::{EventDecodeError, EventPayload, EventType};

/// Causal and attribution metadata attached to an event by the command side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Identifier shared by every event of one causally-atomic batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,

    /// Member whose command produced the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_issuer_id: Option<MemberId>,

    /// Command that produced the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

/// An event as persisted in the upstream log.
///
/// Notes:
/// - `sequence_number` is strictly increasing across the whole log; it is the
///   projector's checkpoint unit.
/// - `payload` holds the undecoded event data; use [`StoredEvent::decode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub sequence_number: i64,
    pub event_id: Uuid,
    pub stream_id: String,
    pub category: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub metadata: EventMetadata,
}

impl StoredEvent {
    /// Build a stored event from a typed payload.
    pub fn new(
        sequence_number: i64,
        stream_id: impl Into<String>,
        category: impl Into<String>,
        payload: &EventPayload,
        timestamp: DateTime<Utc>,
        metadata: EventMetadata,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            sequence_number,
            event_id: Uuid::now_v7(),
            stream_id: stream_id.into(),
            category: category.into(),
            event_type: payload.event_type().as_str().to_string(),
            payload: payload.to_data()?,
            timestamp,
            metadata,
        })
    }

    pub fn event_type(&self) -> Result<EventType, EventDecodeError> {
        self.event_type.parse()
    }

    /// Decode the typed payload.
    ///
    /// An unknown `event_type` and a malformed payload of a known type are
    /// reported as distinct errors; callers treat the former as fatal.
    pub fn decode(&self) -> Result<EventPayload, EventDecodeError> {
        EventPayload::decode(self.event_type()?, &self.payload)
    }

    /// Batch this event belongs to. Events without a group form their own batch.
    pub fn group_id(&self) -> Uuid {
        self.metadata.group_id.unwrap_or(self.event_id)
    }

    /// Aggregate id encoded in the stream id, when it carries one.
    ///
    /// Streams are named either `<uuid>` or `<category>-<uuid>`.
    pub fn aggregate_id(&self) -> Option<Uuid> {
        let raw = self.stream_id.as_str();
        Uuid::parse_str(raw).ok().or_else(|| {
            raw.split_once('-')
                .and_then(|(_, rest)| Uuid::parse_str(rest).ok())
        })
    }
}
