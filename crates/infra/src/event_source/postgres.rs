//! Reads the upstream event log from the `event` table.
//!
//! The table is owned by the command side; this source only reads it, in
//! sequence order, starting strictly after a given sequence number.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use circlegraph_events::{EventMetadata, EventSource, SourceError, StoredEvent};

use crate::graph::postgres::sql_limit;

#[derive(Debug, Clone)]
pub struct PgEventSource {
    pool: PgPool,
}

impl PgEventSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode(row: &PgRow) -> Result<StoredEvent, sqlx::Error> {
    let metadata: Option<serde_json::Value> = row.try_get("metadata")?;
    let metadata = match metadata {
        Some(value) => serde_json::from_value::<EventMetadata>(value)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        None => EventMetadata::default(),
    };
    Ok(StoredEvent {
        sequence_number: row.try_get("sequencenumber")?,
        event_id: row.try_get("eventid")?,
        stream_id: row.try_get("streamid")?,
        category: row.try_get("category")?,
        event_type: row.try_get("eventtype")?,
        payload: row.try_get("data")?,
        timestamp: row.try_get("timestamp")?,
        metadata,
    })
}

#[async_trait]
impl EventSource for PgEventSource {
    #[instrument(skip(self), err)]
    async fn get_events(&self, after: i64, limit: usize) -> Result<Vec<StoredEvent>, SourceError> {
        let rows = sqlx::query(
            r#"
            SELECT sequencenumber, eventid, streamid, category, eventtype, data, "timestamp", metadata
            FROM event
            WHERE sequencenumber > $1
            ORDER BY sequencenumber ASC
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SourceError::Backend(format!("get_events: {e}")))?;

        let events = rows
            .iter()
            .map(decode)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SourceError::Backend(format!("undecodable event row: {e}")))?;

        // the projector relies on strictly increasing sequence numbers
        let mut last = after;
        for event in &events {
            if event.sequence_number <= last {
                return Err(SourceError::OutOfOrder {
                    last,
                    got: event.sequence_number,
                });
            }
            last = event.sequence_number;
        }
        Ok(events)
    }
}
