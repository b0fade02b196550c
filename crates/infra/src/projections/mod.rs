//! Event-to-graph projections.
//!
//! Projections consume decoded events and mutate the bitemporal graph at the
//! event's timeline. Both run inside the projector's per-event transaction:
//! - [`role_events`]: circle audit records (reads the graph *before* the event)
//! - [`graph`]: vertex and edge mutations for every event type

pub mod graph;
pub mod role_events;

use thiserror::Error;

use circlegraph_core::{DomainError, TimelineNumber};
use circlegraph_events::{EventDecodeError, EventPayload, StoredEvent};

use crate::graph::{GraphTx, StoreError};

/// Error type for projecting one event.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("domain error: {0}")]
    Domain(#[from] DomainError),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] EventDecodeError),
}

/// Apply one decoded event at timeline `t`.
pub async fn project(
    tx: &mut dyn GraphTx,
    t: TimelineNumber,
    event: &StoredEvent,
    payload: &EventPayload,
) -> Result<(), ProjectionError> {
    role_events::record(tx, t, event, payload).await?;
    graph::apply(tx, t, payload).await
}
