//! Timeline allocation: one timeline per event group.

use tracing::debug;

use circlegraph_core::Timeline;
use circlegraph_events::StoredEvent;

use crate::graph::{GraphTx, StoreError, StoreResult};

/// Resolve the timeline of `event`'s group, allocating it on first sight.
///
/// The new timeline is strictly newer than the current one and is re-read
/// after the insert, so the caller sees exactly what the store kept.
pub async fn timeline_for_event(tx: &mut dyn GraphTx, event: &StoredEvent) -> StoreResult<Timeline> {
    let group_id = event.group_id();
    if let Some(existing) = tx.timeline_for_group(group_id).await? {
        return Ok(existing);
    }

    let current = tx.current_timeline().await?.map(|t| t.number);
    let timeline = Timeline::allocate(
        current,
        event.timestamp,
        group_id,
        Some(event.category.clone()),
        event.aggregate_id(),
    );
    tx.insert_timeline(&timeline).await?;
    debug!(
        timeline = %timeline.number,
        group_id = %group_id,
        sequence_number = event.sequence_number,
        "allocated timeline"
    );

    tx.timeline_for_group(group_id).await?.ok_or_else(|| {
        StoreError::execution(
            "timeline_for_event",
            format!("timeline for group {group_id} vanished after insert"),
        )
    })
}
