//! Circle audit records ([`RoleEvent`]) folded from structural role events.
//!
//! Runs before the graph mutation of the same event, so parents and role
//! types are read as they were before the change. Each affected circle gets
//! at most one record per timeline; it is rewritten (delete + insert, same
//! id) every time another event of the batch touches the circle.

use tracing::debug;
use uuid::Uuid;

use circlegraph_core::{
    CircleChangesApplied, MemberId, Role, RoleEvent, RoleEventType, RoleId, TimelineNumber,
};
use circlegraph_events::{EventPayload, StoredEvent};

use super::ProjectionError;
use super::graph::parent_of;
use crate::graph::{GraphTx, StoreResult};

struct Batch<'a> {
    t: TimelineNumber,
    issuer: MemberId,
    event: &'a StoredEvent,
}

/// Fold `payload` into the audit records of the circles it touches.
///
/// Events without a command issuer and events about core roles are not
/// audited.
pub async fn record(
    tx: &mut dyn GraphTx,
    t: TimelineNumber,
    event: &StoredEvent,
    payload: &EventPayload,
) -> Result<(), ProjectionError> {
    let Some(issuer) = event.metadata.command_issuer_id else {
        return Ok(());
    };
    let batch = Batch { t, issuer, event };

    match payload {
        EventPayload::RoleCreated(e) => {
            if e.role_type.is_core_role() {
                return Ok(());
            }
            if let Some(parent) = e.parent_role_id {
                let role = e.role_id;
                update(tx, &batch, parent, |c| c.record_new(role)).await?;
            }
        }
        EventPayload::RoleUpdated(e) => {
            if e.role_type.is_core_role() {
                return Ok(());
            }
            if let Some(parent) = parent_of(tx, t, e.role_id).await? {
                let role = e.role_id;
                update(tx, &batch, parent.id, |c| c.record_updated(role)).await?;
            }
        }
        EventPayload::RoleDeleted(e) => {
            if is_core_role(tx, t, e.role_id).await? {
                return Ok(());
            }
            if let Some(parent) = parent_of(tx, t, e.role_id).await? {
                let role = e.role_id;
                update(tx, &batch, parent.id, |c| c.record_deleted(role)).await?;
            }
        }
        EventPayload::RoleChangedParent(e) => {
            if is_core_role(tx, t, e.role_id).await? {
                return Ok(());
            }
            let previous = parent_of(tx, t, e.role_id).await?.map(|p| p.id);
            record_move(tx, &batch, e.role_id, previous, e.parent_role_id).await?;
        }
        _ => {}
    }
    Ok(())
}

async fn is_core_role(tx: &mut dyn GraphTx, t: TimelineNumber, role: RoleId) -> StoreResult<bool> {
    Ok(tx
        .vertex::<Role>(t, role)
        .await?
        .is_some_and(|r| r.role_type.is_core_role()))
}

async fn record_move(
    tx: &mut dyn GraphTx,
    batch: &Batch<'_>,
    role: RoleId,
    previous: Option<RoleId>,
    next: Option<RoleId>,
) -> StoreResult<()> {
    match (previous, next) {
        (Some(previous), Some(next)) if previous != next => {
            let next_parent = parent_of(tx, batch.t, next).await?.map(|p| p.id);
            let previous_parent = parent_of(tx, batch.t, previous).await?.map(|p| p.id);

            let created_here = update(tx, batch, previous, |c| {
                let created = c.record_moved_out(role, next);
                if next_parent == Some(previous) {
                    c.record_child_received(next, role);
                }
                created
            })
            .await?;

            update(tx, batch, next, |c| {
                if created_here {
                    c.record_new(role);
                } else {
                    c.record_moved_in(role, previous, next);
                }
                if previous_parent == Some(next) {
                    c.record_child_released(previous, role);
                }
            })
            .await?;
        }
        (Some(previous), None) => {
            update(tx, batch, previous, |c| c.record_deleted(role)).await?;
        }
        (None, Some(next)) => {
            update(tx, batch, next, |c| c.record_new(role)).await?;
        }
        _ => {}
    }
    Ok(())
}

/// Load, change and store the record of `circle` for the batch's timeline.
///
/// # Panics
///
/// Panics when more than one record already exists for `(circle, timeline)`.
async fn update<R>(
    tx: &mut dyn GraphTx,
    batch: &Batch<'_>,
    circle: RoleId,
    change: impl FnOnce(&mut CircleChangesApplied) -> R,
) -> StoreResult<R> {
    let mut existing = tx.role_events_at(batch.t, circle).await?;
    if existing.len() > 1 {
        panic!(
            "{} role events for role {circle} at timeline {}",
            existing.len(),
            batch.t
        );
    }

    let (id, mut data) = match existing.pop() {
        Some(event) => (event.id, event.data),
        None => (Uuid::now_v7(), CircleChangesApplied::new(batch.issuer)),
    };
    let result = change(&mut data);

    tx.delete_role_events(batch.t, circle).await?;
    if !data.is_empty() {
        tx.insert_role_event(&RoleEvent {
            timeline: batch.t,
            id,
            command_id: batch.event.metadata.correlation_id,
            cause_id: Some(batch.event.event_id),
            role_id: circle,
            event_type: RoleEventType::CircleChangesApplied,
            data,
        })
        .await?;
    }
    debug!(
        timeline = %batch.t,
        role_id = %circle,
        sequence_number = batch.event.sequence_number,
        "role event updated"
    );
    Ok(result)
}
