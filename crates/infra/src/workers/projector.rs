use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use circlegraph_events::{EventDecodeError, EventSource, Notifier, NotifyError, SourceError, StoredEvent};

use crate::graph::{GraphStore, StoreError};
use crate::projections::{self, ProjectionError};
use crate::timeline::timeline_for_event;

/// Channel signalled after every committed event.
pub const TIMELINE_CHANNEL: &str = "timeline_changed";

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ProjectorError {
    #[error("event source error: {0}")]
    Source(#[from] SourceError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("projection failed at sequence number {sequence_number}: {source}")]
    Projection {
        sequence_number: i64,
        #[source]
        source: ProjectionError,
    },

    #[error("notify error: {0}")]
    Notify(#[from] NotifyError),
}

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// An event being applied is finished first.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = self.join.await {
            warn!(error = %err, "projector task ended abnormally");
        }
    }
}

/// Applies the event log to the graph store.
///
/// - one store transaction per event, checkpoint advanced inside it
/// - events at or below the stored checkpoint are skipped
/// - [`TIMELINE_CHANNEL`] is signalled after each commit
///
/// Single-writer is not enforced here; the caller holds the distributed lock.
pub struct Projector {
    store: Arc<dyn GraphStore>,
    source: Arc<dyn EventSource>,
    notifier: Arc<dyn Notifier>,
    page_size: usize,
    poll_interval: Duration,
}

impl Projector {
    pub fn new(store: Arc<dyn GraphStore>, source: Arc<dyn EventSource>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            source,
            notifier,
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Apply every event after the checkpoint, page by page, until the
    /// source returns an empty page. Returns the number of events applied.
    #[instrument(skip(self), err)]
    pub async fn catch_up(&self) -> Result<usize, ProjectorError> {
        let mut after = {
            let mut tx = self.store.begin_read().await?;
            let checkpoint = tx.checkpoint().await?;
            tx.rollback().await?;
            checkpoint
        };

        let mut applied = 0;
        loop {
            let page = self.source.get_events(after, self.page_size).await?;
            if page.is_empty() {
                break;
            }
            for event in &page {
                if self.apply_event(event).await? {
                    applied += 1;
                }
                after = event.sequence_number;
            }
        }
        Ok(applied)
    }

    /// Apply one event in its own transaction. Returns false when the event
    /// was already applied.
    ///
    /// A failed event leaves its transaction uncommitted; dropping it rolls
    /// back, so the checkpoint stays put and the event is retried.
    ///
    /// # Panics
    ///
    /// Panics on an event type outside the known set: skipping it would
    /// silently diverge the graph from the log.
    #[instrument(
        skip(self, event),
        fields(sequence_number = event.sequence_number, event_type = %event.event_type),
        err
    )]
    pub async fn apply_event(&self, event: &StoredEvent) -> Result<bool, ProjectorError> {
        let seq = event.sequence_number;
        let mut tx = self.store.begin().await?;

        let checkpoint = tx.checkpoint().await?;
        if seq <= checkpoint {
            debug!(checkpoint, "event already applied");
            tx.rollback().await?;
            return Ok(false);
        }

        let payload = match event.decode() {
            Ok(payload) => payload,
            Err(EventDecodeError::UnknownEventType(event_type)) => {
                panic!("unknown event type {event_type} at sequence number {seq}")
            }
            Err(err) => {
                return Err(ProjectorError::Projection {
                    sequence_number: seq,
                    source: err.into(),
                });
            }
        };

        let timeline = timeline_for_event(tx.as_mut(), event).await?;
        projections::project(tx.as_mut(), timeline.number, event, &payload)
            .await
            .map_err(|source| ProjectorError::Projection {
                sequence_number: seq,
                source,
            })?;
        tx.set_checkpoint(seq).await?;
        tx.commit().await?;

        info!(
            timeline = %timeline.number,
            group_id = %timeline.group_id,
            "event applied"
        );
        self.notifier
            .notify(TIMELINE_CHANNEL, &timeline.number.to_string())
            .await?;
        Ok(true)
    }

    /// Catch up, then poll every `poll_interval` until `shutdown` resolves.
    ///
    /// Shutdown is only observed between catch-ups, never in the middle of an
    /// event. Failures are logged and retried on the next poll.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!(
            page_size = self.page_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "projector started"
        );

        loop {
            match self.catch_up().await {
                Ok(0) => {}
                Ok(applied) => info!(applied, "projector caught up"),
                Err(err) => warn!(error = %err, "projector catch-up failed"),
            }

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("projector stopped");
    }

    /// Run on a background task until [`WorkerHandle::shutdown`].
    pub fn spawn(self: Arc<Self>) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            self.run(async {
                let _ = shutdown_rx.await;
            })
            .await;
        });

        WorkerHandle {
            shutdown: Some(shutdown_tx),
            join,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    use circlegraph_core::{MemberId, Role, RoleId, RoleType};
    use circlegraph_events::payload::{RoleCreated, RoleUpdated};
    use circlegraph_events::{EventMetadata, InMemoryEventSource, Listener, LocalHub};

    use crate::graph::InMemoryGraphStore;

    struct Fixture {
        store: Arc<InMemoryGraphStore>,
        source: Arc<InMemoryEventSource>,
        hub: LocalHub,
        projector: Projector,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryGraphStore::new());
        let source = Arc::new(InMemoryEventSource::new());
        let hub = LocalHub::new();
        let projector = Projector::new(store.clone(), source.clone(), Arc::new(hub.clone())).with_page_size(2);
        Fixture {
            store,
            source,
            hub,
            projector,
        }
    }

    fn root(role_id: RoleId) -> RoleCreated {
        RoleCreated {
            role_id,
            role_type: RoleType::Circle,
            name: "General".into(),
            purpose: String::new(),
            parent_role_id: None,
        }
    }

    fn metadata(group: Uuid) -> EventMetadata {
        EventMetadata {
            group_id: Some(group),
            command_issuer_id: Some(MemberId::new()),
            correlation_id: None,
        }
    }

    async fn checkpoint(store: &InMemoryGraphStore) -> i64 {
        store.begin_read().await.unwrap().checkpoint().await.unwrap()
    }

    #[tokio::test]
    async fn catch_up_pages_through_the_log_and_signals_each_commit() {
        let f = fixture();
        let mut listener = f.hub.local_listener();
        listener.listen(TIMELINE_CHANNEL).await.unwrap();

        let role = RoleId::new();
        let group = Uuid::now_v7();
        f.source.append("role", "role", root(role), metadata(group)).unwrap();
        for name in ["a", "b", "c"] {
            f.source
                .append(
                    "role",
                    "role",
                    RoleUpdated {
                        role_id: role,
                        role_type: RoleType::Circle,
                        name: name.into(),
                        purpose: String::new(),
                    },
                    metadata(group),
                )
                .unwrap();
        }

        assert_eq!(f.projector.catch_up().await.unwrap(), 4);
        assert_eq!(checkpoint(&f.store).await, 4);
        for _ in 0..4 {
            assert!(listener.recv().await.is_some());
        }

        let mut tx = f.store.begin_read().await.unwrap();
        let current = tx.current_timeline().await.unwrap().unwrap();
        assert_eq!(current.group_id, group);
        let stored = tx.vertex::<Role>(current.number, role).await.unwrap().unwrap();
        assert_eq!(stored.name, "c");

        // nothing new: nothing applied
        assert_eq!(f.projector.catch_up().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replaying_an_applied_event_is_a_no_op() {
        let f = fixture();
        let event = f
            .source
            .append("role", "role", root(RoleId::new()), metadata(Uuid::now_v7()))
            .unwrap();

        assert!(f.projector.apply_event(&event).await.unwrap());
        assert!(!f.projector.apply_event(&event).await.unwrap());
        assert_eq!(checkpoint(&f.store).await, event.sequence_number);
    }

    #[tokio::test]
    async fn a_failed_event_does_not_advance_the_checkpoint() {
        let f = fixture();
        let orphan = RoleCreated {
            parent_role_id: Some(RoleId::new()),
            ..root(RoleId::new())
        };
        f.source
            .append("role", "role", orphan, metadata(Uuid::now_v7()))
            .unwrap();

        let err = f.projector.catch_up().await.unwrap_err();
        assert!(matches!(
            err,
            ProjectorError::Projection { sequence_number: 1, .. }
        ));
        assert_eq!(checkpoint(&f.store).await, 0);
        let mut tx = f.store.begin_read().await.unwrap();
        assert!(tx.current_timeline().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error() {
        let f = fixture();
        let mut event = f
            .source
            .append("role", "role", root(RoleId::new()), metadata(Uuid::now_v7()))
            .unwrap();
        event.payload = json!({ "role_id": 7 });

        let err = f.projector.apply_event(&event).await.unwrap_err();
        assert!(matches!(
            err,
            ProjectorError::Projection {
                source: ProjectionError::InvalidPayload(_),
                ..
            }
        ));
    }

    #[tokio::test]
    #[should_panic(expected = "unknown event type RoleExploded")]
    async fn unknown_event_type_aborts() {
        let f = fixture();
        let mut event = f
            .source
            .append("role", "role", root(RoleId::new()), metadata(Uuid::now_v7()))
            .unwrap();
        event.event_type = "RoleExploded".into();
        let _ = f.projector.apply_event(&event).await;
    }

    #[tokio::test]
    async fn spawned_worker_picks_up_new_events_and_stops() {
        let f = fixture();
        let projector = Arc::new(f.projector.with_poll_interval(Duration::from_millis(10)));
        let handle = projector.spawn();

        f.source
            .append("role", "role", root(RoleId::new()), metadata(Uuid::now_v7()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(checkpoint(&f.store).await, 1);

        handle.shutdown().await;
    }
}
