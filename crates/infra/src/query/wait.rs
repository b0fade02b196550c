//! Block until the timeline of a command group becomes visible.
//!
//! The waiter listens on the projector's change channel before it first
//! looks, so a commit between the lookup and the wait still wakes it. Change
//! notifications are best effort; a periodic re-check covers lost ones. The
//! overall deadline is fixed once up front and is independent of the
//! re-check cadence.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, warn};
use uuid::Uuid;

use circlegraph_core::Timeline;
use circlegraph_events::{Listener, Notifier, NotifyError};

use crate::graph::{GraphStore, StoreError};
use crate::workers::TIMELINE_CHANNEL;

pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timeline not visible after {0:?}")]
    Timeout(Duration),

    #[error("wait cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("notification error: {0}")]
    Notify(#[from] NotifyError),
}

#[derive(Clone)]
pub struct TimelineWaiter {
    store: Arc<dyn GraphStore>,
    notifier: Arc<dyn Notifier>,
    recheck: Duration,
}

impl TimelineWaiter {
    pub fn new(store: Arc<dyn GraphStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            recheck: DEFAULT_RECHECK_INTERVAL,
        }
    }

    pub fn with_recheck_interval(mut self, recheck: Duration) -> Self {
        self.recheck = recheck;
        self
    }

    /// Wait for the timeline produced by `group_id`.
    ///
    /// Returns as soon as it is visible, [`WaitError::Timeout`] once `timeout`
    /// has elapsed, or [`WaitError::Cancelled`] as soon as `cancel` completes.
    pub async fn wait_for_group(
        &self,
        group_id: Uuid,
        timeout: Duration,
        cancel: impl Future<Output = ()>,
    ) -> Result<Timeline, WaitError> {
        let deadline = Instant::now() + timeout;

        let mut listener = self.notifier.listener().await?;
        listener.listen(TIMELINE_CHANNEL).await?;

        let outcome = self
            .wait_loop(listener.as_mut(), group_id, deadline, timeout, cancel)
            .await;
        if let Err(err) = listener.close().await {
            debug!(error = %err, "closing wait listener failed");
        }
        outcome
    }

    async fn wait_loop(
        &self,
        listener: &mut dyn Listener,
        group_id: Uuid,
        deadline: Instant,
        timeout: Duration,
        cancel: impl Future<Output = ()>,
    ) -> Result<Timeline, WaitError> {
        tokio::pin!(cancel);
        let mut listening = true;

        loop {
            if let Some(timeline) = self.lookup(group_id).await? {
                debug!(%group_id, timeline = %timeline.number, "timeline visible");
                return Ok(timeline);
            }

            tokio::select! {
                biased;
                _ = &mut cancel => return Err(WaitError::Cancelled),
                _ = sleep_until(deadline) => return Err(WaitError::Timeout(timeout)),
                received = listener.recv(), if listening => {
                    if received.is_none() {
                        warn!(%group_id, "change listener closed; falling back to re-check");
                        listening = false;
                    }
                }
                _ = sleep(self.recheck) => {}
            }
        }
    }

    async fn lookup(&self, group_id: Uuid) -> Result<Option<Timeline>, StoreError> {
        let mut tx = self.store.begin_read().await?;
        let found = tx.timeline_for_group(group_id).await?;
        tx.rollback().await?;
        Ok(found)
    }
}
