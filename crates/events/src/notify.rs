//! Signal-only publish/subscribe over named channels.
//!
//! Notifications tell a waiter that new state *may* be visible; they carry no
//! data the waiter relies on and may be missed. Waiters always re-check the
//! store after a notification (or after a timeout).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notify backend failure: {0}")]
    Backend(String),

    #[error("listener closed")]
    Closed,

    /// Internal lock poisoning.
    #[error("subscriber registry poisoned")]
    Poisoned,
}

/// Publishing side. Also hands out listeners on the same backend.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, payload: &str) -> Result<(), NotifyError>;

    async fn listener(&self) -> Result<Box<dyn Listener>, NotifyError>;
}

/// Subscribing side.
#[async_trait]
pub trait Listener: Send {
    /// Start receiving notifications published on `channel`.
    async fn listen(&mut self, channel: &str) -> Result<(), NotifyError>;

    /// Next notification on any listened channel; `None` once closed.
    ///
    /// Cancel-safe: no notification is lost if the future is dropped.
    async fn recv(&mut self) -> Option<Notification>;

    async fn ping(&mut self) -> Result<(), NotifyError>;

    async fn close(self: Box<Self>) -> Result<(), NotifyError>;
}

type Subscribers = HashMap<String, Vec<(u64, mpsc::UnboundedSender<Notification>)>>;

#[derive(Debug, Default)]
struct HubInner {
    subscribers: RwLock<Subscribers>,
    next_id: AtomicU64,
}

impl HubInner {
    fn unsubscribe(&self, id: u64) -> Result<(), NotifyError> {
        let mut subs = self.subscribers.write().map_err(|_| NotifyError::Poisoned)?;
        for list in subs.values_mut() {
            list.retain(|(sid, _)| *sid != id);
        }
        subs.retain(|_, list| !list.is_empty());
        Ok(())
    }
}

/// In-process fan-out hub.
///
/// - No IO
/// - Push delivery to every listener of the channel
/// - Closed listeners are removed from the registry
#[derive(Debug, Clone, Default)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local_listener(&self) -> LocalListener {
        let (tx, rx) = mpsc::unbounded_channel();
        LocalListener {
            hub: Arc::downgrade(&self.inner),
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            tx: Some(tx),
            rx,
        }
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .map(|subs| subs.get(channel).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait]
impl Notifier for LocalHub {
    async fn notify(&self, channel: &str, payload: &str) -> Result<(), NotifyError> {
        let mut subs = self
            .inner
            .subscribers
            .write()
            .map_err(|_| NotifyError::Poisoned)?;
        if let Some(list) = subs.get_mut(channel) {
            let notification = Notification {
                channel: channel.to_string(),
                payload: payload.to_string(),
            };
            // Drop any dead listeners while publishing.
            list.retain(|(_, tx)| tx.send(notification.clone()).is_ok());
        }
        Ok(())
    }

    async fn listener(&self) -> Result<Box<dyn Listener>, NotifyError> {
        Ok(Box::new(self.local_listener()))
    }
}

/// Listener on a [`LocalHub`].
///
/// Holds the hub weakly and gives its sender to the registry on the first
/// `listen`, so once every hub handle is dropped `recv` yields `None` and
/// `ping` fails.
#[derive(Debug)]
pub struct LocalListener {
    hub: Weak<HubInner>,
    id: u64,
    tx: Option<mpsc::UnboundedSender<Notification>>,
    rx: mpsc::UnboundedReceiver<Notification>,
}

#[async_trait]
impl Listener for LocalListener {
    async fn listen(&mut self, channel: &str) -> Result<(), NotifyError> {
        let hub = self.hub.upgrade().ok_or(NotifyError::Closed)?;
        let mut subs = hub.subscribers.write().map_err(|_| NotifyError::Poisoned)?;
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => subs
                .values()
                .flatten()
                .find(|(id, _)| *id == self.id)
                .map(|(_, tx)| tx.clone())
                .ok_or(NotifyError::Closed)?,
        };
        let list = subs.entry(channel.to_string()).or_default();
        if !list.iter().any(|(id, _)| *id == self.id) {
            list.push((self.id, tx));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    async fn ping(&mut self) -> Result<(), NotifyError> {
        match self.hub.upgrade() {
            Some(_) => Ok(()),
            None => Err(NotifyError::Closed),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), NotifyError> {
        match self.hub.upgrade() {
            Some(hub) => hub.unsubscribe(self.id),
            None => Ok(()),
        }
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            let _ = hub.unsubscribe(self.id);
        }
    }
}
