//! LISTEN/NOTIFY change signalling.
//!
//! [`PgChangeListener`] owns a `PgListener` on a background relay task. The
//! task multiplexes commands (listen, ping) with incoming notifications and
//! forwards notifications into an in-process queue, which keeps `recv`
//! cancel-safe. When the connection drops, `PgListener` reconnects and
//! re-issues its LISTENs; notifications sent while disconnected are lost, so
//! the relay emits one synthetic notification per channel after a reconnect
//! and waiters re-check.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use circlegraph_events::{Listener, Notification, Notifier, NotifyError};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

fn backend(err: sqlx::Error) -> NotifyError {
    NotifyError::Backend(err.to_string())
}

/// Publishes with `pg_notify`.
#[derive(Debug, Clone)]
pub struct PgNotifier {
    pool: PgPool,
}

impl PgNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn notify(&self, channel: &str, payload: &str) -> Result<(), NotifyError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        debug!(channel = %channel, "notified");
        Ok(())
    }

    async fn listener(&self) -> Result<Box<dyn Listener>, NotifyError> {
        Ok(Box::new(PgChangeListener::connect(&self.pool).await?))
    }
}

type Reply = oneshot::Sender<Result<(), NotifyError>>;

enum Command {
    Listen(String, Reply),
    Ping(Reply),
}

#[derive(Debug)]
pub struct PgChangeListener {
    commands: mpsc::Sender<Command>,
    notifications: mpsc::UnboundedReceiver<Notification>,
    relay: JoinHandle<()>,
}

impl PgChangeListener {
    pub async fn connect(pool: &PgPool) -> Result<Self, NotifyError> {
        let listener = PgListener::connect_with(pool).await.map_err(backend)?;
        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (notifications_tx, notifications_rx) = mpsc::unbounded_channel();
        let relay = tokio::spawn(relay(listener, commands_rx, notifications_tx));
        Ok(Self {
            commands: commands_tx,
            notifications: notifications_rx,
            relay,
        })
    }

    async fn call(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), NotifyError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| NotifyError::Closed)?;
        reply_rx.await.map_err(|_| NotifyError::Closed)?
    }
}

async fn relay(
    mut listener: PgListener,
    mut commands: mpsc::Receiver<Command>,
    notifications: mpsc::UnboundedSender<Notification>,
) {
    let mut channels: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                None => break,
                Some(Command::Listen(channel, reply)) => {
                    let result = listener.listen(&channel).await.map_err(backend);
                    if result.is_ok() && !channels.contains(&channel) {
                        debug!(channel = %channel, "listening");
                        channels.push(channel);
                    }
                    let _ = reply.send(result);
                }
                Some(Command::Ping(reply)) => {
                    let result = sqlx::query("SELECT 1")
                        .execute(&mut listener)
                        .await
                        .map(|_| ())
                        .map_err(backend);
                    let _ = reply.send(result);
                }
            },
            received = listener.try_recv() => match received {
                Ok(Some(n)) => {
                    let forwarded = notifications.send(Notification {
                        channel: n.channel().to_string(),
                        payload: n.payload().to_string(),
                    });
                    if forwarded.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    warn!(channels = channels.len(), "listen connection lost; reconnecting");
                    for channel in &channels {
                        let _ = notifications.send(Notification {
                            channel: channel.clone(),
                            payload: String::new(),
                        });
                    }
                }
                Err(err) => {
                    warn!(error = %err, "listen relay failed; backing off");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            },
        }
    }

    if let Err(err) = listener.unlisten_all().await {
        debug!(error = %err, "unlisten on close failed");
    }
}

#[async_trait]
impl Listener for PgChangeListener {
    async fn listen(&mut self, channel: &str) -> Result<(), NotifyError> {
        let channel = channel.to_string();
        self.call(|reply| Command::Listen(channel, reply)).await
    }

    async fn recv(&mut self) -> Option<Notification> {
        self.notifications.recv().await
    }

    async fn ping(&mut self) -> Result<(), NotifyError> {
        self.call(Command::Ping).await
    }

    async fn close(self: Box<Self>) -> Result<(), NotifyError> {
        let Self {
            commands,
            notifications,
            relay,
        } = *self;
        drop(commands);
        drop(notifications);
        relay
            .await
            .map_err(|e| NotifyError::Backend(format!("listen relay task failed: {e}")))
    }
}
