//! Session-level advisory lock on a dedicated pooled connection.
//!
//! The connection is taken out of the pool for the lifetime of the lock;
//! Postgres releases session advisory locks when the session ends, so a
//! crashed holder never wedges the key.

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tracing::{debug, info, warn};

use circlegraph_events::{DistributedLock, LockError, LockGuard, LockHandle};

/// Stable 64-bit advisory key for `key` within `namespace`.
pub fn advisory_key(namespace: &str, key: &str) -> i64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"/");
    hasher.update(key.as_bytes());
    let hash = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    i64::from_le_bytes(bytes)
}

#[derive(Debug, Clone)]
pub struct PgAdvisoryLock {
    pool: PgPool,
    namespace: String,
}

impl PgAdvisoryLock {
    pub fn new(pool: PgPool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }
}

fn backend(err: sqlx::Error) -> LockError {
    LockError::Backend(err.to_string())
}

#[async_trait]
impl DistributedLock for PgAdvisoryLock {
    async fn acquire(&self, key: &str) -> Result<LockHandle, LockError> {
        let advisory = advisory_key(&self.namespace, key);
        let mut conn = self.pool.acquire().await.map_err(backend)?;

        debug!(lock_key = %key, advisory, "waiting for advisory lock");
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(advisory)
            .execute(&mut *conn)
            .await
            .map_err(backend)?;
        info!(lock_key = %key, namespace = %self.namespace, "advisory lock acquired");

        Ok(LockHandle::new(
            key,
            Box::new(PgLockGuard {
                key: key.to_string(),
                advisory,
                conn: Some(conn),
            }),
        ))
    }
}

struct PgLockGuard {
    key: String,
    advisory: i64,
    conn: Option<PoolConnection<Postgres>>,
}

#[async_trait]
impl LockGuard for PgLockGuard {
    /// # Panics
    ///
    /// Panics when Postgres reports that this session did not hold the lock.
    async fn release(self: Box<Self>) -> Result<(), LockError> {
        let mut guard = self;
        let Some(mut conn) = guard.conn.take() else {
            return Ok(());
        };
        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(guard.advisory)
            .fetch_one(&mut *conn)
            .await
            .map_err(backend)?;
        if !released {
            panic!(
                "advisory lock {} ({}) was not held by its session",
                guard.key, guard.advisory
            );
        }
        info!(lock_key = %guard.key, "advisory lock released");
        Ok(())
    }
}

impl Drop for PgLockGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // the lock lives as long as the session: close it instead of
            // returning a locked connection to the pool
            warn!(lock_key = %self.key, "advisory lock dropped without release; closing its session");
            drop(conn.detach());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_stable_and_namespaced() {
        assert_eq!(advisory_key("circlegraph", "projector"), advisory_key("circlegraph", "projector"));
        assert_ne!(advisory_key("circlegraph", "projector"), advisory_key("other", "projector"));
        assert_ne!(advisory_key("circlegraph", "projector"), advisory_key("circlegraph", "reader"));
    }
}
