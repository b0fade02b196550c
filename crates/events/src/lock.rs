//! Mutual exclusion over an opaque key.
//!
//! The lock is what guarantees a single active projector across a
//! multi-instance deployment. It is taken by the orchestrating process, not
//! by the projector itself.
//!
//! ## Handle lifecycle
//!
//! `acquire` returns a [`LockHandle`]; `release` consumes it. A handle can
//! therefore be released at most once, and there is no way to release a key
//! without having acquired it. Dropping a handle without releasing it frees
//! the key as well (backends log this).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock backend failure: {0}")]
    Backend(String),

    /// Internal lock poisoning.
    #[error("lock registry poisoned")]
    Poisoned,
}

/// Backend-specific state held while a key is locked.
#[async_trait]
pub trait LockGuard: Send {
    async fn release(self: Box<Self>) -> Result<(), LockError>;
}

/// Proof that a key is held by this process.
pub struct LockHandle {
    key: String,
    guard: Box<dyn LockGuard>,
}

impl LockHandle {
    pub fn new(key: impl Into<String>, guard: Box<dyn LockGuard>) -> Self {
        Self {
            key: key.into(),
            guard,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn release(self) -> Result<(), LockError> {
        tracing::debug!(lock_key = %self.key, "releasing lock");
        self.guard.release().await
    }
}

impl core::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockHandle").field("key", &self.key).finish()
    }
}

/// Distributed mutual exclusion.
///
/// `acquire` waits until the key is free.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    async fn acquire(&self, key: &str) -> Result<LockHandle, LockError>;
}

/// In-process keyed mutex registry for single-node deployments.
///
/// One mutex is created lazily per key; the registry map is guarded by its
/// own short-lived mutex, distinct from the per-key locks.
#[derive(Debug, Clone, Default)]
pub struct LocalLock {
    registry: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl LocalLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_mutex(&self, key: &str) -> Result<Arc<tokio::sync::Mutex<()>>, LockError> {
        let mut registry = self.registry.lock().map_err(|_| LockError::Poisoned)?;
        Ok(registry
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }
}

struct LocalGuard {
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl LockGuard for LocalGuard {
    async fn release(self: Box<Self>) -> Result<(), LockError> {
        Ok(())
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn acquire(&self, key: &str) -> Result<LockHandle, LockError> {
        let mutex = self.key_mutex(key)?;
        let guard = mutex.lock_owned().await;
        tracing::debug!(lock_key = %key, "acquired local lock");
        Ok(LockHandle::new(key, Box::new(LocalGuard { _guard: guard })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn second_acquire_waits_for_release() {
        let lock = LocalLock::new();
        let handle = lock.acquire("projector").await.unwrap();

        let contender = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire("projector").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        handle.release().await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender acquires after release")
            .unwrap()
            .unwrap();
        assert_eq!(second.key(), "projector");
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let lock = LocalLock::new();
        let _a = lock.acquire("a").await.unwrap();
        let b = tokio::time::timeout(Duration::from_millis(100), lock.acquire("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn dropping_a_handle_frees_the_key() {
        let lock = LocalLock::new();
        drop(lock.acquire("k").await.unwrap());
        let again = tokio::time::timeout(Duration::from_millis(100), lock.acquire("k")).await;
        assert!(again.is_ok());
    }
}
