//! Per-repository build lock.

use kiln_core::ports::CoordinationStore;
use kiln_core::{Error, Result, keys};
use std::time::Duration;
use tracing::{debug, warn};

/// A held `project::<repo>::build-lock`.
#[derive(Debug, Clone)]
pub struct BuildLock {
    key: String,
    token: String,
}

impl BuildLock {
    /// Write a fresh token and confirm by reading it back.
    ///
    /// Fails with [`Error::LockContention`] when another builder's token is
    /// present or replaced ours between the write and the read.
    pub async fn acquire(
        store: &dyn CoordinationStore,
        repository: &str,
        ttl: Duration,
    ) -> Result<Self> {
        let key = keys::build_lock(repository);
        let token = uuid::Uuid::new_v4().to_string();
        let contention = || Error::LockContention {
            repository: repository.to_string(),
        };

        if !store.set_if_absent(&key, token.as_bytes(), Some(ttl)).await? {
            return Err(contention());
        }

        match store.get(&key).await? {
            Some(current) if current == token.as_bytes() => {
                debug!(repository = %repository, "Build lock acquired");
                Ok(Self { key, token })
            }
            _ => Err(contention()),
        }
    }

    /// Delete the lock if it still carries our token.
    pub async fn release(&self, store: &dyn CoordinationStore) -> Result<bool> {
        match store.get(&self.key).await? {
            Some(current) if current == self.token.as_bytes() => {
                store.delete(&self.key).await?;
                Ok(true)
            }
            _ => {
                warn!(key = %self.key, "Build lock expired or taken over before release");
                Ok(false)
            }
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_store::MemoryStore;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(1800);

    #[tokio::test]
    async fn test_concurrent_acquire_admits_exactly_one() {
        let store = Arc::new(MemoryStore::new());
        let attempts: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { BuildLock::acquire(&*store, "example.org/a/b", TTL).await })
            })
            .collect();

        let mut acquired = 0;
        let mut contended = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => acquired += 1,
                Err(Error::LockContention { .. }) => contended += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!((acquired, contended), (1, 1));
    }

    #[tokio::test]
    async fn test_release_only_removes_own_token() {
        let store = MemoryStore::new();
        let lock = BuildLock::acquire(&store, "r", TTL).await.unwrap();

        store.set(&keys::build_lock("r"), b"someone-else", None).await.unwrap();
        assert!(!lock.release(&store).await.unwrap());
        assert!(store.get(&keys::build_lock("r")).await.unwrap().is_some());

        store.set(&keys::build_lock("r"), lock.token().as_bytes(), None).await.unwrap();
        assert!(lock.release(&store).await.unwrap());
        assert!(store.get(&keys::build_lock("r")).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_can_be_retaken() {
        let store = MemoryStore::new();
        let _stale = BuildLock::acquire(&store, "r", TTL).await.unwrap();
        assert!(BuildLock::acquire(&store, "r", TTL).await.is_err());

        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        assert!(BuildLock::acquire(&store, "r", TTL).await.is_ok());
    }
}
