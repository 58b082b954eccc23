//! slipway-lock — mutual exclusion over `(project, config)`.
//!
//! One release at a time may deploy a given project/config pair. The
//! lock is an object-store key whose body is the holder's release UUID,
//! taken with the store's native if-none-match conditional put. Taking
//! the lock again with the same UUID is an idempotent success, so a
//! re-driven state is safe.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use slipway_cloud::{CloudError, ObjectStore};

/// Result type alias for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock acquisition and release.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another release holds the lock. Never retried.
    #[error("lock already held by {holder}")]
    Exists { holder: String },

    #[error(transparent)]
    Store(#[from] CloudError),
}

/// Compare-and-swap lock manager over one bucket.
pub struct LockManager {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl LockManager {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Acquire the lock at `key` for `holder`.
    ///
    /// Succeeds iff the key is absent or already holds `holder`'s UUID.
    pub async fn acquire(&self, key: &str, holder: &str) -> LockResult<()> {
        let created = self
            .store
            .put_object_if_absent(&self.bucket, key, holder.as_bytes())
            .await?;

        if created {
            info!(%key, %holder, "lock acquired");
            return Ok(());
        }

        match self.holder(key).await? {
            Some(current) if current == holder => {
                debug!(%key, %holder, "lock already ours");
                Ok(())
            }
            Some(current) => Err(LockError::Exists { holder: current }),
            // The object vanished between the put and the read; the
            // conditional put decides, so try once more.
            None => {
                let created = self
                    .store
                    .put_object_if_absent(&self.bucket, key, holder.as_bytes())
                    .await?;
                if created {
                    info!(%key, %holder, "lock acquired");
                    Ok(())
                } else {
                    Err(LockError::Exists {
                        holder: "unknown".to_string(),
                    })
                }
            }
        }
    }

    /// Release the lock iff `holder` still owns it. Returns whether the
    /// lock object was deleted.
    pub async fn release(&self, key: &str, holder: &str) -> LockResult<bool> {
        match self.holder(key).await? {
            Some(current) if current == holder => {
                self.store.delete_object(&self.bucket, key).await?;
                info!(%key, %holder, "lock released");
                Ok(true)
            }
            Some(current) => {
                warn!(%key, %holder, %current, "lock held by someone else, leaving it");
                Ok(false)
            }
            None => {
                debug!(%key, "lock already gone");
                Ok(false)
            }
        }
    }

    /// Current holder UUID, if any.
    pub async fn holder(&self, key: &str) -> LockResult<Option<String>> {
        let body = self.store.get_object(&self.bucket, key).await?;
        Ok(body.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipway_cloud::MemoryStore;

    fn test_manager(store: &MemoryStore) -> LockManager {
        LockManager::new(Arc::new(store.clone()), "deploys")
    }

    #[tokio::test]
    async fn acquire_then_release() {
        let store = MemoryStore::new();
        let lock = test_manager(&store);

        lock.acquire("books/production/lock", "uuid-1").await.unwrap();
        assert_eq!(
            lock.holder("books/production/lock").await.unwrap(),
            Some("uuid-1".to_string())
        );

        assert!(lock.release("books/production/lock", "uuid-1").await.unwrap());
        assert_eq!(lock.holder("books/production/lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn acquire_is_idempotent_for_same_holder() {
        let store = MemoryStore::new();
        let lock = test_manager(&store);

        lock.acquire("books/production/lock", "uuid-1").await.unwrap();
        lock.acquire("books/production/lock", "uuid-1").await.unwrap();
    }

    #[tokio::test]
    async fn acquire_fails_for_different_holder() {
        let store = MemoryStore::new();
        let lock = test_manager(&store);

        lock.acquire("books/production/lock", "uuid-1").await.unwrap();
        let err = lock
            .acquire("books/production/lock", "uuid-2")
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Exists { holder } if holder == "uuid-1"));
    }

    #[tokio::test]
    async fn release_leaves_foreign_lock() {
        let store = MemoryStore::new();
        let lock = test_manager(&store);

        lock.acquire("books/production/lock", "uuid-1").await.unwrap();
        assert!(!lock.release("books/production/lock", "uuid-2").await.unwrap());
        assert_eq!(
            lock.holder("books/production/lock").await.unwrap(),
            Some("uuid-1".to_string())
        );
    }

    #[tokio::test]
    async fn release_of_missing_lock_is_noop() {
        let store = MemoryStore::new();
        let lock = test_manager(&store);
        assert!(!lock.release("books/production/lock", "uuid-1").await.unwrap());
    }

    #[tokio::test]
    async fn locks_are_scoped_by_key() {
        let store = MemoryStore::new();
        let lock = test_manager(&store);

        lock.acquire("books/production/lock", "uuid-1").await.unwrap();
        // A different (project, config) pair is unaffected.
        lock.acquire("books/staging/lock", "uuid-2").await.unwrap();
    }

    #[tokio::test]
    async fn store_errors_surface_as_lock_errors() {
        let store = MemoryStore::new();
        store.fail_times("put_object_if_absent", 1);
        let lock = test_manager(&store);

        let err = lock
            .acquire("books/production/lock", "uuid-1")
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::Store(_)));
    }
}
