//! Session-field operations against the remote store.

use std::{
    sync::{PoisonError, RwLock},
    time::Duration,
};

use kvsession_core::{Connector, SessionId, StoreConnection, StoreError};

use crate::pool::ConnectionPool;

/// Maps `(session id, key)` onto fields of a remote hash record.
///
/// Every successful write, and every read that finds a value, pushes the
/// record's expiry back to the configured max-age. Each call borrows one
/// pooled connection and returns it before completing.
pub struct RecordAccessor<C: Connector> {
    pool: ConnectionPool<C>,
    max_age: RwLock<Duration>,
}

impl<C: Connector> RecordAccessor<C> {
    /// Create an accessor over a pool.
    #[must_use]
    pub fn new(pool: ConnectionPool<C>, max_age: Duration) -> Self {
        Self {
            pool,
            max_age: RwLock::new(max_age),
        }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// Lifetime applied on refresh.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        *self.max_age.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change the lifetime applied on subsequent refreshes.
    pub fn set_max_age(&self, max_age: Duration) {
        *self.max_age.write().unwrap_or_else(PoisonError::into_inner) = max_age;
    }

    // Sub-second remainders are dropped.
    fn max_age_secs(&self) -> u64 {
        self.max_age().as_secs()
    }

    /// Write a field, then refresh the record's expiry.
    ///
    /// # Errors
    /// Returns error if the borrow, the write or the refresh fails.
    pub async fn set_field(&self, id: &SessionId, key: &str, blob: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        conn.hset(id.as_str(), key, blob).await?;
        conn.expire(id.as_str(), self.max_age_secs()).await?;
        tracing::debug!(session_id = %id, key, bytes = blob.len(), "stored session field");
        Ok(())
    }

    /// Read a field, refreshing the record's expiry when it holds a value.
    ///
    /// Absent and empty fields are `Ok(None)`.
    ///
    /// # Errors
    /// Returns error if the borrow, the read or the refresh fails.
    pub async fn get_field(&self, id: &SessionId, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let Some(blob) = conn.hget(id.as_str(), key).await? else {
            return Ok(None);
        };
        if blob.is_empty() {
            return Ok(None);
        }
        conn.expire(id.as_str(), self.max_age_secs()).await?;
        Ok(Some(blob))
    }

    /// Remove a field. Returns whether it existed.
    ///
    /// # Errors
    /// Returns error if the borrow or the command fails.
    pub async fn delete_field(&self, id: &SessionId, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        conn.hdel(id.as_str(), key).await
    }

    /// Remove the whole record. Returns whether it existed.
    ///
    /// # Errors
    /// Returns error if the borrow or the command fails.
    pub async fn delete_record(&self, id: &SessionId) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        conn.del(id.as_str()).await
    }

    /// Whether the record exists.
    ///
    /// # Errors
    /// Returns error if the borrow or the command fails.
    pub async fn record_exists(&self, id: &SessionId) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        conn.exists(id.as_str()).await
    }

    /// Set the record's remaining lifetime unconditionally.
    ///
    /// # Errors
    /// Returns error if the borrow or the command fails.
    pub async fn set_record_expiry(&self, id: &SessionId, seconds: u64) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        conn.expire(id.as_str(), seconds).await
    }

    /// Round trip on a freshly borrowed connection.
    ///
    /// # Errors
    /// Returns [`StoreError::PingFailed`] if the server answers negatively.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        if conn.ping().await? {
            Ok(())
        } else {
            Err(StoreError::PingFailed)
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use std::sync::Arc;

    use kvsession_core::PoolOptions;

    use super::*;
    use crate::backend::{MemoryBackend, MemoryConnector};

    async fn accessor(backend: &Arc<MemoryBackend>, max_age: Duration) -> RecordAccessor<MemoryConnector> {
        let pool = ConnectionPool::new(
            MemoryConnector::new(Arc::clone(backend)),
            PoolOptions {
                min_size: 1,
                max_size: 2,
                increment: 1,
            },
        )
        .await
        .unwrap();
        RecordAccessor::new(pool, max_age)
    }

    #[tokio::test]
    async fn test_set_field_applies_max_age() {
        let backend = Arc::new(MemoryBackend::new());
        let accessor = accessor(&backend, Duration::from_millis(90_900)).await;
        let id = SessionId::from("s1");

        accessor.set_field(&id, "k", b"blob").await.unwrap();

        let ttl = backend.ttl("s1").unwrap();
        assert!(ttl > Duration::from_secs(89) && ttl <= Duration::from_secs(90));
        assert_eq!(accessor.pool().status().idle, 1);
    }

    #[tokio::test]
    async fn test_get_field_refreshes_expiry() {
        let backend = Arc::new(MemoryBackend::new());
        let accessor = accessor(&backend, Duration::from_secs(600)).await;
        let id = SessionId::from("s1");

        accessor.set_field(&id, "k", b"blob").await.unwrap();
        assert!(accessor.set_record_expiry(&id, 5).await.unwrap());
        assert!(backend.ttl("s1").unwrap() <= Duration::from_secs(5));

        let blob = accessor.get_field(&id, "k").await.unwrap();
        assert_eq!(blob.as_deref(), Some(&b"blob"[..]));
        assert!(backend.ttl("s1").unwrap() > Duration::from_secs(599));
    }

    #[tokio::test]
    async fn test_get_field_miss_leaves_expiry() {
        let backend = Arc::new(MemoryBackend::new());
        let accessor = accessor(&backend, Duration::from_secs(600)).await;
        let id = SessionId::from("s1");

        accessor.set_field(&id, "k", b"blob").await.unwrap();
        accessor.set_record_expiry(&id, 5).await.unwrap();

        assert_eq!(accessor.get_field(&id, "other").await.unwrap(), None);
        assert!(backend.ttl("s1").unwrap() <= Duration::from_secs(5));
        assert_eq!(accessor.get_field(&SessionId::from("nope"), "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_value_is_absent() {
        let backend = Arc::new(MemoryBackend::new());
        let accessor = accessor(&backend, Duration::from_secs(60)).await;
        let id = SessionId::from("s1");

        accessor.set_field(&id, "k", b"").await.unwrap();
        assert_eq!(accessor.get_field(&id, "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_max_age_update_applies_to_next_write() {
        let backend = Arc::new(MemoryBackend::new());
        let accessor = accessor(&backend, Duration::from_secs(60)).await;
        let id = SessionId::from("s1");

        accessor.set_max_age(Duration::from_secs(3600));
        assert_eq!(accessor.max_age(), Duration::from_secs(3600));
        accessor.set_field(&id, "k", b"1").await.unwrap();
        assert!(backend.ttl("s1").unwrap() > Duration::from_secs(3599));
    }

    #[tokio::test]
    async fn test_failures_release_connection() {
        let backend = Arc::new(MemoryBackend::new());
        let accessor = accessor(&backend, Duration::from_secs(60)).await;
        let id = SessionId::from("s1");

        backend.set_unavailable(true);
        assert!(accessor.set_field(&id, "k", b"1").await.is_err());
        assert!(accessor.get_field(&id, "k").await.is_err());
        assert!(accessor.ping().await.is_err());

        backend.set_unavailable(false);
        accessor.ping().await.unwrap();
        accessor.set_field(&id, "k", b"1").await.unwrap();
        assert!(accessor.record_exists(&id).await.unwrap());
        assert!(accessor.delete_field(&id, "k").await.unwrap());
        assert!(!accessor.delete_record(&id).await.unwrap());
    }
}
