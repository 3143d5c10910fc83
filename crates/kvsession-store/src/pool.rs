//! Bounded connection pool with on-demand growth, built on `deadpool`.

use std::time::Duration;

use deadpool::{
    Runtime,
    managed::{self, Metrics, Object, Pool, PoolError, RecycleError, RecycleResult, Timeouts},
};
use kvsession_core::{Connector, PoolOptions, StoreConnection, StoreError};

/// `deadpool` manager opening connections through a [`Connector`].
///
/// Broken connections are rejected on recycle, so the pool replaces them
/// on the next borrow.
pub struct ConnectorManager<C: Connector> {
    connector: C,
}

impl<C: Connector> managed::Manager for ConnectorManager<C> {
    type Type = C::Connection;
    type Error = StoreError;

    async fn create(&self) -> Result<C::Connection, StoreError> {
        self.connector.connect().await
    }

    async fn recycle(&self, conn: &mut C::Connection, _: &Metrics) -> RecycleResult<StoreError> {
        if conn.is_broken() {
            tracing::warn!("discarding broken store connection");
            return Err(RecycleError::Message("connection is broken".into()));
        }
        Ok(())
    }
}

/// A borrowed connection. It returns to the pool when dropped.
pub type PooledConnection<C> = Object<ConnectorManager<C>>;

/// Pool of store connections.
///
/// At most `max_size` connections are open at once; further borrowers
/// wait. When a borrow finds no idle connection the pool opens up to
/// `increment - 1` spares alongside it, without waiting for busy slots.
pub struct ConnectionPool<C: Connector> {
    inner: Pool<ConnectorManager<C>>,
    options: PoolOptions,
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections currently open, idle or borrowed.
    pub open: usize,
    /// Connections waiting in the pool.
    pub idle: usize,
    /// Upper bound on open connections.
    pub max_size: usize,
}

impl<C: Connector> ConnectionPool<C> {
    /// Create the pool and open `min_size` connections up front.
    ///
    /// # Errors
    /// Returns the first connection failure.
    pub async fn new(connector: C, options: PoolOptions) -> Result<Self, StoreError> {
        let inner = Pool::builder(ConnectorManager { connector })
            .max_size(options.max_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let pool = Self { inner, options };

        // Hold every warm connection so each borrow opens a new one.
        let mut warm = Vec::with_capacity(options.min_size);
        for _ in 0..options.min_size {
            warm.push(pool.get().await?);
        }
        tracing::debug!(
            open = warm.len(),
            max_size = options.max_size,
            "connection pool ready"
        );
        drop(warm);

        Ok(pool)
    }

    /// Borrow a connection.
    ///
    /// # Errors
    /// Returns error if the pool is closed or a new connection cannot be opened.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, StoreError> {
        let before = self.inner.status();
        let conn = self.get().await?;
        if before.available == 0 && before.size < before.max_size {
            self.open_spares().await;
        }
        Ok(conn)
    }

    /// Current counters.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let status = self.inner.status();
        PoolStatus {
            open: status.size,
            idle: status.available,
            max_size: status.max_size,
        }
    }

    /// Refuse new borrows and drop idle connections.
    ///
    /// Borrowed connections are dropped as they come back.
    pub fn close(&self) {
        self.inner.close();
    }

    async fn get(&self) -> Result<PooledConnection<C>, StoreError> {
        self.inner.get().await.map_err(into_store_error)
    }

    async fn open_spares(&self) {
        let mut no_wait = Timeouts::default();
        no_wait.wait = Some(Duration::ZERO);

        let wanted = self.options.increment.saturating_sub(1);
        let mut spares = Vec::with_capacity(wanted);
        for _ in 0..wanted {
            match self.inner.timeout_get(&no_wait).await {
                Ok(conn) => spares.push(conn),
                Err(PoolError::Timeout(_)) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "stopped opening spare connections");
                    break;
                }
            }
        }
        tracing::debug!(
            spares = spares.len(),
            open = self.inner.status().size,
            "connection pool grew"
        );
    }
}

fn into_store_error(error: PoolError<StoreError>) -> StoreError {
    match error {
        PoolError::Backend(e) => e,
        PoolError::Closed => StoreError::PoolClosed,
        PoolError::Timeout(_) => {
            StoreError::Connection("timed out waiting for a connection".to_string())
        }
        other => StoreError::Internal(other.to_string()),
    }
}
