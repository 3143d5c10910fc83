//! Session store facade.

use std::time::Duration;

use async_trait::async_trait;
use kvsession_core::{
    Connector, Decoded, Options, SessionError, SessionId, SessionStore, SessionValue, ValueCodec,
};

use crate::{
    accessor::RecordAccessor,
    pool::{ConnectionPool, PoolStatus},
};

/// Session store backed by a key-value server.
///
/// Each session is one hash record keyed by the session id; each session
/// key is one field holding a codec blob. Reads and writes keep the record
/// alive for the configured max-age.
pub struct KvSessionStore<C: Connector> {
    options: Options,
    accessor: RecordAccessor<C>,
    codec: ValueCodec,
}

impl<C: Connector> KvSessionStore<C> {
    /// Create a store over the given connector.
    ///
    /// Unset options are defaulted and the pool is warmed up before the
    /// store is returned.
    ///
    /// # Errors
    /// Returns [`SessionError::Configuration`] for invalid options or an
    /// unreachable store.
    pub async fn with_connector(connector: C, options: Options) -> Result<Self, SessionError> {
        let options = options.normalized();
        options.validate()?;

        let pool = ConnectionPool::new(connector, options.pool)
            .await
            .map_err(|e| {
                SessionError::Configuration(format!(
                    "cannot reach store at {}: {e}",
                    options.address()
                ))
            })?;
        tracing::info!(
            address = %options.address(),
            db_index = options.db_index,
            max_age_secs = options.max_age.as_secs(),
            "session store ready"
        );

        Ok(Self {
            accessor: RecordAccessor::new(pool, options.max_age),
            codec: ValueCodec::new(),
            options,
        })
    }

    /// Use a different codec, e.g. one with its own registry.
    #[must_use]
    pub fn with_codec(mut self, codec: ValueCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Options as they were when the store was created.
    #[must_use]
    pub const fn options(&self) -> &Options {
        &self.options
    }

    /// Max-age currently applied to records.
    #[must_use]
    pub fn max_age(&self) -> Duration {
        self.accessor.max_age()
    }

    /// The codec in use.
    #[must_use]
    pub const fn codec(&self) -> &ValueCodec {
        &self.codec
    }

    /// Connection pool counters.
    #[must_use]
    pub fn pool_status(&self) -> PoolStatus {
        self.accessor.pool().status()
    }

    /// Stop handing out connections.
    pub fn close(&self) {
        self.accessor.pool().close();
    }
}

#[cfg(feature = "redis")]
impl KvSessionStore<crate::backend::RedisConnector> {
    /// Connect to a Redis-protocol server.
    ///
    /// # Errors
    /// Returns [`SessionError::Configuration`] for invalid options or an
    /// unreachable server.
    pub async fn connect(options: Options) -> Result<Self, SessionError> {
        let options = options.normalized();
        let connector = crate::backend::RedisConnector::new(&options)
            .map_err(|e| SessionError::Configuration(e.to_string()))?;
        Self::with_connector(connector, options).await
    }
}

#[async_trait]
impl<C: Connector> SessionStore for KvSessionStore<C> {
    async fn set<T: SessionValue>(
        &self,
        id: &SessionId,
        key: &str,
        value: &T,
    ) -> Result<(), SessionError> {
        let blob = self.codec.encode(value)?;
        self.accessor.set_field(id, key, &blob).await?;
        Ok(())
    }

    async fn get(&self, id: &SessionId, key: &str) -> Option<Decoded> {
        let blob = match self.accessor.get_field(id, key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(session_id = %id, key, error = %e, "session field read failed");
                return None;
            }
        };

        match self.codec.decode(&blob) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(
                    session_id = %id,
                    key,
                    error = %e,
                    blob = %String::from_utf8_lossy(&blob),
                    "session field decode failed"
                );
                None
            }
        }
    }

    async fn delete(&self, id: &SessionId, key: &str) -> bool {
        self.accessor
            .delete_field(id, key)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(session_id = %id, key, error = %e, "session field delete failed");
                false
            })
    }

    async fn clear(&self, id: &SessionId) -> bool {
        self.accessor.delete_record(id).await.unwrap_or_else(|e| {
            tracing::error!(session_id = %id, error = %e, "session clear failed");
            false
        })
    }

    async fn add(&self, _id: &SessionId) -> bool {
        true
    }

    async fn exists(&self, id: &SessionId) -> bool {
        self.accessor.record_exists(id).await.unwrap_or_else(|e| {
            tracing::error!(session_id = %id, error = %e, "session exists check failed");
            false
        })
    }

    fn set_max_age(&self, max_age: Duration) {
        // EXPIRE takes whole seconds and 0 deletes the record.
        if max_age.as_secs() == 0 {
            tracing::warn!(?max_age, "ignoring max-age shorter than one second");
            return;
        }
        self.accessor.set_max_age(max_age);
    }

    async fn set_id_max_age(&self, id: &SessionId, max_age: Duration) {
        if max_age.as_secs() == 0 {
            tracing::warn!(session_id = %id, ?max_age, "ignoring max-age shorter than one second");
            return;
        }
        if !self.exists(id).await {
            return;
        }
        if let Err(e) = self.accessor.set_record_expiry(id, max_age.as_secs()).await {
            tracing::error!(session_id = %id, error = %e, "session expiry update failed");
        }
    }

    async fn health_check(&self) -> Result<(), SessionError> {
        self.accessor.ping().await?;
        Ok(())
    }
}
