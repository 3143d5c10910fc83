//! Redis-protocol store backend (feature-gated).
//!
//! Works against any server speaking the Redis protocol with hash commands,
//! including Redis, Valkey and SSDB.

use async_trait::async_trait;
use kvsession_core::{Connector, Options, StoreConnection, StoreError};
use ::redis::{
    Client, Cmd, ConnectionAddr, FromRedisValue, IntoConnectionInfo, RedisConnectionInfo,
    aio::MultiplexedConnection,
};

/// Opens authenticated connections to a Redis-protocol server.
///
/// The password and database index travel in the connection info, so the
/// client authenticates and selects the database during its handshake.
pub struct RedisConnector {
    client: Client,
}

impl RedisConnector {
    /// Create a connector from store options.
    ///
    /// No connection is opened until the pool asks for one.
    ///
    /// # Errors
    /// Returns error if the address cannot be turned into connection info.
    pub fn new(options: &Options) -> Result<Self, StoreError> {
        let mut settings = RedisConnectionInfo::default().set_db(options.db_index);
        if let Some(password) = &options.password {
            settings = settings.set_password(password);
        }
        let info = ConnectionAddr::Tcp(options.host.clone(), options.port)
            .into_connection_info()
            .map(|info| info.set_redis_settings(settings));

        let client = info.and_then(Client::open).map_err(|e| {
            StoreError::Connection(format!("invalid store address {}: {e}", options.address()))
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Connector for RedisConnector {
    type Connection = RedisConnection;

    async fn connect(&self) -> Result<RedisConnection, StoreError> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(RedisConnection {
            conn,
            broken: false,
        })
    }
}

/// One multiplexed connection to a Redis-protocol server.
pub struct RedisConnection {
    conn: MultiplexedConnection,
    broken: bool,
}

impl RedisConnection {
    async fn query<T>(&mut self, command: &'static str, cmd: Cmd) -> Result<T, StoreError>
    where
        T: FromRedisValue + Send,
    {
        let result: ::redis::RedisResult<T> = cmd.query_async(&mut self.conn).await;
        result.map_err(|e| {
            if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
                self.broken = true;
            }
            StoreError::Command {
                command,
                message: e.to_string(),
            }
        })
    }

    async fn count(&mut self, command: &'static str, cmd: Cmd) -> Result<bool, StoreError> {
        self.query::<i64>(command, cmd).await.map(|n| n > 0)
    }
}

#[async_trait]
impl StoreConnection for RedisConnection {
    async fn hget(&mut self, key: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut cmd = ::redis::cmd("HGET");
        cmd.arg(key).arg(field);
        self.query("HGET", cmd).await
    }

    async fn hset(&mut self, key: &str, field: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut cmd = ::redis::cmd("HSET");
        cmd.arg(key).arg(field).arg(value);
        self.query::<()>("HSET", cmd).await
    }

    async fn hdel(&mut self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut cmd = ::redis::cmd("HDEL");
        cmd.arg(key).arg(field);
        self.count("HDEL", cmd).await
    }

    async fn del(&mut self, key: &str) -> Result<bool, StoreError> {
        let mut cmd = ::redis::cmd("DEL");
        cmd.arg(key);
        self.count("DEL", cmd).await
    }

    async fn exists(&mut self, key: &str) -> Result<bool, StoreError> {
        let mut cmd = ::redis::cmd("EXISTS");
        cmd.arg(key);
        self.count("EXISTS", cmd).await
    }

    async fn expire(&mut self, key: &str, seconds: u64) -> Result<bool, StoreError> {
        let mut cmd = ::redis::cmd("EXPIRE");
        cmd.arg(key).arg(seconds);
        self.count("EXPIRE", cmd).await
    }

    async fn ping(&mut self) -> Result<bool, StoreError> {
        // Servers differ in the reply text; any reply counts.
        self.query::<::redis::Value>("PING", ::redis::cmd("PING"))
            .await
            .map(|_| true)
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_travel_in_connection_info() {
        let options = Options::new("10.0.0.7", 8888)
            .with_password("secret")
            .with_db_index(3);
        let connector = RedisConnector::new(&options).unwrap();

        let info = connector.client.get_connection_info();
        assert!(matches!(info.addr(), ConnectionAddr::Tcp(host, 8888) if host == "10.0.0.7"));
        assert_eq!(info.redis_settings().db(), 3);
        assert_eq!(info.redis_settings().password(), Some("secret"));
    }

    #[test]
    fn test_no_password_by_default() {
        let connector = RedisConnector::new(&Options::default()).unwrap();

        let settings = connector.client.get_connection_info().redis_settings();
        assert_eq!(settings.db(), 0);
        assert_eq!(settings.password(), None);
    }
}
