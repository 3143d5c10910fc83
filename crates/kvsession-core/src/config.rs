//! Store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Default store address.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default store port.
pub const DEFAULT_PORT: u16 = 6380;

/// Session lifetime used when none is configured (30 minutes).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Connection pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Connections opened when the pool is created.
    pub min_size: usize,
    /// Upper bound on open connections.
    pub max_size: usize,
    /// Connections opened at once when the pool has to grow.
    pub increment: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_size: 5,
            max_size: 50,
            increment: 5,
        }
    }
}

/// Immutable configuration snapshot taken when a store is created.
///
/// Empty or zero fields are treated as unset; see [`Options::normalized`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Store address.
    pub host: String,
    /// Store port.
    pub port: u16,
    /// Optional credential sent with `AUTH`.
    pub password: Option<String>,
    /// Logical database selector.
    pub db_index: i64,
    /// Session lifetime, (de)serialized as whole seconds.
    #[serde(with = "duration_secs")]
    pub max_age: Duration,
    /// Connection pool sizing.
    pub pool: PoolOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            password: None,
            db_index: 0,
            max_age: DEFAULT_MAX_AGE,
            pool: PoolOptions::default(),
        }
    }
}

impl Options {
    /// Options pointing at the given address, everything else defaulted.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Set the credential.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the logical database.
    #[must_use]
    pub fn with_db_index(mut self, db_index: i64) -> Self {
        self.db_index = db_index;
        self
    }

    /// Set the session lifetime.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set the pool sizing.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    /// Fill unset fields with their defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.host.trim().is_empty() {
            self.host = DEFAULT_HOST.to_string();
        }
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.max_age.is_zero() {
            self.max_age = DEFAULT_MAX_AGE;
        }
        if self.password.as_deref().is_some_and(str::is_empty) {
            self.password = None;
        }
        self
    }

    /// Reject configurations no pool can satisfy, and max-ages the store
    /// cannot express in whole seconds.
    ///
    /// # Errors
    /// Returns [`SessionError::Configuration`] describing the first problem found.
    pub fn validate(&self) -> Result<(), SessionError> {
        let pool = &self.pool;
        if pool.max_size == 0 {
            return Err(SessionError::Configuration(
                "pool max_size must be at least 1".to_string(),
            ));
        }
        if pool.increment == 0 {
            return Err(SessionError::Configuration(
                "pool increment must be at least 1".to_string(),
            ));
        }
        if pool.min_size > pool.max_size {
            return Err(SessionError::Configuration(format!(
                "pool min_size {} exceeds max_size {}",
                pool.min_size, pool.max_size
            )));
        }
        if !self.max_age.is_zero() && self.max_age.as_secs() == 0 {
            return Err(SessionError::Configuration(format!(
                "max_age must be at least one second, got {:?}",
                self.max_age
            )));
        }
        if self.db_index < 0 {
            return Err(SessionError::Configuration(format!(
                "db_index must not be negative, got {}",
                self.db_index
            )));
        }
        Ok(())
    }

    /// `host:port` for diagnostics.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
