//! Core traits for the remote store client and the session store facade.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    codec::{Decoded, SessionValue},
    error::{SessionError, StoreError},
};

/// Opaque, caller-assigned session identifier.
///
/// Also used verbatim as the record key in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One connection to the remote key-value store.
///
/// Records are hash-like structures: a record key maps to named fields.
#[async_trait]
pub trait StoreConnection: Send {
    /// Read a field; `None` when the record or the field is absent.
    async fn hget(&mut self, key: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a field, creating the record if needed.
    async fn hset(&mut self, key: &str, field: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a field. Returns whether a field was removed.
    async fn hdel(&mut self, key: &str, field: &str) -> Result<bool, StoreError>;

    /// Remove a whole record. Returns whether a record was removed.
    async fn del(&mut self, key: &str) -> Result<bool, StoreError>;

    /// Whether the record exists.
    async fn exists(&mut self, key: &str) -> Result<bool, StoreError>;

    /// Set the record's remaining lifetime. Returns whether the record exists.
    async fn expire(&mut self, key: &str, seconds: u64) -> Result<bool, StoreError>;

    /// Lightweight round trip.
    async fn ping(&mut self) -> Result<bool, StoreError>;

    /// Whether the connection saw a transport failure and should not be reused.
    fn is_broken(&self) -> bool {
        false
    }
}

/// Opens connections to the remote store.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced.
    type Connection: StoreConnection + 'static;

    /// Open a fresh connection.
    async fn connect(&self) -> Result<Self::Connection, StoreError>;
}

/// Session store contract consumed by the session lifecycle framework.
///
/// Only `set` and `health_check` report failures; every other operation logs
/// and degrades to a safe default so store outages never abort a request.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store `value` under `key` and refresh the record's lifetime.
    async fn set<T: SessionValue>(
        &self,
        id: &SessionId,
        key: &str,
        value: &T,
    ) -> Result<(), SessionError>;

    /// Read `key`, refreshing the record's lifetime on a hit.
    ///
    /// Missing, unreachable and undecodable values all come back as `None`.
    async fn get(&self, id: &SessionId, key: &str) -> Option<Decoded>;

    /// Remove one field.
    async fn delete(&self, id: &SessionId, key: &str) -> bool;

    /// Remove the whole record.
    async fn clear(&self, id: &SessionId) -> bool;

    /// Creation hook. Records are created by their first write, so this always succeeds.
    async fn add(&self, id: &SessionId) -> bool;

    /// Whether the record exists.
    async fn exists(&self, id: &SessionId) -> bool;

    /// Change the lifetime applied by subsequent writes and reads.
    ///
    /// Lifetimes shorter than one second are ignored.
    fn set_max_age(&self, max_age: Duration);

    /// Change one existing record's remaining lifetime.
    ///
    /// Lifetimes shorter than one second are ignored.
    async fn set_id_max_age(&self, id: &SessionId, max_age: Duration);

    /// Round trip to the remote store.
    async fn health_check(&self) -> Result<(), SessionError>;
}
