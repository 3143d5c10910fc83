//! In-memory store backend.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use kvsession_core::{Connector, StoreConnection, StoreError};

#[derive(Debug, Default)]
struct Record {
    fields: HashMap<String, Vec<u8>>,
    expires_at: Option<Instant>,
}

impl Record {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory stand-in for the remote store.
///
/// Useful for development and tests. Records expire lazily the way the
/// remote server expires them, and outages can be simulated with
/// [`MemoryBackend::set_unavailable`]. Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<String, Record>>,
    unavailable: AtomicBool,
    connections_opened: AtomicUsize,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every connect and command fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Remaining lifetime of a record, `None` if it is missing or never expires.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let records = self.records.read().ok()?;
        let record = records.get(key).filter(|r| !r.is_expired(now))?;
        record.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.records
            .read()
            .map(|records| records.values().filter(|r| !r.is_expired(now)).count())
            .unwrap_or(0)
    }

    /// Whether no live records exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total connections ever opened against this backend.
    #[must_use]
    pub fn connections_opened(&self) -> usize {
        self.connections_opened.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Connection("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn with_records<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Record>, Instant) -> T,
    ) -> Result<T, StoreError> {
        self.check_available()?;
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(f(&mut records, Instant::now()))
    }
}

fn live<'a>(
    records: &'a mut HashMap<String, Record>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Record> {
    if records.get(key).is_some_and(|r| r.is_expired(now)) {
        records.remove(key);
    }
    records.get_mut(key)
}

/// Opens connections to a shared [`MemoryBackend`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    backend: Arc<MemoryBackend>,
}

impl MemoryConnector {
    /// Create a connector for the given backend.
    #[must_use]
    pub fn new(backend: Arc<MemoryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, StoreError> {
        self.backend.check_available()?;
        self.backend
            .connections_opened
            .fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            backend: Arc::clone(&self.backend),
            broken: false,
        })
    }
}

/// Connection to a [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryConnection {
    backend: Arc<MemoryBackend>,
    broken: bool,
}

impl MemoryConnection {
    fn run<T>(
        &mut self,
        f: impl FnOnce(&mut HashMap<String, Record>, Instant) -> T,
    ) -> Result<T, StoreError> {
        let result = self.backend.with_records(f);
        if matches!(result, Err(StoreError::Connection(_))) {
            self.broken = true;
        }
        result
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn hget(&mut self, key: &str, field: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.run(|records, now| {
            live(records, key, now).and_then(|record| record.fields.get(field).cloned())
        })
    }

    async fn hset(&mut self, key: &str, field: &str, value: &[u8]) -> Result<(), StoreError> {
        self.run(|records, now| {
            live(records, key, now);
            records
                .entry(key.to_string())
                .or_default()
                .fields
                .insert(field.to_string(), value.to_vec());
        })
    }

    async fn hdel(&mut self, key: &str, field: &str) -> Result<bool, StoreError> {
        self.run(|records, now| {
            let Some(record) = live(records, key, now) else {
                return false;
            };
            let removed = record.fields.remove(field).is_some();
            // Empty hashes disappear, as they do on the server.
            if record.fields.is_empty() {
                records.remove(key);
            }
            removed
        })
    }

    async fn del(&mut self, key: &str) -> Result<bool, StoreError> {
        self.run(|records, now| {
            live(records, key, now);
            records.remove(key).is_some()
        })
    }

    async fn exists(&mut self, key: &str) -> Result<bool, StoreError> {
        self.run(|records, now| live(records, key, now).is_some())
    }

    async fn expire(&mut self, key: &str, seconds: u64) -> Result<bool, StoreError> {
        self.run(|records, now| {
            if live(records, key, now).is_none() {
                return false;
            }
            if seconds == 0 {
                records.remove(key);
            } else if let Some(record) = records.get_mut(key) {
                record.expires_at = Some(now + Duration::from_secs(seconds));
            }
            true
        })
    }

    async fn ping(&mut self) -> Result<bool, StoreError> {
        self.run(|_, _| true)
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(backend: &Arc<MemoryBackend>) -> MemoryConnection {
        MemoryConnector::new(Arc::clone(backend))
            .connect()
            .await
            .unwrap()
    }

    #[test]
    fn test_hash_operations() {
        tokio_test::block_on(async {
            let backend = Arc::new(MemoryBackend::new());
            let mut conn = connect(&backend).await;

            assert_eq!(conn.hget("s1", "a").await.unwrap(), None);
            conn.hset("s1", "a", b"1").await.unwrap();
            conn.hset("s1", "b", b"2").await.unwrap();
            assert_eq!(conn.hget("s1", "a").await.unwrap(), Some(b"1".to_vec()));
            assert!(conn.exists("s1").await.unwrap());

            assert!(conn.hdel("s1", "a").await.unwrap());
            assert!(!conn.hdel("s1", "a").await.unwrap());
            assert!(conn.exists("s1").await.unwrap());

            assert!(conn.hdel("s1", "b").await.unwrap());
            assert!(!conn.exists("s1").await.unwrap());
            assert!(backend.is_empty());
        });
    }

    #[test]
    fn test_del_reports_removal() {
        tokio_test::block_on(async {
            let backend = Arc::new(MemoryBackend::new());
            let mut conn = connect(&backend).await;

            conn.hset("s1", "a", b"1").await.unwrap();
            assert!(conn.del("s1").await.unwrap());
            assert!(!conn.del("s1").await.unwrap());
            assert!(!conn.del("never").await.unwrap());
        });
    }

    #[test]
    fn test_expire_sets_ttl() {
        tokio_test::block_on(async {
            let backend = Arc::new(MemoryBackend::new());
            let mut conn = connect(&backend).await;

            assert!(!conn.expire("s1", 60).await.unwrap());
            conn.hset("s1", "a", b"1").await.unwrap();
            assert_eq!(backend.ttl("s1"), None);

            assert!(conn.expire("s1", 60).await.unwrap());
            let ttl = backend.ttl("s1").unwrap();
            assert!(ttl > Duration::from_secs(59) && ttl <= Duration::from_secs(60));

            // Writing a field keeps the record's expiry.
            conn.hset("s1", "b", b"2").await.unwrap();
            assert!(backend.ttl("s1").is_some());

            assert!(conn.expire("s1", 0).await.unwrap());
            assert!(!conn.exists("s1").await.unwrap());
        });
    }

    #[test]
    fn test_expired_records_vanish() {
        tokio_test::block_on(async {
            let backend = Arc::new(MemoryBackend::new());
            let mut conn = connect(&backend).await;

            conn.hset("s1", "a", b"1").await.unwrap();
            backend
                .records
                .write()
                .unwrap()
                .get_mut("s1")
                .unwrap()
                .expires_at = Some(Instant::now());

            assert_eq!(conn.hget("s1", "a").await.unwrap(), None);
            assert!(!conn.exists("s1").await.unwrap());
            assert_eq!(backend.len(), 0);
        });
    }

    #[test]
    fn test_unavailable_breaks_connection() {
        tokio_test::block_on(async {
            let backend = Arc::new(MemoryBackend::new());
            let mut conn = connect(&backend).await;

            backend.set_unavailable(true);
            assert!(matches!(
                conn.hget("s1", "a").await,
                Err(StoreError::Connection(_))
            ));
            assert!(conn.is_broken());
            assert!(MemoryConnector::new(Arc::clone(&backend)).connect().await.is_err());

            backend.set_unavailable(false);
            assert!(connect(&backend).await.ping().await.unwrap());
        });
    }
}
