//! Key-value backed session store.
//!
//! Provides:
//! - `KvSessionStore` - Session store facade with log-and-degrade error handling
//! - `RecordAccessor` - Field operations with automatic expiry refresh
//! - `ConnectionPool` - Bounded pool with on-demand growth
//! - Backend implementations (memory, Redis protocol)

pub mod accessor;
pub mod backend;
pub mod pool;
pub mod store;

pub use accessor::RecordAccessor;
pub use kvsession_core::{
    Decoded, Options, SessionError, SessionId, SessionStore, SessionValue, session_struct,
};
pub use pool::{ConnectionPool, ConnectorManager, PoolStatus, PooledConnection};
pub use store::KvSessionStore;
