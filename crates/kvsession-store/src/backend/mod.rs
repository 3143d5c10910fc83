//! Store backends.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "memory")]
pub use memory::{MemoryBackend, MemoryConnection, MemoryConnector};

#[cfg(feature = "redis")]
pub use self::redis::{RedisConnection, RedisConnector};
