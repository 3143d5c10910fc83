//! Core abstractions for key-value backed session storage.
//!
//! This crate provides the pieces every backend shares:
//! - `ValueCodec` - Type-preserving encode/decode of arbitrary session values
//! - `TypeRegistry` - Process-wide set of decodable types
//! - `SessionStore` - Contract consumed by the session lifecycle framework
//! - `StoreConnection` / `Connector` - Remote client traits
//! - `Options` - Store configuration with defaults

pub mod codec;
pub mod config;
pub mod error;
pub mod traits;

pub use codec::{Decoded, Kind, SessionValue, TypeRegistry, ValueCodec};
pub use config::{Options, PoolOptions};
pub use error::{DecodeError, EncodeError, SessionError, StoreError};
pub use traits::{Connector, SessionId, SessionStore, StoreConnection};
