//! Error taxonomy shared by the codec, the backends and the facade.

use thiserror::Error;

/// Value could not be turned into a blob.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encode only takes a pointer to a struct, got bare {0}")]
    BareStruct(String),
    #[error("unsupported type: {0}")]
    Unsupported(String),
    #[error("type tag {0} is already registered by a different type")]
    TagConflict(String),
    #[error("failed to serialize {tag}: {source}")]
    Serialize {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{tag} value does not survive encoding: {source}")]
    Lossy {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Blob could not be turned back into a value.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed value blob: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown type: {0}")]
    UnknownType(String),
    #[error("failed to reconstruct {tag}: {source}")]
    Data {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Remote store or connection pool failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection pool closed")]
    PoolClosed,
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("{command} failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },
    #[error("Ping failed")]
    PingFailed,
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Error surfaced by the session store facade.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
