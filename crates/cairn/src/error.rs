//! Error type shared by the engine layers.

use std::io;

use cairn_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Block of {size} bytes exceeds maximum block size of {max}")]
    BlockTooLarge { size: usize, max: usize },

    #[error("Block size must be at least one byte, got {0}")]
    InvalidBlockSize(usize),

    #[error("Checksum mismatch: requested {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Malformed identity: {0:?}")]
    MalformedIdentity(String),

    #[error("No entry named {0:?} in archive")]
    EntryNotFound(String),

    #[error("Storage error: {0}")]
    Store(StoreError),

    #[error("Cache database error: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl Error {
    /// Whether this failure concerns a single local file only.
    ///
    /// Batch operations log and skip such failures; anything else (backend
    /// unreachable, cache database broken, corrupt data) aborts the batch.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => Error::NotFound(key),
            other => Error::Store(other),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
