use std::collections::BTreeMap;
use std::io;

use jiff::Timestamp;
use thiserror::Error;

/// Custom metadata attached to an object.
pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("Invalid object metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Metadata about a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<Timestamp>,
    pub metadata: Metadata,
}
