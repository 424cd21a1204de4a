//! Engine and command-line configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default maximum block size (1 MiB).
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Settings for a `BlockStore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockConfig {
    pub max_block_size: usize,
}

impl BlockConfig {
    pub fn new(max_block_size: usize) -> Result<Self> {
        if max_block_size == 0 {
            return Err(Error::InvalidBlockSize(max_block_size));
        }
        Ok(Self { max_block_size })
    }
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            max_block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Whether checksum caches persist across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Enabled,
    Disabled,
}

/// Bucket names for the three key namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Buckets {
    pub blocks: String,
    pub files: String,
    pub archives: String,
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            blocks: "blockstorage".into(),
            files: "filestorage".into(),
            archives: "webstorage".into(),
        }
    }
}

/// Configuration file contents.
///
/// ```toml
/// storage = "/srv/cairn"
/// cache_dir = "/var/cache/cairn"
/// cache = "enabled"
/// block_size = 1048576
///
/// [buckets]
/// blocks = "blockstorage"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Root directory of the filesystem blob store
    pub storage: Option<PathBuf>,

    /// Directory holding the checksum cache databases
    pub cache_dir: Option<PathBuf>,

    #[serde(default)]
    pub cache: CacheMode,

    pub block_size: Option<usize>,

    /// Hostname recorded in archives, instead of the machine's own
    pub hostname: Option<String>,

    #[serde(default)]
    pub buckets: Buckets,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.block_config()?;
        Ok(config)
    }

    pub fn block_config(&self) -> Result<BlockConfig> {
        BlockConfig::new(self.block_size.unwrap_or(DEFAULT_BLOCK_SIZE))
    }

    /// Directory for cache databases: `cache_dir`, or `.cache` under the storage root.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| self.storage.as_ref().map(|s| s.join(".cache")))
    }
}
