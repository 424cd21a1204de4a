//! Subcommands of the `cairn` binary and the shared store setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tracing::{debug, info};

use cairn::{
    ArchiveEngine, BlockStore, CacheMode, ChecksumCache, Config, Error, Exclude, FileStore,
    PatternList,
};
use cairn_store::FsBlobStore;

pub mod archive;
pub mod blob;
pub mod cache;
pub mod list;
pub mod restore;
pub mod scrub;
pub mod transfer;
pub mod verify;

/// Options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root directory of the blob store (overrides the config file)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Keep checksum caches in memory only
    #[arg(long, global = true)]
    no_cache: bool,

    /// Hostname to record and filter archives by
    #[arg(long, global = true)]
    hostname: Option<String>,
}

impl GlobalArgs {
    /// The config file, if any, with command-line overrides applied.
    pub fn load_config(&self) -> Result<Config, Error> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(storage) = &self.storage {
            config.storage = Some(storage.clone());
        }
        if self.no_cache {
            config.cache = CacheMode::Disabled;
        }
        if let Some(hostname) = &self.hostname {
            config.hostname = Some(hostname.clone());
        }
        Ok(config)
    }
}

fn machine_hostname() -> Option<String> {
    hostname::get().ok().and_then(|h| h.into_string().ok())
}

/// Stores and engine assembled from configuration.
pub struct Context {
    pub blocks: Arc<BlockStore>,
    pub files: Arc<FileStore>,
    pub engine: ArchiveEngine,
}

impl Context {
    pub fn open(global: &GlobalArgs) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Self::from_config(global.load_config()?)
    }

    pub fn from_config(config: Config) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let storage = config
            .storage
            .clone()
            .ok_or("no storage directory: pass --storage or set `storage` in the config file")?;
        let hostname = config
            .hostname
            .clone()
            .or_else(machine_hostname)
            .unwrap_or_else(|| "localhost".into());

        let bucket = |name: &str| -> Result<Arc<FsBlobStore>, Error> {
            let store = FsBlobStore::new(storage.join(name));
            store.init()?;
            Ok(Arc::new(store))
        };
        let cache = |name: &str| -> Result<ChecksumCache, Error> {
            match (config.cache, config.cache_dir()) {
                (CacheMode::Enabled, Some(dir)) => ChecksumCache::open(dir.join(format!("{name}.db"))),
                _ => Ok(ChecksumCache::in_memory()),
            }
        };

        let block_config = config.block_config()?;
        info!(
            ?storage,
            cache = ?config.cache,
            block_size = block_config.max_block_size,
            %hostname,
            cache_dir = ?config.cache_dir(),
            "Opening stores"
        );

        let blocks = Arc::new(BlockStore::new(
            bucket(&config.buckets.blocks)?,
            cache("blocks")?,
            block_config,
        ));
        let files = Arc::new(FileStore::new(
            Arc::clone(&blocks),
            bucket(&config.buckets.files)?,
            cache("files")?,
        ));
        if config.cache == CacheMode::Disabled {
            // an empty cache would make every put look new
            debug!("Populating in-memory caches from listings");
            files.rebuild_cache()?;
        }
        let engine = ArchiveEngine::new(
            Arc::clone(&files),
            bucket(&config.buckets.archives)?,
            hostname,
        );

        Ok(Self {
            blocks,
            files,
            engine,
        })
    }

    /// Key of the named archive, or of this host's latest one.
    pub fn resolve_archive(
        &self,
        archive: Option<String>,
    ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(key) = archive {
            return Ok(key);
        }
        let latest = self.engine.get_latest(Some(self.engine.hostname()))?;
        latest.ok_or_else(|| {
            format!("no archives for host {}", self.engine.hostname()).into()
        })
    }
}

/// Load an exclude file, or exclude nothing.
pub fn load_exclude(
    path: Option<&PathBuf>,
) -> Result<Box<dyn Exclude>, Box<dyn std::error::Error + Send + Sync>> {
    Ok(match path {
        Some(path) => Box::new(PatternList::from_file(path)?),
        None => Box::new(PatternList::default()),
    })
}
