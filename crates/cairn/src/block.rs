//! Block storage: fixed-maximum-size chunks addressed by their digest.

use std::sync::Arc;

use cairn_store::{BlobStore, Metadata};
use tracing::{debug, info, warn};

use crate::cancel::Cancel;
use crate::checksums::ChecksumCache;
use crate::config::BlockConfig;
use crate::error::{Error, Result};
use crate::id::{ContentId, is_valid_hex};

/// Outcome of a block put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStatus {
    /// The block was written to the blob store.
    Stored,
    /// The cache already knew the block; nothing was written.
    AlreadyPresent,
}

/// Result of scrubbing every stored block.
#[derive(Debug, Default)]
pub struct ScrubReport {
    pub checked: usize,
    /// Keys whose content does not hash back to the key
    pub mismatched: Vec<String>,
    /// Keys holding more than the maximum block size
    pub oversized: Vec<String>,
    /// Objects whose key is not a block identity at all
    pub foreign: Vec<String>,
    pub cancelled: bool,
}

impl ScrubReport {
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty() && self.oversized.is_empty()
    }
}

/// Stores blocks in a blob store, keyed by content identity.
pub struct BlockStore {
    store: Arc<dyn BlobStore>,
    cache: ChecksumCache,
    config: BlockConfig,
}

impl BlockStore {
    pub fn new(store: Arc<dyn BlobStore>, cache: ChecksumCache, config: BlockConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    pub fn max_block_size(&self) -> usize {
        self.config.max_block_size
    }

    pub fn cache(&self) -> &ChecksumCache {
        &self.cache
    }

    /// Store a block.
    ///
    /// With `use_cache`, a block already in the cache is not written again.
    pub fn put(&self, data: &[u8], use_cache: bool) -> Result<(ContentId, PutStatus)> {
        if data.len() > self.config.max_block_size {
            return Err(Error::BlockTooLarge {
                size: data.len(),
                max: self.config.max_block_size,
            });
        }

        let id = ContentId::hash(data);
        let key = id.as_hex();
        if use_cache && self.cache.contains(&key) {
            debug!(%id, "Block already cached, skipping");
            return Ok((id, PutStatus::AlreadyPresent));
        }

        self.store.put(&key, data, &Metadata::new())?;
        self.cache.add(&key)?;
        debug!(%id, bytes = data.len(), "Stored block");
        Ok((id, PutStatus::Stored))
    }

    /// Fetch a block.
    ///
    /// With `verify`, the content is re-hashed and a disagreement with `id`
    /// is reported as `ChecksumMismatch`.
    pub fn get(&self, id: &ContentId, verify: bool) -> Result<Vec<u8>> {
        let key = id.as_hex();
        let data = self.store.get(&key)?;
        if verify {
            let actual = ContentId::hash(&data);
            if actual != *id {
                return Err(Error::ChecksumMismatch {
                    expected: key,
                    actual: actual.as_hex(),
                });
            }
        }

        self.cache.add(&key)?;
        Ok(data)
    }

    /// Whether the block is known, asking the blob store on a cache miss.
    pub fn exists(&self, id: &ContentId) -> Result<bool> {
        let key = id.as_hex();
        if self.cache.contains(&key) {
            return Ok(true);
        }
        Ok(self.store.exists(&key)?)
    }

    /// Like `exists`, but records a positive remote answer in the cache.
    pub fn exists_force(&self, id: &ContentId) -> Result<bool> {
        let key = id.as_hex();
        if self.cache.contains(&key) {
            return Ok(true);
        }
        let found = self.store.exists(&key)?;
        if found {
            self.cache.add(&key)?;
        }
        Ok(found)
    }

    /// Ask the blob store directly, ignoring the cache.
    pub fn exists_remote(&self, id: &ContentId) -> Result<bool> {
        Ok(self.store.exists(&id.as_hex())?)
    }

    /// Discard and recreate the local cache. The blob store is untouched.
    pub fn purge_cache(&self) -> Result<()> {
        info!("Purging block cache");
        self.cache.purge()
    }

    /// Add every block present in the blob store to the cache.
    pub fn rebuild_cache(&self) -> Result<usize> {
        let keys: Vec<String> = self
            .store
            .list()?
            .into_iter()
            .map(|m| m.key)
            .filter(|k| is_valid_hex(k))
            .collect();
        let added = self.cache.update(&keys)?;
        info!(listed = keys.len(), added, "Rebuilt block cache");
        Ok(added)
    }

    /// Download every stored block and check it against its key.
    pub fn scrub(&self, cancel: &Cancel) -> Result<ScrubReport> {
        let mut report = ScrubReport::default();

        for meta in self.store.list()? {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let Ok(id) = ContentId::from_hex(&meta.key) else {
                warn!(key = %meta.key, "Not a block key");
                report.foreign.push(meta.key);
                continue;
            };

            report.checked += 1;
            let data = self.store.get(&meta.key)?;
            if data.len() > self.config.max_block_size {
                warn!(%id, size = data.len(), "Block exceeds maximum block size");
                report.oversized.push(meta.key);
            } else if ContentId::hash(&data) != id {
                warn!(%id, "Block content does not match its key");
                report.mismatched.push(meta.key);
            } else {
                debug!(%id, "Block OK");
            }
        }

        info!(
            checked = report.checked,
            mismatched = report.mismatched.len(),
            oversized = report.oversized.len(),
            "Scrubbed blocks"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_store::MemoryBlobStore;

    fn block_store(max_block_size: usize) -> (Arc<MemoryBlobStore>, BlockStore) {
        let store = Arc::new(MemoryBlobStore::new());
        let blocks = BlockStore::new(
            store.clone(),
            ChecksumCache::in_memory(),
            BlockConfig { max_block_size },
        );
        (store, blocks)
    }

    #[test]
    fn put_then_get() {
        let (_, blocks) = block_store(16);
        for data in [&b""[..], b"a", b"exactly sixteen!"] {
            let (id, status) = blocks.put(data, true).unwrap();
            assert_eq!(status, PutStatus::Stored);
            assert_eq!(blocks.get(&id, true).unwrap(), data);
        }
    }

    #[test]
    fn too_large_writes_nothing() {
        let (store, blocks) = block_store(16);
        let err = blocks.put(&[0u8; 17], true).unwrap_err();
        assert!(matches!(err, Error::BlockTooLarge { size: 17, max: 16 }));
        assert!(store.is_empty());
        assert!(blocks.cache().is_empty());
    }

    #[test]
    fn cached_put_is_skipped() {
        let (store, blocks) = block_store(16);
        let (id, _) = blocks.put(b"dup", true).unwrap();
        store.remove(&id.as_hex());

        let (again, status) = blocks.put(b"dup", true).unwrap();
        assert_eq!(again, id);
        assert_eq!(status, PutStatus::AlreadyPresent);
        assert!(store.is_empty());

        // Without the cache the block is written again
        let (_, status) = blocks.put(b"dup", false).unwrap();
        assert_eq!(status, PutStatus::Stored);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn verified_get_detects_corruption() {
        let (store, blocks) = block_store(16);
        let (id, _) = blocks.put(b"original", true).unwrap();
        store
            .put(&id.as_hex(), b"tampered", &Metadata::new())
            .unwrap();

        assert_eq!(blocks.get(&id, false).unwrap(), b"tampered");
        assert!(matches!(
            blocks.get(&id, true),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn missing_block_is_not_found() {
        let (_, blocks) = block_store(16);
        let id = ContentId::hash(b"never stored");
        assert!(matches!(blocks.get(&id, false), Err(Error::NotFound(_))));
        assert!(!blocks.exists(&id).unwrap());
    }

    #[test]
    fn exists_variants() {
        let (store, blocks) = block_store(16);
        let id = ContentId::hash(b"remote");
        store.put(&id.as_hex(), b"remote", &Metadata::new()).unwrap();

        assert!(blocks.exists(&id).unwrap());
        assert!(!blocks.cache().contains(&id.as_hex()));

        assert!(blocks.exists_force(&id).unwrap());
        assert!(blocks.cache().contains(&id.as_hex()));

        store.remove(&id.as_hex());
        assert!(blocks.exists(&id).unwrap());
        assert!(!blocks.exists_remote(&id).unwrap());
    }

    #[test]
    fn purge_and_rebuild_cache() {
        let (_, blocks) = block_store(16);
        blocks.put(b"one", true).unwrap();
        blocks.put(b"two", true).unwrap();

        blocks.purge_cache().unwrap();
        assert!(blocks.cache().is_empty());

        assert_eq!(blocks.rebuild_cache().unwrap(), 2);
        assert_eq!(blocks.cache().len(), 2);
    }

    #[test]
    fn scrub_reports_bad_blocks() {
        let (store, blocks) = block_store(4);
        blocks.put(b"good", true).unwrap();
        let (bad, _) = blocks.put(b"bad", true).unwrap();
        store.put(&bad.as_hex(), b"evil", &Metadata::new()).unwrap();
        let big = ContentId::hash(b"too big");
        store.put(&big.as_hex(), b"too big", &Metadata::new()).unwrap();

        let report = blocks.scrub(&Cancel::new()).unwrap();
        assert_eq!(report.checked, 3);
        assert_eq!(report.mismatched, vec![bad.as_hex()]);
        assert_eq!(report.oversized, vec![big.as_hex()]);
        assert!(!report.is_clean());
    }

    #[test]
    fn scrub_stops_when_cancelled() {
        let (_, blocks) = block_store(16);
        blocks.put(b"x", true).unwrap();
        let cancel = Cancel::new();
        cancel.cancel();
        let report = blocks.scrub(&cancel).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.checked, 0);
    }
}
