//! File storage: chunk streams into blocks and keep the recipe to rebuild them.

use std::io::Read;
use std::sync::Arc;

use cairn_store::{BlobStore, Metadata};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::block::{BlockStore, PutStatus};
use crate::checksums::ChecksumCache;
use crate::error::{Error, Result};
use crate::id::{ContentHasher, ContentId, is_valid_hex};

/// Default MIME type recorded for stored streams.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// How to reassemble one stored stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecipe {
    /// Digest of the whole stream
    pub checksum: ContentId,
    pub size: u64,
    pub mime_type: String,
    /// Block IDs in stream order
    pub blockchain: Vec<ContentId>,
    /// Whether the whole stream was already known before this put
    pub filehash_exists: bool,
    /// How many of the blocks were already known
    pub blockhash_exists: usize,
}

/// What a put did, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutAction {
    /// New content
    Put,
    /// Whole file already known
    FileDedup,
    /// New file, made at least partly of known blocks
    BlockDedup,
}

impl PutAction {
    pub fn label(self) -> &'static str {
        match self {
            PutAction::Put => "PUT",
            PutAction::FileDedup => "FDEDUP",
            PutAction::BlockDedup => "BDEDUP",
        }
    }
}

impl FileRecipe {
    pub fn action(&self) -> PutAction {
        if self.filehash_exists {
            PutAction::FileDedup
        } else if self.blockhash_exists > 0 {
            PutAction::BlockDedup
        } else {
            PutAction::Put
        }
    }

    /// Number of blocks this put actually wrote.
    pub fn blocks_stored(&self) -> usize {
        self.blockchain.len() - self.blockhash_exists.min(self.blockchain.len())
    }
}

/// Stores streams as recipes over a shared `BlockStore`.
pub struct FileStore {
    blocks: Arc<BlockStore>,
    store: Arc<dyn BlobStore>,
    cache: ChecksumCache,
}

impl FileStore {
    pub fn new(blocks: Arc<BlockStore>, store: Arc<dyn BlobStore>, cache: ChecksumCache) -> Self {
        Self {
            blocks,
            store,
            cache,
        }
    }

    pub fn blocks(&self) -> &Arc<BlockStore> {
        &self.blocks
    }

    pub fn cache(&self) -> &ChecksumCache {
        &self.cache
    }

    /// Store a stream.
    ///
    /// The stream is cut into chunks of exactly the block store's maximum
    /// size (the last one may be shorter) and every chunk goes through a
    /// cached block put. The recipe is only written if its checksum is not
    /// already cached.
    pub fn put<R: Read>(&self, mut reader: R, mime_type: &str) -> Result<FileRecipe> {
        let block_size = self.blocks.max_block_size();
        if block_size == 0 {
            return Err(Error::InvalidBlockSize(block_size));
        }
        let mut hasher = ContentHasher::new();
        let mut blockchain = Vec::new();
        let mut blockhash_exists = 0;
        let mut size = 0u64;
        let mut buf = Vec::with_capacity(block_size);

        loop {
            buf.clear();
            let n = reader.by_ref().take(block_size as u64).read_to_end(&mut buf)?;
            if n == 0 {
                break;
            }

            size += n as u64;
            hasher.update(&buf);
            let (id, status) = self.blocks.put(&buf, true)?;
            debug!(index = blockchain.len(), %id, ?status, "Put block");
            if status == PutStatus::AlreadyPresent {
                blockhash_exists += 1;
            }
            blockchain.push(id);

            if n < block_size {
                break;
            }
        }
        debug!(
            blocks = blockchain.len(),
            existing = blockhash_exists,
            "Put blocks"
        );

        let mut recipe = FileRecipe {
            checksum: hasher.finalize(),
            size,
            mime_type: mime_type.to_string(),
            blockchain,
            filehash_exists: false,
            blockhash_exists,
        };

        let key = recipe.checksum.as_hex();
        if self.cache.contains(&key) {
            debug!(checksum = %key, "File already stored");
            recipe.filehash_exists = true;
        } else {
            debug!(checksum = %key, "Storing recipe");
            self.write_recipe(&recipe)?;
        }
        Ok(recipe)
    }

    /// Write a recipe under its own checksum and remember it.
    pub(crate) fn write_recipe(&self, recipe: &FileRecipe) -> Result<()> {
        let key = recipe.checksum.as_hex();
        self.store
            .put(&key, &serde_json::to_vec(recipe)?, &Metadata::new())?;
        self.cache.add(&key)
    }

    /// Fetch the recipe for a stored stream (no block data).
    pub fn get(&self, checksum: &ContentId) -> Result<FileRecipe> {
        let data = self.store.get(&checksum.as_hex())?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Stream the content of a stored file, block by block, in order.
    pub fn read(&self, checksum: &ContentId) -> Result<BlockReader> {
        let recipe = self.get(checksum)?;
        Ok(BlockReader {
            blocks: Arc::clone(&self.blocks),
            ids: recipe.blockchain.into_iter(),
            verify: false,
        })
    }

    /// Whether the recipe is known.
    ///
    /// Without `force` only the cache is consulted; with it, the blob store
    /// is asked and a positive answer is recorded in the cache.
    pub fn exists(&self, checksum: &ContentId, force: bool) -> Result<bool> {
        let key = checksum.as_hex();
        if !force {
            return Ok(self.cache.contains(&key));
        }
        let found = self.store.exists(&key)?;
        if found {
            self.cache.add(&key)?;
        }
        Ok(found)
    }

    /// Purge this store's cache and the block cache underneath.
    pub fn purge_cache(&self) -> Result<()> {
        info!("Purging file cache");
        self.cache.purge()?;
        self.blocks.purge_cache()
    }

    /// Repopulate this store's cache and the block cache from listings.
    pub fn rebuild_cache(&self) -> Result<(usize, usize)> {
        let keys: Vec<String> = self
            .store
            .list()?
            .into_iter()
            .map(|m| m.key)
            .filter(|k| is_valid_hex(k))
            .collect();
        let files = self.cache.update(&keys)?;
        info!(listed = keys.len(), added = files, "Rebuilt file cache");
        Ok((files, self.blocks.rebuild_cache()?))
    }

    /// Check that every stored recipe is filed under its own checksum.
    ///
    /// Returns the keys that are not.
    pub fn scrub(&self) -> Result<Vec<String>> {
        let mut bad = Vec::new();
        for meta in self.store.list()? {
            let Ok(id) = ContentId::from_hex(&meta.key) else {
                warn!(key = %meta.key, "Not a recipe key");
                bad.push(meta.key);
                continue;
            };
            match self.get(&id) {
                Ok(recipe) if recipe.checksum == id => {
                    debug!(%id, blocks = recipe.blockchain.len(), size = recipe.size, "Recipe OK");
                }
                Ok(recipe) => {
                    warn!(%id, checksum = %recipe.checksum, "Recipe stored under wrong key");
                    bad.push(meta.key);
                }
                Err(Error::Json(err)) => {
                    warn!(%id, %err, "Recipe does not parse");
                    bad.push(meta.key);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(bad)
    }
}

/// Forward-only sequence of a stored file's blocks.
///
/// Call `FileStore::read` again to start over.
pub struct BlockReader {
    blocks: Arc<BlockStore>,
    ids: std::vec::IntoIter<ContentId>,
    verify: bool,
}

impl BlockReader {
    /// Re-hash every block as it is fetched.
    pub fn verified(mut self) -> Self {
        self.verify = true;
        self
    }

    /// Blocks not yet read.
    pub fn remaining(&self) -> usize {
        self.ids.len()
    }
}

impl Iterator for BlockReader {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.ids.next()?;
        Some(self.blocks.get(&id, self.verify))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ids.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlockConfig;
    use cairn_store::MemoryBlobStore;

    struct Fixture {
        block_bucket: Arc<MemoryBlobStore>,
        file_bucket: Arc<MemoryBlobStore>,
        files: FileStore,
    }

    fn fixture(max_block_size: usize) -> Fixture {
        let block_bucket = Arc::new(MemoryBlobStore::new());
        let file_bucket = Arc::new(MemoryBlobStore::new());
        let blocks = Arc::new(BlockStore::new(
            block_bucket.clone(),
            ChecksumCache::in_memory(),
            BlockConfig { max_block_size },
        ));
        let files = FileStore::new(blocks, file_bucket.clone(), ChecksumCache::in_memory());
        Fixture {
            block_bucket,
            file_bucket,
            files,
        }
    }

    fn drain(files: &FileStore, id: &ContentId) -> Vec<u8> {
        files
            .read(id)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap()
            .concat()
    }

    #[test]
    fn zero_block_size_is_an_error() {
        let fx = fixture(0);
        let err = fx.files.put(&b"important data"[..], "text/plain").unwrap_err();
        assert!(matches!(err, Error::InvalidBlockSize(0)));
        assert!(fx.file_bucket.is_empty());
    }

    #[test]
    fn put_then_read_reproduces_stream() {
        let fx = fixture(4);
        let data = b"0123456789";
        let recipe = fx.files.put(&data[..], DEFAULT_MIME_TYPE).unwrap();

        assert_eq!(recipe.size, 10);
        assert_eq!(recipe.blockchain.len(), 3);
        assert_eq!(recipe.checksum, ContentId::hash(data));
        assert_eq!(recipe.action(), PutAction::Put);

        let drained = drain(&fx.files, &recipe.checksum);
        assert_eq!(drained, data);
        assert_eq!(ContentId::hash(&drained), recipe.checksum);
    }

    #[test]
    fn chunks_are_fixed_size() {
        let fx = fixture(4);
        let recipe = fx.files.put(&b"aaaabbbbcc"[..], DEFAULT_MIME_TYPE).unwrap();
        assert_eq!(
            recipe.blockchain,
            vec![
                ContentId::hash(b"aaaa"),
                ContentId::hash(b"bbbb"),
                ContentId::hash(b"cc")
            ]
        );
    }

    #[test]
    fn exact_multiple_has_no_trailing_block() {
        let fx = fixture(4);
        let recipe = fx.files.put(&b"aaaabbbb"[..], DEFAULT_MIME_TYPE).unwrap();
        assert_eq!(recipe.blockchain.len(), 2);
    }

    #[test]
    fn empty_stream() {
        let fx = fixture(4);
        let recipe = fx.files.put(&b""[..], DEFAULT_MIME_TYPE).unwrap();
        assert_eq!(recipe.size, 0);
        assert!(recipe.blockchain.is_empty());
        assert_eq!(recipe.checksum, ContentId::hash(b""));
        assert!(drain(&fx.files, &recipe.checksum).is_empty());
    }

    #[test]
    fn second_put_is_file_dedup() {
        let fx = fixture(4);
        let first = fx.files.put(&b"same content"[..], "text/plain").unwrap();
        let second = fx.files.put(&b"same content"[..], "text/plain").unwrap();

        assert!(!first.filehash_exists);
        assert!(second.filehash_exists);
        assert_eq!(second.action(), PutAction::FileDedup);
        assert_eq!(second.blockhash_exists, 3);
        assert_eq!(second.checksum, first.checksum);
        assert_eq!(fx.file_bucket.len(), 1);
        assert_eq!(fx.block_bucket.len(), 3);
    }

    #[test]
    fn shared_blocks_are_block_dedup() {
        let fx = fixture(4);
        fx.files.put(&b"aaaabbbb"[..], DEFAULT_MIME_TYPE).unwrap();
        let recipe = fx.files.put(&b"aaaacccc"[..], DEFAULT_MIME_TYPE).unwrap();
        assert_eq!(recipe.action(), PutAction::BlockDedup);
        assert_eq!(recipe.blockhash_exists, 1);
        assert_eq!(recipe.blocks_stored(), 1);
    }

    #[test]
    fn recipe_is_plain_json() {
        let fx = fixture(4);
        let recipe = fx.files.put(&b"json"[..], "text/plain").unwrap();
        let raw = fx.file_bucket.get(&recipe.checksum.as_hex()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["mime_type"], "text/plain");
        assert_eq!(value["size"], 4);
        assert_eq!(
            value["blockchain"][0],
            serde_json::Value::String(ContentId::hash(b"json").as_hex())
        );
        assert_eq!(fx.files.get(&recipe.checksum).unwrap(), recipe);
    }

    #[test]
    fn exists_cache_and_forced() {
        let fx = fixture(4);
        let recipe = fx.files.put(&b"abc"[..], DEFAULT_MIME_TYPE).unwrap();
        assert!(fx.files.exists(&recipe.checksum, false).unwrap());

        fx.files.cache().purge().unwrap();
        assert!(!fx.files.exists(&recipe.checksum, false).unwrap());
        assert!(fx.files.exists(&recipe.checksum, true).unwrap());
        assert!(fx.files.exists(&recipe.checksum, false).unwrap());
    }

    #[test]
    fn read_reports_missing_block() {
        let fx = fixture(4);
        let recipe = fx.files.put(&b"aaaabbbb"[..], DEFAULT_MIME_TYPE).unwrap();
        fx.block_bucket.remove(&recipe.blockchain[1].as_hex());

        let mut reader = fx.files.read(&recipe.checksum).unwrap();
        assert_eq!(reader.remaining(), 2);
        assert_eq!(reader.next().unwrap().unwrap(), b"aaaa");
        assert!(matches!(reader.next().unwrap(), Err(Error::NotFound(_))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn rebuild_after_purge() {
        let fx = fixture(4);
        fx.files.put(&b"aaaabbbb"[..], DEFAULT_MIME_TYPE).unwrap();
        fx.files.purge_cache().unwrap();
        assert!(fx.files.cache().is_empty());
        assert!(fx.files.blocks().cache().is_empty());

        assert_eq!(fx.files.rebuild_cache().unwrap(), (1, 2));
    }

    #[test]
    fn scrub_flags_misfiled_recipe() {
        let fx = fixture(4);
        let recipe = fx.files.put(&b"abc"[..], DEFAULT_MIME_TYPE).unwrap();
        let wrong = ContentId::hash(b"elsewhere").as_hex();
        let raw = fx.file_bucket.get(&recipe.checksum.as_hex()).unwrap();
        fx.file_bucket.put(&wrong, &raw, &Metadata::new()).unwrap();

        assert_eq!(fx.files.scrub().unwrap(), vec![wrong]);
    }
}
