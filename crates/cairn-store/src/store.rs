mod fs;
mod memory;
mod types;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;
pub use types::{Metadata, ObjectMeta, StoreError};

/// A flat key/value object store.
///
/// Keys are lowercase hex content identifiers. Implementations must make a
/// `put` visible to subsequent `get`/`head`/`list` calls once it returns.
pub trait BlobStore: Send + Sync + 'static {
    /// Store `data` under `key`, replacing any previous object.
    ///
    /// `metadata` is attached to the object and returned by `head` and
    /// `list` without fetching the body.
    fn put(&self, key: &str, data: &[u8], metadata: &Metadata) -> Result<(), StoreError>;

    /// Get the full body of the object at `key`.
    ///
    /// Returns `StoreError::NotFound` if there is no such object.
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Get object metadata without fetching data, or `None` if absent.
    fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError>;

    /// List every object in the store.
    fn list(&self) -> Result<Vec<ObjectMeta>, StoreError>;

    /// Check if an object exists.
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.head(key)?.is_some())
    }
}
