use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use jiff::Timestamp;

use super::{BlobStore, Metadata, ObjectMeta, StoreError};

struct Object {
    data: Vec<u8>,
    metadata: Metadata,
    last_modified: Timestamp,
}

/// In-memory blob store.
///
/// Contents live only as long as the store itself.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<BTreeMap<String, Object>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete an object, returning whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave a map entry half-written.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Object>> {
        self.objects.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Object>> {
        self.objects.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &str, data: &[u8], metadata: &Metadata) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        self.write().insert(
            key.to_string(),
            Object {
                data: data.to_vec(),
                metadata: metadata.clone(),
                last_modified: Timestamp::now(),
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.read()
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        Ok(self.read().get(key).map(|o| meta(key, o)))
    }

    fn list(&self) -> Result<Vec<ObjectMeta>, StoreError> {
        Ok(self.read().iter().map(|(k, o)| meta(k, o)).collect())
    }
}

fn meta(key: &str, object: &Object) -> ObjectMeta {
    ObjectMeta {
        key: key.to_string(),
        size: object.data.len() as u64,
        last_modified: Some(object.last_modified),
        metadata: object.metadata.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_list_remove() {
        let store = MemoryBlobStore::new();
        let mut metadata = Metadata::new();
        metadata.insert("tag".into(), "home".into());

        store.put("bbbb", b"two", &Metadata::new()).unwrap();
        store.put("aaaa", b"one", &metadata).unwrap();

        assert_eq!(store.get("aaaa").unwrap(), b"one");
        assert_eq!(store.head("aaaa").unwrap().unwrap().metadata, metadata);

        let keys: Vec<_> = store.list().unwrap().into_iter().map(|m| m.key).collect();
        assert_eq!(keys, vec!["aaaa", "bbbb"]);

        assert!(store.remove("aaaa"));
        assert!(matches!(store.get("aaaa"), Err(StoreError::NotFound(_))));
        assert_eq!(store.len(), 1);
    }
}
