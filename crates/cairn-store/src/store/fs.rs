use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{BlobStore, Metadata, ObjectMeta, StoreError};

/// Suffix of the JSON sidecar holding an object's custom metadata.
const META_SUFFIX: &str = ".meta";

/// Filesystem-backed blob store: one directory per bucket.
pub struct FsBlobStore {
    base_path: PathBuf,
}

impl FsBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Initialize directory structure
    pub fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.base_path)?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Delete an object and its metadata sidecar.
    ///
    /// Returns whether an object was removed.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let path = self.sharded_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        match fs::remove_file(sidecar_path(&path)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    /// Convert a hex key to a sharded path.
    /// Example: ab/cd/ef0123456789... (first 2 bytes as subdirs)
    fn sharded_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self
            .base_path
            .join(&key[0..2])
            .join(&key[2..4])
            .join(&key[4..]))
    }

    fn object_meta(&self, key: &str, path: &Path) -> Result<Option<ObjectMeta>, StoreError> {
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let custom = match fs::read(sidecar_path(path)) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Metadata::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(ObjectMeta {
            key: key.to_string(),
            size: metadata.len(),
            last_modified: metadata
                .modified()
                .ok()
                .and_then(|t| Timestamp::try_from(t).ok()),
            metadata: custom,
        }))
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(META_SUFFIX);
    PathBuf::from(name)
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.len() < 5
        || !key
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Atomic write: write to tempfile, then rename
fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.flush()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, data: &[u8], metadata: &Metadata) -> Result<(), StoreError> {
        let path = self.sharded_path(key)?;
        debug!(key, bytes = data.len(), "Writing object");

        atomic_write(&path, data)?;
        let sidecar = sidecar_path(&path);
        if metadata.is_empty() {
            match fs::remove_file(&sidecar) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            atomic_write(&sidecar, &serde_json::to_vec(metadata)?)?;
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.sharded_path(key)?;
        fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Io(e)
            }
        })
    }

    fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let path = self.sharded_path(key)?;
        self.object_meta(key, &path)
    }

    fn list(&self) -> Result<Vec<ObjectMeta>, StoreError> {
        // If directory doesn't exist, return empty list
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut objects = Vec::new();
        for entry in WalkDir::new(&self.base_path).min_depth(3).max_depth(3) {
            let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&self.base_path) else {
                continue;
            };
            let key: String = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect();
            if key.ends_with(META_SUFFIX) || validate_key(&key).is_err() {
                // sidecars and leftover temp files
                continue;
            }

            match self.object_meta(&key, entry.path())? {
                Some(meta) => objects.push(meta),
                None => warn!(key, "Object vanished while listing"),
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}
