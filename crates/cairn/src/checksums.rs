//! Persistent set of known content identifiers.
//!
//! Each namespace (blocks, file recipes) gets its own cache. The set is kept
//! in memory for membership tests and, when persistent, mirrored into a
//! SQLite database so it survives process restarts.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::id::is_valid_hex;

struct Inner {
    ids: HashSet<String>,
    conn: Option<Connection>,
}

/// Set of identities known to exist in a blob store.
///
/// This is a performance cache, not an authority: it may under-report what
/// the store holds, and an empty cache can be repopulated from a listing.
pub struct ChecksumCache {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl ChecksumCache {
    /// Open or create a persistent cache database at `path`.
    ///
    /// All identities already recorded are loaded into memory.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let (conn, ids) = load(&path)?;
        Ok(Self {
            path: Some(path),
            inner: Mutex::new(Inner {
                ids,
                conn: Some(conn),
            }),
        })
    }

    /// Create a cache that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner {
                ids: HashSet::new(),
                conn: None,
            }),
        }
    }

    /// Location of the backing database, if persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether `id` is known. Malformed identities are never known.
    pub fn contains(&self, id: &str) -> bool {
        is_valid_hex(id) && self.lock().ids.contains(id)
    }

    /// Record `id`, persisting it before it becomes visible.
    pub fn add(&self, id: &str) -> Result<()> {
        if !is_valid_hex(id) {
            return Err(Error::MalformedIdentity(id.to_string()));
        }

        let mut inner = self.lock();
        if inner.ids.contains(id) {
            return Ok(());
        }
        if let Some(conn) = &inner.conn {
            conn.execute(
                "INSERT OR IGNORE INTO checksums (checksum) VALUES (?1)",
                params![id],
            )?;
        }
        inner.ids.insert(id.to_string());
        Ok(())
    }

    /// Record many identities in one transaction.
    ///
    /// Either all of them are added or, on error, none are.
    pub fn update<I, S>(&self, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut fresh = Vec::new();
        for id in ids {
            let id = id.as_ref();
            if !is_valid_hex(id) {
                return Err(Error::MalformedIdentity(id.to_string()));
            }
            fresh.push(id.to_string());
        }

        let mut inner = self.lock();
        fresh.retain(|id| !inner.ids.contains(id));
        fresh.sort();
        fresh.dedup();

        if let Some(conn) = &inner.conn {
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt =
                    tx.prepare("INSERT OR IGNORE INTO checksums (checksum) VALUES (?1)")?;
                for id in &fresh {
                    stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
        }

        let added = fresh.len();
        inner.ids.extend(fresh);
        debug!(added, "Updated checksum cache");
        Ok(added)
    }

    pub fn len(&self) -> usize {
        self.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().ids.is_empty()
    }

    /// Iterate over a snapshot of all known identities.
    ///
    /// Call again to restart; identities added meanwhile are not seen by an
    /// iterator already handed out.
    pub fn iter(&self) -> impl Iterator<Item = String> + use<> {
        let mut ids: Vec<String> = self.lock().ids.iter().cloned().collect();
        ids.sort_unstable();
        ids.into_iter()
    }

    /// Discard every known identity, including the persisted copy.
    pub fn purge(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.ids.clear();

        let Some(path) = &self.path else {
            return Ok(());
        };

        info!(?path, "Purging checksum cache");
        // close the database before unlinking it
        inner.conn = None;
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let (conn, ids) = load(path)?;
        inner.conn = Some(conn);
        inner.ids = ids;
        Ok(())
    }

    // A panic while holding the lock leaves at worst an id persisted but not
    // yet in memory, which only under-reports.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Open the database at `path`, creating the schema if needed, and load
/// every recorded identity.
fn load(path: &Path) -> Result<(Connection, HashSet<String>)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS checksums (
            checksum TEXT PRIMARY KEY
        );
        "#,
    )?;

    let ids = {
        let mut stmt = conn.prepare("SELECT checksum FROM checksums")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<HashSet<_>>>()?
    };
    info!(?path, count = ids.len(), "Loaded checksum cache");

    Ok((conn, ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ContentId;

    fn id(n: u8) -> String {
        ContentId::hash(&[n]).as_hex()
    }

    #[test]
    fn add_and_contains() {
        let cache = ChecksumCache::in_memory();
        assert!(!cache.contains(&id(1)));
        cache.add(&id(1)).unwrap();
        cache.add(&id(1)).unwrap();
        assert!(cache.contains(&id(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn malformed_identity() {
        let cache = ChecksumCache::in_memory();
        assert!(matches!(
            cache.add("abc"),
            Err(Error::MalformedIdentity(_))
        ));
        assert!(!cache.contains("abc"));
        assert!(cache.update(vec![id(1), "nope".to_string()]).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache").join("blocks.db");

        {
            let cache = ChecksumCache::open(&path).unwrap();
            cache.add(&id(1)).unwrap();
            assert_eq!(cache.update([id(2), id(3), id(2)]).unwrap(), 2);
        }

        let cache = ChecksumCache::open(&path).unwrap();
        assert_eq!(cache.len(), 3);
        assert!(cache.contains(&id(2)));
        assert_eq!(cache.path(), Some(path.as_path()));
    }

    #[test]
    fn iter_is_restartable() {
        let cache = ChecksumCache::in_memory();
        cache.update([id(1), id(2)]).unwrap();
        let first: Vec<_> = cache.iter().collect();
        let second: Vec<_> = cache.iter().collect();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn purge_clears_persisted_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("files.db");

        let cache = ChecksumCache::open(&path).unwrap();
        cache.add(&id(1)).unwrap();
        cache.purge().unwrap();
        assert!(cache.is_empty());

        // Still usable after the purge
        cache.add(&id(2)).unwrap();
        drop(cache);

        let cache = ChecksumCache::open(&path).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&id(2)));
        assert!(!cache.contains(&id(1)));
    }
}
