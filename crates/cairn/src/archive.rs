//! Archive engine: snapshot a tree, re-snapshot it differentially, and keep
//! the manifests in a blob store.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use cairn_store::BlobStore;
use jiff::Timestamp;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::exclude::Exclude;
use crate::file::{DEFAULT_MIME_TYPE, FileRecipe, FileStore, PutAction};
use crate::manifest::{Entry, FileType, Manifest, Stat};

/// Per-outcome counters for a create or diff run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionStats {
    /// Files with new content
    pub put: usize,
    /// Files whose whole content was already known
    pub fdedup: usize,
    /// New files made at least partly of known blocks
    pub bdedup: usize,
    pub exclude: usize,
    /// Directories, symlinks and special files recorded
    pub special: usize,
    /// Entries skipped because of a local I/O error
    pub errors: usize,
    /// Blocks actually written
    pub blocks_stored: usize,
    /// Entries dropped by a diff
    pub deleted: usize,
    /// Existing entries replaced by a diff
    pub changed: usize,
    /// New entries found by a diff
    pub added: usize,
}

impl ActionStats {
    fn record(&mut self, path: &Path, recipe: &FileRecipe) {
        let action = recipe.action();
        match action {
            PutAction::Put => self.put += 1,
            PutAction::FileDedup => self.fdedup += 1,
            PutAction::BlockDedup => self.bdedup += 1,
        }
        self.blocks_stored += recipe.blocks_stored();
        info!(
            action = action.label(),
            ?path,
            checksum = %recipe.checksum,
            size = recipe.size,
            "Archived file"
        );
    }

    fn log_summary(&self) {
        info!(
            put = self.put,
            fdedup = self.fdedup,
            bdedup = self.bdedup,
            exclude = self.exclude,
            errors = self.errors,
            "File operations statistics"
        );
    }
}

/// Result of a differential re-snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffOutcome {
    /// Whether the manifest was modified; an unchanged one should not be saved
    pub changed: bool,
    pub stats: ActionStats,
}

/// Summary of a stored manifest, read from its side metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSet {
    pub date: String,
    pub time: String,
    pub datetime: Timestamp,
    pub size: u64,
    pub tag: String,
    pub hostname: String,
    /// Key of the manifest object
    pub basename: String,
}

/// Outcome of importing a manifest file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Imported {
    pub key: String,
    /// The store already held this manifest; nothing was uploaded
    pub existed: bool,
}

/// Opens regular files for archiving.
pub trait Source: Send + Sync {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>>;
}

/// Reads files straight from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSource;

impl Source for LocalSource {
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(File::open(path)?))
    }
}

/// Creates, updates and stores manifests.
pub struct ArchiveEngine {
    files: Arc<FileStore>,
    store: Arc<dyn BlobStore>,
    hostname: String,
    source: Box<dyn Source>,
}

impl ArchiveEngine {
    pub fn new(files: Arc<FileStore>, store: Arc<dyn BlobStore>, hostname: impl Into<String>) -> Self {
        Self {
            files,
            store,
            hostname: hostname.into(),
            source: Box::new(LocalSource),
        }
    }

    /// Read file contents through `source` instead of the local filesystem.
    pub fn with_source(mut self, source: impl Source + 'static) -> Self {
        self.source = Box::new(source);
        self
    }

    pub fn files(&self) -> &Arc<FileStore> {
        &self.files
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Snapshot every entry under `root`.
    ///
    /// Regular files are stored through the file store; directories,
    /// symlinks and special files are recorded without content. Entries
    /// that fail with a local I/O error are logged and left out.
    pub fn create(
        &self,
        root: &Path,
        exclude: &dyn Exclude,
        tag: &str,
    ) -> Result<(Manifest, ActionStats)> {
        info!(?root, tag, "Creating archive");
        let mut manifest = Manifest::new(root.to_string_lossy(), self.hostname.clone(), tag);
        let mut stats = ActionStats::default();

        walk(root, exclude, &mut stats, |path, stats| {
            self.add_entry(&mut manifest, path, stats)?;
            Ok(())
        })?;

        stats.log_summary();
        manifest.stoptime = Some(Timestamp::now());
        manifest.recount();
        info!(
            files = manifest.totalcount,
            bytes = manifest.totalsize,
            "Archive created"
        );
        Ok((manifest, stats))
    }

    /// Bring `manifest` up to date with the filesystem.
    ///
    /// Recorded entries that vanished are dropped, entries whose stat
    /// differs are re-stored and replaced wholesale, and entries not yet
    /// recorded are added.
    pub fn diff(&self, manifest: &mut Manifest, exclude: &dyn Exclude) -> Result<DiffOutcome> {
        let now = Timestamp::now();
        manifest.starttime = now;
        manifest.datetime = now;
        let mut stats = ActionStats::default();
        let mut changed = false;

        let recorded: Vec<String> = manifest.filedata.keys().cloned().collect();
        for key in recorded {
            let path = Path::new(&key);
            let Some(stored) = manifest.filedata.get(&key) else {
                continue;
            };

            let metadata = match fs::symlink_metadata(path) {
                Ok(m) => m,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    info!(action = "DELETED", ?path, "Entry removed");
                    manifest.filedata.remove(&key);
                    stats.deleted += 1;
                    changed = true;
                    continue;
                }
                Err(err) => {
                    warn!(?path, %err, "Cannot stat entry, keeping stale record");
                    stats.errors += 1;
                    continue;
                }
            };

            if FileType::from(metadata.file_type()) != stored.filetype {
                info!(action = "DELETED", ?path, "Entry changed type");
                manifest.filedata.remove(&key);
                stats.deleted += 1;
                changed = true;
                continue;
            }

            let Some(reason) = stored.stat.first_difference(&Stat::from_metadata(&metadata))
            else {
                debug!(action = "OK", ?path, "Entry unchanged");
                continue;
            };
            info!(action = reason.label(), ?path, "Entry changed");

            match self.archive_entry(path) {
                Ok((entry, recipe)) => {
                    if let Some(recipe) = &recipe {
                        stats.record(path, recipe);
                    }
                    manifest.filedata.insert(key, entry);
                    stats.changed += 1;
                    changed = true;
                }
                Err(err) if err.is_recoverable() => {
                    error!(?path, %err, "Skipping file, keeping stale record");
                    stats.errors += 1;
                }
                Err(err) => return Err(err),
            }
        }

        let root = manifest.path.clone();
        walk(Path::new(&root), exclude, &mut stats, |path, stats| {
            if manifest.filedata.contains_key(path.to_string_lossy().as_ref()) {
                return Ok(());
            }
            info!(action = "ADD", ?path, "New entry");
            if self.add_entry(manifest, path, stats)? {
                stats.added += 1;
                changed = true;
            }
            Ok(())
        })?;

        manifest.stoptime = Some(Timestamp::now());
        manifest.recount();
        info!(
            changed,
            deleted = stats.deleted,
            modified = stats.changed,
            added = stats.added,
            "Diff complete"
        );
        Ok(DiffOutcome { changed, stats })
    }

    /// Archive one path into `manifest`, counting the outcome.
    ///
    /// Returns whether an entry was recorded.
    fn add_entry(&self, manifest: &mut Manifest, path: &Path, stats: &mut ActionStats) -> Result<bool> {
        match self.archive_entry(path) {
            Ok((entry, recipe)) => {
                match &recipe {
                    Some(recipe) => stats.record(path, recipe),
                    None => {
                        debug!(?path, filetype = ?entry.filetype, "Recorded entry");
                        stats.special += 1;
                    }
                }
                manifest
                    .filedata
                    .insert(path.to_string_lossy().into_owned(), entry);
                Ok(true)
            }
            Err(err) if err.is_recoverable() => {
                error!(?path, %err, "Error while processing file");
                stats.errors += 1;
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Stat a path and, for regular files, store its content.
    fn archive_entry(&self, path: &Path) -> Result<(Entry, Option<FileRecipe>)> {
        let metadata = fs::symlink_metadata(path)?;
        let filetype = FileType::from(metadata.file_type());
        let stat = Stat::from_metadata(&metadata);

        let (recipe, target) = match filetype {
            FileType::File => {
                let reader = self.source.open(path)?;
                (Some(self.files.put(reader, DEFAULT_MIME_TYPE)?), None)
            }
            FileType::Symlink => {
                let target = fs::read_link(path)?;
                (None, Some(target.to_string_lossy().into_owned()))
            }
            FileType::Dir | FileType::Other => (None, None),
        };

        let entry = Entry {
            checksum: recipe.as_ref().map(|r| r.checksum),
            stat,
            filetype,
            target,
        };
        Ok((entry, recipe))
    }

    /// Store a manifest under the digest of its content.
    ///
    /// Sets `manifest.checksum` and returns it. Saving identical content
    /// again yields the same key.
    pub fn save(&self, manifest: &mut Manifest) -> Result<String> {
        let checksum = manifest.compute_checksum()?;
        manifest.checksum = Some(checksum.clone());

        let body = manifest.encode()?;
        self.store
            .put(&checksum, &body, &manifest.side_metadata())?;
        info!(%checksum, bytes = body.len(), files = manifest.totalcount, "Saved archive");
        Ok(checksum)
    }

    /// Fetch a stored manifest.
    pub fn read(&self, key: &str) -> Result<Manifest> {
        Manifest::decode(&self.store.get(key)?)
    }

    /// Every stored manifest, oldest first, optionally for one host only.
    pub fn list_backupsets(&self, hostname: Option<&str>) -> Result<Vec<BackupSet>> {
        let mut sets = Vec::new();

        for object in self.store.list()? {
            let metadata = if object.metadata.is_empty() {
                match self.store.head(&object.key)? {
                    Some(head) => head.metadata,
                    None => continue,
                }
            } else {
                object.metadata
            };

            let (Some(host), Some(tag), Some(datetime)) = (
                metadata.get("hostname"),
                metadata.get("tag"),
                metadata.get("datetime"),
            ) else {
                debug!(key = %object.key, "Object has no archive metadata");
                continue;
            };
            if hostname.is_some_and(|h| h != host.as_str()) {
                continue;
            }
            let Ok(parsed) = datetime.parse::<Timestamp>() else {
                warn!(key = %object.key, datetime, "Unparseable archive datetime");
                continue;
            };

            let (date, time) = datetime.split_once('T').unwrap_or((datetime.as_str(), ""));
            let time = time.split(&['.', 'Z', '+'][..]).next().unwrap_or_default();
            sets.push(BackupSet {
                date: date.to_string(),
                time: time.to_string(),
                datetime: parsed,
                size: object.size,
                tag: tag.clone(),
                hostname: host.clone(),
                basename: object.key,
            });
        }

        sets.sort_by(|a, b| a.datetime.cmp(&b.datetime));
        Ok(sets)
    }

    /// Key of the most recent manifest, if any.
    pub fn get_latest(&self, hostname: Option<&str>) -> Result<Option<String>> {
        Ok(self
            .list_backupsets(hostname)?
            .pop()
            .map(|set| set.basename))
    }

    /// Write a stored manifest's compressed body to a local file.
    pub fn export(&self, key: &str, path: &Path) -> Result<()> {
        let body = self.store.get(key)?;
        fs::write(path, &body)?;
        info!(key, ?path, bytes = body.len(), "Exported archive");
        Ok(())
    }

    /// Upload a manifest file written by `export`, unless already stored.
    pub fn import(&self, path: &Path) -> Result<Imported> {
        let mut manifest = Manifest::decode(&fs::read(path)?)?;
        let key = manifest.compute_checksum()?;
        if let Some(recorded) = &manifest.checksum
            && *recorded != key
        {
            return Err(Error::ChecksumMismatch {
                expected: recorded.clone(),
                actual: key,
            });
        }

        if self.store.exists(&key)? {
            info!(%key, ?path, "Archive already stored");
            return Ok(Imported { key, existed: true });
        }

        let key = self.save(&mut manifest)?;
        Ok(Imported {
            key,
            existed: false,
        })
    }
}

/// Visit every entry under `root` in name order, skipping excluded paths
/// (and everything below excluded directories).
fn walk<F>(root: &Path, exclude: &dyn Exclude, stats: &mut ActionStats, mut visit: F) -> Result<()>
where
    F: FnMut(&Path, &mut ActionStats) -> Result<()>,
{
    let mut entries = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = entries.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(path = ?err.path(), %err, "Skipping unreadable entry");
                stats.errors += 1;
                continue;
            }
        };

        let path = entry.path();
        if path.to_str().is_none() {
            // keys are UTF-8; a lossy key would never stat back
            warn!(?path, "Skipping path that is not valid UTF-8");
            stats.errors += 1;
            if entry.file_type().is_dir() {
                entries.skip_current_dir();
            }
            continue;
        }
        if exclude.is_excluded(path) {
            debug!(action = "EXCLUDE", ?path, "Excluded");
            stats.exclude += 1;
            if entry.file_type().is_dir() {
                entries.skip_current_dir();
            }
            continue;
        }

        visit(path, stats)?;
    }
    Ok(())
}
