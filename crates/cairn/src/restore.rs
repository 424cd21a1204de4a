//! Rebuild files on disk from a manifest.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Path, PathBuf};

use nix::sys::stat::utimes;
use nix::sys::time::{TimeVal, TimeValLike};
use nix::unistd::{Gid, Uid, chown};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::file::FileStore;
use crate::manifest::{Entry, FileType, Manifest, Stat};

/// What happened to one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Replaced,
    /// Target existed and overwrite was off, or the entry kind cannot be restored
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreStats {
    pub created: usize,
    pub replaced: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Ownership, mode or time changes that could not be applied
    pub metadata_errors: usize,
}

impl RestoreStats {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Replaced => self.replaced += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

/// Restore every entry of `manifest` under `target_root`.
///
/// Paths are mapped by replacing the manifest root with `target_root` and
/// processed in path order. Existing targets are kept unless `overwrite`.
/// A file whose content cannot be read or written is logged and counted as
/// failed; restoring ownership, mode and times is best effort.
pub fn restore(
    files: &FileStore,
    manifest: &Manifest,
    target_root: &Path,
    overwrite: bool,
) -> Result<RestoreStats> {
    info!(from = %manifest.path, to = ?target_root, overwrite, "Restoring archive");
    let mut stats = RestoreStats::default();
    let mut dirs = Vec::new();

    for (name, entry) in &manifest.filedata {
        let Some(target) = target_path(manifest, name, target_root) else {
            warn!(?name, "Entry outside archive root, skipping");
            stats.skipped += 1;
            continue;
        };

        match restore_entry(files, entry, &target, overwrite) {
            Ok(outcome) => {
                if outcome != Outcome::Skipped {
                    match entry.filetype {
                        FileType::Dir => dirs.push((target, entry.stat)),
                        FileType::File => {
                            stats.metadata_errors += restore_metadata(&target, &entry.stat);
                        }
                        _ => {}
                    }
                }
                stats.add(outcome);
            }
            Err(err) if is_per_file(&err) => {
                error!(?target, %err, "Failed to restore entry");
                stats.failed += 1;
            }
            Err(err) => return Err(err),
        }
    }

    // Children first, so writing into a directory cannot disturb its times.
    for (path, stat) in dirs.iter().rev() {
        stats.metadata_errors += restore_metadata(path, stat);
    }

    info!(
        created = stats.created,
        replaced = stats.replaced,
        skipped = stats.skipped,
        failed = stats.failed,
        metadata_errors = stats.metadata_errors,
        "Restore complete"
    );
    Ok(stats)
}

/// Restore one entry into `target_root` under its base name.
///
/// `entry_name` is either the recorded absolute path or a path relative to
/// the manifest root.
pub fn restore_single(
    files: &FileStore,
    manifest: &Manifest,
    entry_name: &str,
    target_root: &Path,
    overwrite: bool,
) -> Result<Outcome> {
    let (name, entry) = find_entry(manifest, entry_name)
        .ok_or_else(|| Error::EntryNotFound(entry_name.to_string()))?;
    let base = Path::new(name)
        .file_name()
        .ok_or_else(|| Error::EntryNotFound(entry_name.to_string()))?;

    fs::create_dir_all(target_root)?;
    let target = target_root.join(base);
    let outcome = restore_entry(files, entry, &target, overwrite)?;
    if matches!(entry.filetype, FileType::Dir | FileType::File) && outcome != Outcome::Skipped {
        restore_metadata(&target, &entry.stat);
    }
    info!(?name, ?target, ?outcome, "Restored entry");
    Ok(outcome)
}

fn find_entry<'m>(manifest: &'m Manifest, entry_name: &str) -> Option<(&'m str, &'m Entry)> {
    if let Some((name, entry)) = manifest.filedata.get_key_value(entry_name) {
        return Some((name, entry));
    }
    let joined = Path::new(&manifest.path).join(entry_name);
    manifest
        .filedata
        .get_key_value(joined.to_string_lossy().as_ref())
        .map(|(name, entry)| (name.as_str(), entry))
}

fn is_per_file(err: &Error) -> bool {
    err.is_recoverable() || matches!(err, Error::NotFound(_) | Error::ChecksumMismatch { .. })
}

fn restore_entry(files: &FileStore, entry: &Entry, target: &Path, overwrite: bool) -> Result<Outcome> {
    let existing = fs::symlink_metadata(target).ok();

    if entry.filetype == FileType::Dir {
        return match existing {
            Some(meta) if meta.is_dir() => Ok(Outcome::Skipped),
            Some(_) if !overwrite => Ok(Outcome::Skipped),
            Some(_) => {
                fs::remove_file(target)?;
                fs::create_dir_all(target)?;
                Ok(Outcome::Replaced)
            }
            None => {
                fs::create_dir_all(target)?;
                Ok(Outcome::Created)
            }
        };
    }

    let outcome = match existing {
        Some(_) if !overwrite => {
            debug!(?target, "Target exists, skipping");
            return Ok(Outcome::Skipped);
        }
        Some(_) => Outcome::Replaced,
        None => Outcome::Created,
    };

    let parent = target.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    match entry.filetype {
        FileType::File => {
            let Some(checksum) = entry.checksum else {
                warn!(?target, "File entry without checksum, skipping");
                return Ok(Outcome::Skipped);
            };

            let mut tmp = NamedTempFile::new_in(parent)?;
            let mut written = 0u64;
            for block in files.read(&checksum)? {
                let block = block?;
                tmp.write_all(&block)?;
                written += block.len() as u64;
            }
            tmp.flush()?;
            tmp.persist(target).map_err(|e| e.error)?;
            debug!(?target, %checksum, bytes = written, "Wrote file");
        }
        FileType::Symlink => {
            let Some(link) = &entry.target else {
                warn!(?target, "Symlink entry without target, skipping");
                return Ok(Outcome::Skipped);
            };
            if outcome == Outcome::Replaced {
                remove_existing(target)?;
            }
            symlink(link, target)?;
            debug!(?target, ?link, "Created symlink");
        }
        FileType::Dir | FileType::Other => {
            debug!(?target, "Special file, not restored");
            return Ok(Outcome::Skipped);
        }
    }

    Ok(outcome)
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Apply recorded ownership, mode and times.
///
/// Failures are logged and counted, never raised.
fn restore_metadata(path: &Path, stat: &Stat) -> usize {
    let mut failures = 0;
    if let Err(err) = chown(
        path,
        Some(Uid::from_raw(stat.uid)),
        Some(Gid::from_raw(stat.gid)),
    ) {
        debug!(?path, %err, uid = stat.uid, gid = stat.gid, "Could not restore ownership");
        failures += 1;
    }

    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(stat.mode & 0o7777)) {
        warn!(?path, %err, "Could not restore mode");
        failures += 1;
    }

    let atime = TimeVal::nanoseconds(stat.atime);
    let mtime = TimeVal::nanoseconds(stat.mtime);
    if let Err(err) = utimes(path, &atime, &mtime) {
        warn!(?path, %err, "Could not restore times");
        failures += 1;
    }
    failures
}

/// Where `restore` would put a manifest entry.
pub fn target_path(manifest: &Manifest, name: &str, target_root: &Path) -> Option<PathBuf> {
    Path::new(name)
        .strip_prefix(&manifest.path)
        .ok()
        .map(|relative| target_root.join(relative))
}
