//! Copy stored files from one file store to another.

use tracing::{debug, info, warn};

use crate::cancel::Cancel;
use crate::error::Result;
use crate::file::FileStore;
use crate::id::ContentId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Recipes copied
    pub files: usize,
    /// Recipes the target already had
    pub present: usize,
    pub blocks: usize,
    pub bytes: u64,
    pub cancelled: bool,
}

/// Copy every recipe in `source`'s cache that `target` does not have.
///
/// Blocks are copied first and the recipe last, so a recipe in the target
/// always has its blocks. Cancelling stops between objects; running again
/// picks up where it left off.
pub fn sync_files(source: &FileStore, target: &FileStore, cancel: &Cancel) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    let keys: Vec<String> = source.cache().iter().collect();
    info!(candidates = keys.len(), "Syncing files");

    'files: for key in keys {
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let Ok(checksum) = ContentId::from_hex(&key) else {
            warn!(%key, "Skipping malformed cache entry");
            continue;
        };
        if target.exists(&checksum, true)? {
            report.present += 1;
            continue;
        }

        let recipe = source.get(&checksum)?;
        for id in &recipe.blockchain {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break 'files;
            }
            // the target's cache may be shared with the source
            if target.blocks().exists_remote(id)? {
                continue;
            }
            let data = source.blocks().get(id, true)?;
            target.blocks().put(&data, false)?;
            report.blocks += 1;
            report.bytes += data.len() as u64;
            debug!(%id, bytes = data.len(), "Copied block");
        }

        target.write_recipe(&recipe)?;
        report.files += 1;
        debug!(%checksum, size = recipe.size, "Copied file");
    }

    info!(
        files = report.files,
        present = report.present,
        blocks = report.blocks,
        bytes = report.bytes,
        cancelled = report.cancelled,
        "Sync complete"
    );
    Ok(report)
}
