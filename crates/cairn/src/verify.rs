//! Check that everything a manifest refers to is still in storage.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::cancel::Cancel;
use crate::error::{Error, Result};
use crate::file::{FileRecipe, FileStore};
use crate::id::{ContentHasher, ContentId};
use crate::manifest::Manifest;

/// How thoroughly to verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Recipes exist
    Fast = 0,
    /// Recipes and every block they name exist
    Medium = 1,
    /// Every block downloads and hashes back to its identity
    Full = 2,
}

impl TryFrom<u8> for Level {
    type Error = u8;

    fn try_from(level: u8) -> Result<Self, u8> {
        match level {
            0 => Ok(Level::Fast),
            1 => Ok(Level::Medium),
            2 => Ok(Level::Full),
            other => Err(other),
        }
    }
}

/// Tallies and findings of one verification run.
///
/// Raw counts include every occurrence; the `unique_` counts and the
/// problem lists count each identity once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub files: usize,
    pub unique_files: usize,
    pub blocks: usize,
    pub unique_blocks: usize,
    /// Manifest paths whose recipe is missing
    pub missing_files: Vec<String>,
    pub missing_blocks: BTreeSet<ContentId>,
    /// Blocks whose content does not hash to their identity
    pub corrupt_blocks: BTreeSet<ContentId>,
    /// Recipes whose blocks do not reassemble to the recipe checksum
    pub corrupt_files: BTreeSet<ContentId>,
    pub cancelled: bool,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.missing_files.is_empty()
            && self.missing_blocks.is_empty()
            && self.corrupt_blocks.is_empty()
            && self.corrupt_files.is_empty()
    }
}

/// Verifies manifests against one file store.
pub struct Verifier<'a> {
    files: &'a FileStore,
    cancel: Cancel,
    present: HashMap<ContentId, bool>,
    recipes: HashMap<ContentId, Option<FileRecipe>>,
    blocks: HashMap<ContentId, bool>,
    downloaded: HashSet<ContentId>,
}

impl<'a> Verifier<'a> {
    pub fn new(files: &'a FileStore, cancel: Cancel) -> Self {
        Self {
            files,
            cancel,
            present: HashMap::new(),
            recipes: HashMap::new(),
            blocks: HashMap::new(),
            downloaded: HashSet::new(),
        }
    }

    /// Verify every regular file in `manifest` at the given level.
    ///
    /// Entries without content (directories, symlinks) are not checked.
    /// Cancelling stops between files and returns the partial report.
    pub fn verify(&mut self, manifest: &Manifest, level: Level) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let mut seen_files = HashSet::new();
        let mut seen_blocks = HashSet::new();
        info!(path = %manifest.path, ?level, entries = manifest.filedata.len(), "Verifying archive");

        for (path, entry) in &manifest.filedata {
            if self.cancel.is_cancelled() {
                warn!("Verification cancelled");
                report.cancelled = true;
                break;
            }
            let Some(checksum) = entry.checksum else {
                continue;
            };

            report.files += 1;
            let first_time = seen_files.insert(checksum);

            if level == Level::Fast {
                if self.file_exists(&checksum)? {
                    debug!(status = "EXISTS", ?path, %checksum, "File");
                } else {
                    warn!(status = "MISSING", ?path, %checksum, "File");
                    report.missing_files.push(path.clone());
                }
                continue;
            }

            let Some(recipe) = self.recipe(&checksum)? else {
                warn!(status = "MISSING", ?path, %checksum, "File");
                report.missing_files.push(path.clone());
                continue;
            };
            debug!(status = "EXISTS", ?path, %checksum, "File");

            for id in &recipe.blockchain {
                report.blocks += 1;
                seen_blocks.insert(*id);
                if self.block_exists(id)? {
                    debug!(status = "EXISTS", %id, "Block");
                } else if report.missing_blocks.insert(*id) {
                    warn!(status = "MISSING", %id, ?path, "Block");
                }
            }

            if level == Level::Full && first_time {
                self.download(&recipe, &mut report)?;
            }
        }

        report.unique_files = seen_files.len();
        report.unique_blocks = seen_blocks.len();
        info!(
            files = report.files,
            unique_files = report.unique_files,
            blocks = report.blocks,
            unique_blocks = report.unique_blocks,
            missing_files = report.missing_files.len(),
            missing_blocks = report.missing_blocks.len(),
            corrupt_blocks = report.corrupt_blocks.len(),
            corrupt_files = report.corrupt_files.len(),
            "Verification complete"
        );
        Ok(report)
    }

    fn file_exists(&mut self, checksum: &ContentId) -> Result<bool> {
        if let Some(&known) = self.present.get(checksum) {
            return Ok(known);
        }
        let found = self.files.exists(checksum, true)?;
        self.present.insert(*checksum, found);
        Ok(found)
    }

    fn recipe(&mut self, checksum: &ContentId) -> Result<Option<FileRecipe>> {
        if let Some(known) = self.recipes.get(checksum) {
            return Ok(known.clone());
        }
        let recipe = if self.file_exists(checksum)? {
            match self.files.get(checksum) {
                Ok(recipe) => Some(recipe),
                Err(Error::NotFound(_)) => None,
                Err(err) => return Err(err),
            }
        } else {
            None
        };
        self.recipes.insert(*checksum, recipe.clone());
        Ok(recipe)
    }

    fn block_exists(&mut self, id: &ContentId) -> Result<bool> {
        if let Some(&known) = self.blocks.get(id) {
            return Ok(known);
        }
        let found = self.files.blocks().exists_remote(id)?;
        self.blocks.insert(*id, found);
        Ok(found)
    }

    /// Download every block of a recipe and rehash the whole stream.
    fn download(&mut self, recipe: &FileRecipe, report: &mut VerifyReport) -> Result<()> {
        let blocks = self.files.blocks();
        let mut hasher = ContentHasher::new();
        let mut complete = true;

        for id in &recipe.blockchain {
            if report.missing_blocks.contains(id) {
                complete = false;
                continue;
            }
            match blocks.get(id, true) {
                Ok(data) => {
                    hasher.update(&data);
                    if self.downloaded.insert(*id) {
                        debug!(%id, bytes = data.len(), "Block verified");
                    }
                }
                Err(Error::ChecksumMismatch { actual, .. }) => {
                    if report.corrupt_blocks.insert(*id) {
                        warn!(status = "CORRUPT", %id, %actual, "Block");
                    }
                    complete = false;
                }
                Err(Error::NotFound(_)) => {
                    report.missing_blocks.insert(*id);
                    complete = false;
                }
                Err(err) => return Err(err),
            }
        }

        if complete && hasher.finalize() != recipe.checksum {
            warn!(status = "CORRUPT", checksum = %recipe.checksum, "File does not reassemble");
            report.corrupt_files.insert(recipe.checksum);
        }
        Ok(())
    }
}
