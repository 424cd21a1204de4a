//! Cairn - deduplicating backup engine
//!
//! Files are cut into fixed-size blocks stored once by content identity,
//! whole files are stored once as recipes over those blocks, and directory
//! trees are captured as manifests that can be diffed, verified and
//! restored. Storage goes through the `cairn_store::BlobStore` trait.

pub mod archive;
pub mod block;
pub mod cancel;
pub mod checksums;
pub mod config;
pub mod error;
pub mod exclude;
pub mod file;
pub mod id;
pub mod manifest;
pub mod restore;
pub mod sync;
pub mod verify;

pub use archive::{ActionStats, ArchiveEngine, BackupSet, DiffOutcome, Imported, LocalSource, Source};
pub use block::{BlockStore, PutStatus, ScrubReport};
pub use cancel::Cancel;
pub use checksums::ChecksumCache;
pub use config::{BlockConfig, Buckets, CacheMode, Config, DEFAULT_BLOCK_SIZE};
pub use error::{Error, Result};
pub use exclude::{Exclude, PatternList};
pub use file::{BlockReader, DEFAULT_MIME_TYPE, FileRecipe, FileStore, PutAction};
pub use id::{ContentHasher, ContentId};
pub use manifest::{ChangeReason, Entry, FileType, Manifest, Stat};
pub use restore::{Outcome, RestoreStats, restore, restore_single};
pub use sync::{SyncReport, sync_files};
pub use verify::{Level, Verifier, VerifyReport};
