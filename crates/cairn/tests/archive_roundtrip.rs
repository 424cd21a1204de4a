//! End-to-end tests over the filesystem blob store.
//!
//! Each test builds the three buckets and persistent caches inside a
//! temporary directory and drives the engine the way the binary does.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use cairn::{
    ArchiveEngine, BlockConfig, BlockStore, Cancel, ChecksumCache, ContentId, FileStore, Level,
    PatternList, Verifier, restore,
};
use cairn_store::FsBlobStore;

const MIB: usize = 1024 * 1024;

struct Harness {
    dir: TempDir,
    blocks: Arc<FsBlobStore>,
    files: Arc<FileStore>,
    engine: ArchiveEngine,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let open = |name: &str| {
            let store = FsBlobStore::new(dir.path().join("storage").join(name));
            store.init().unwrap();
            Arc::new(store)
        };
        let cache = |name: &str| {
            ChecksumCache::open(dir.path().join("cache").join(format!("{name}.db"))).unwrap()
        };

        let blocks = open("blockstorage");
        let block_store = Arc::new(BlockStore::new(
            blocks.clone(),
            cache("blocks"),
            BlockConfig::default(),
        ));
        let files = Arc::new(FileStore::new(
            block_store,
            open("filestorage"),
            cache("files"),
        ));
        let engine = ArchiveEngine::new(files.clone(), open("webstorage"), "testbox");

        Self {
            dir,
            blocks,
            files,
            engine,
        }
    }

    fn source(&self) -> PathBuf {
        let src = self.dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        src
    }
}

/// Bytes that never repeat at block granularity.
fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

fn keep_all(_: &Path) -> bool {
    false
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn create_diff_delete() {
    let h = Harness::new();
    let src = h.source();
    fs::write(src.join("big.bin"), noise(2 * MIB, 42)).unwrap();
    fs::create_dir(src.join("empty")).unwrap();

    let (mut manifest, stats) = h.engine.create(&src, &keep_all, "src").unwrap();
    assert_eq!(manifest.totalcount, 2);
    let dir_size = fs::symlink_metadata(src.join("empty")).unwrap().len();
    assert_eq!(manifest.totalsize, 2 * MIB as u64 + dir_size);
    assert_eq!(stats.blocks_stored, 2);
    assert_eq!(stats.put, 1);
    assert_eq!(stats.fdedup, 0);
    assert_eq!(stats.bdedup, 0);

    let unchanged = h.engine.diff(&mut manifest, &keep_all).unwrap();
    assert!(!unchanged.changed);

    fs::remove_file(src.join("big.bin")).unwrap();
    let outcome = h.engine.diff(&mut manifest, &keep_all).unwrap();
    assert!(outcome.changed);
    assert_eq!(manifest.totalcount, 1);
    assert!(!manifest.filedata.contains_key(&key(&src.join("big.bin"))));
}

#[test]
fn second_archive_deduplicates() {
    let h = Harness::new();
    let src = h.source();
    let data = noise(MIB + 100, 7);
    fs::write(src.join("a"), &data).unwrap();

    let (_, first) = h.engine.create(&src, &keep_all, "src").unwrap();
    assert_eq!(first.blocks_stored, 2);

    let mut edited = data.clone();
    edited.truncate(MIB);
    edited.extend_from_slice(b"a different tail");
    fs::write(src.join("b"), &edited).unwrap();

    let (_, second) = h.engine.create(&src, &keep_all, "src").unwrap();
    assert_eq!(second.fdedup, 1);
    assert_eq!(second.bdedup, 1);
    assert_eq!(second.blocks_stored, 1);
}

#[test]
fn modifying_one_file_touches_one_entry() {
    let h = Harness::new();
    let src = h.source();
    fs::write(src.join("keep"), b"unchanged").unwrap();
    fs::write(src.join("edit"), b"before").unwrap();

    let (mut manifest, _) = h.engine.create(&src, &keep_all, "src").unwrap();
    let first_key = h.engine.save(&mut manifest).unwrap();
    let keep_before = manifest.filedata[&key(&src.join("keep"))].clone();

    fs::write(src.join("edit"), b"after, and longer").unwrap();
    let outcome = h.engine.diff(&mut manifest, &keep_all).unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.stats.changed, 1);
    assert_eq!(manifest.filedata[&key(&src.join("keep"))], keep_before);

    let second_key = h.engine.save(&mut manifest).unwrap();
    assert_ne!(first_key, second_key);
    assert_eq!(h.engine.save(&mut manifest).unwrap(), second_key);

    // earlier versions stay addressable
    assert_eq!(h.engine.read(&first_key).unwrap().filedata.len(), 2);
    assert_eq!(h.engine.get_latest(Some("testbox")).unwrap(), Some(second_key));
}

#[test]
fn verification_levels_are_independent() {
    let h = Harness::new();
    let src = h.source();
    let data = noise(2 * MIB, 9);
    fs::write(src.join("big.bin"), &data).unwrap();
    let (manifest, _) = h.engine.create(&src, &keep_all, "src").unwrap();

    let fast = Verifier::new(&h.files, Cancel::new())
        .verify(&manifest, Level::Fast)
        .unwrap();
    assert!(fast.missing_files.is_empty());
    assert_eq!(fast.files, 1);

    let gone = ContentId::hash(&data[MIB..]);
    assert!(h.blocks.remove(&gone.as_hex()).unwrap());

    let fast = Verifier::new(&h.files, Cancel::new())
        .verify(&manifest, Level::Fast)
        .unwrap();
    assert!(fast.missing_files.is_empty());

    let medium = Verifier::new(&h.files, Cancel::new())
        .verify(&manifest, Level::Medium)
        .unwrap();
    assert_eq!(medium.blocks, 2);
    assert_eq!(medium.missing_blocks.len(), 1);
    assert!(medium.missing_blocks.contains(&gone));
}

#[test]
fn restore_reproduces_tree() {
    let h = Harness::new();
    let src = h.source();
    fs::create_dir_all(src.join("docs/old")).unwrap();
    fs::write(src.join("docs/readme"), b"read me").unwrap();
    fs::write(src.join("docs/old/notes"), noise(MIB + 3, 5)).unwrap();
    fs::write(src.join("skip.tmp"), b"scratch").unwrap();

    let exclude = PatternList::parse("# scratch files\n- .tmp\n");
    let (mut manifest, stats) = h.engine.create(&src, &exclude, "src").unwrap();
    assert_eq!(stats.exclude, 1);
    let key = h.engine.save(&mut manifest).unwrap();

    let stored = h.engine.read(&key).unwrap();
    let out = h.dir.path().join("out");
    let restored = restore(&h.files, &stored, &out, false).unwrap();
    assert_eq!(restored.failed, 0);

    assert_eq!(fs::read(out.join("docs/readme")).unwrap(), b"read me");
    assert_eq!(
        fs::read(out.join("docs/old/notes")).unwrap(),
        noise(MIB + 3, 5)
    );
    assert!(!out.join("skip.tmp").exists());
}

#[test]
fn caches_survive_reopen_and_rebuild() {
    let h = Harness::new();
    let src = h.source();
    fs::write(src.join("a"), b"persisted").unwrap();
    h.engine.create(&src, &keep_all, "src").unwrap();

    let reopened = ChecksumCache::open(h.dir.path().join("cache/files.db")).unwrap();
    assert_eq!(reopened.len(), 1);

    h.files.purge_cache().unwrap();
    assert!(h.files.cache().is_empty());
    assert!(h.files.blocks().cache().is_empty());

    let (files, blocks) = h.files.rebuild_cache().unwrap();
    assert_eq!((files, blocks), (1, 1));

    // known again, so the second put is a file-level dedup
    let recipe = h.files.put(&b"persisted"[..], "text/plain").unwrap();
    assert!(recipe.filehash_exists);
}
