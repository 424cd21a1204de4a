//! Move archive manifests in and out of storage

use std::path::PathBuf;

use clap::Args;

use cairn::Config;

use super::{Context, GlobalArgs};

/// Write an archive manifest to a local file
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Output file (gzip-compressed JSON)
    output: PathBuf,

    /// Archive to export (defaults to this host's latest)
    #[arg(long, short = 'a')]
    archive: Option<String>,
}

pub fn run_export(
    global: &GlobalArgs,
    args: ExportArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    let key = ctx.resolve_archive(args.archive)?;
    ctx.engine.export(&key, &args.output)?;
    eprintln!("Exported {key} to {:?}", args.output);
    Ok(())
}

/// Upload an exported archive manifest
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// File written by export
    input: PathBuf,
}

pub fn run_import(
    global: &GlobalArgs,
    args: ImportArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    let imported = ctx.engine.import(&args.input)?;
    if imported.existed {
        eprintln!("Archive {} already stored", imported.key);
    } else {
        eprintln!("Imported archive {}", imported.key);
    }
    println!("{}", imported.key);
    Ok(())
}

/// Copy every stored file to another storage root
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Storage root to copy into
    target_storage: PathBuf,
}

pub fn run_sync(
    global: &GlobalArgs,
    args: SyncArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = global.load_config()?;
    let source = Context::from_config(config.clone())?;
    let target = Context::from_config(target_config(config, args.target_storage.clone()))?;

    let report = cairn::sync_files(&source.files, &target.files, &cairn::Cancel::new())?;
    eprintln!(
        "Copied {} files ({} blocks, {} bytes) to {:?}; {} already present",
        report.files, report.blocks, report.bytes, args.target_storage, report.present
    );
    Ok(())
}

/// Config for a sync target: same settings, caches under the target root.
fn target_config(source: Config, target_storage: PathBuf) -> Config {
    Config {
        storage: Some(target_storage),
        cache_dir: None,
        ..source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_target_does_not_share_caches() {
        let dir = tempfile::tempdir().unwrap();
        let source = Config {
            storage: Some(dir.path().join("a")),
            cache_dir: Some(dir.path().join("shared")),
            ..Config::default()
        };
        let target = target_config(source.clone(), dir.path().join("b"));

        let source = Context::from_config(source).unwrap();
        let target = Context::from_config(target).unwrap();
        assert!(source.blocks.cache().path().unwrap().starts_with(dir.path().join("shared")));
        assert!(target.blocks.cache().path().unwrap().starts_with(dir.path().join("b/.cache")));
        assert!(target.files.cache().path().unwrap().starts_with(dir.path().join("b/.cache")));
    }
}
