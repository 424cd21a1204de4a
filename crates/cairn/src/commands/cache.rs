//! Checksum cache maintenance

use clap::Args;

use super::{Context, GlobalArgs};

/// Delete the local checksum caches
#[derive(Args, Debug)]
pub struct PurgeCacheArgs {}

pub fn run_purge(
    global: &GlobalArgs,
    _args: PurgeCacheArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    ctx.files.purge_cache()?;
    eprintln!("Caches purged");
    Ok(())
}

/// Refill the checksum caches from storage listings
#[derive(Args, Debug)]
pub struct RebuildCacheArgs {}

pub fn run_rebuild(
    global: &GlobalArgs,
    _args: RebuildCacheArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    let (files, blocks) = ctx.files.rebuild_cache()?;
    eprintln!("Added {files} files and {blocks} blocks to the caches");
    Ok(())
}
