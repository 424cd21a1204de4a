//! Restore archives to disk

use std::path::PathBuf;

use clap::Args;

use super::{Context, GlobalArgs};

/// Restore a whole archive under a target directory
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Directory to restore into
    target: PathBuf,

    /// Archive to restore (defaults to this host's latest)
    #[arg(long, short = 'a')]
    archive: Option<String>,

    /// Replace files that already exist
    #[arg(long, short = 'f')]
    overwrite: bool,
}

pub fn run_restore(
    global: &GlobalArgs,
    args: RestoreArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    let key = ctx.resolve_archive(args.archive)?;
    let manifest = ctx.engine.read(&key)?;

    let stats = cairn::restore(&ctx.files, &manifest, &args.target, args.overwrite)?;
    eprintln!("Restored {key} to {:?}", args.target);
    eprintln!(
        "  Created: {}, replaced: {}, skipped: {}, failed: {}",
        stats.created, stats.replaced, stats.skipped, stats.failed
    );
    if stats.metadata_errors > 0 {
        eprintln!("  Metadata not fully restored: {} changes", stats.metadata_errors);
    }
    if stats.failed > 0 {
        return Err(format!("{} entries could not be restored", stats.failed).into());
    }
    Ok(())
}

/// Restore one entry into a directory under its base name
#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Entry path, absolute or relative to the archived root
    entry: String,

    /// Directory to extract into
    target: PathBuf,

    /// Archive to extract from (defaults to this host's latest)
    #[arg(long, short = 'a')]
    archive: Option<String>,

    /// Replace the file if it already exists
    #[arg(long, short = 'f')]
    overwrite: bool,
}

pub fn run_extract(
    global: &GlobalArgs,
    args: ExtractArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    let key = ctx.resolve_archive(args.archive)?;
    let manifest = ctx.engine.read(&key)?;

    let outcome = cairn::restore_single(
        &ctx.files,
        &manifest,
        &args.entry,
        &args.target,
        args.overwrite,
    )?;
    eprintln!("{}: {:?}", args.entry, outcome);
    Ok(())
}
