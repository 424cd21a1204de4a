//! Create and update archives

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use cairn::ActionStats;

use super::{Context, GlobalArgs, load_exclude};

/// Snapshot a directory tree into a new archive
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Directory to archive
    source_path: PathBuf,

    /// Tag recorded with the archive (defaults to the directory name)
    #[arg(long, short = 't')]
    tag: Option<String>,

    /// Exclude file with `- pattern` lines
    #[arg(long, short = 'x')]
    exclude_file: Option<PathBuf>,
}

pub fn run_create(
    global: &GlobalArgs,
    args: CreateArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    let source_path = args.source_path.canonicalize()?;
    let exclude = load_exclude(args.exclude_file.as_ref())?;
    let tag = args.tag.unwrap_or_else(|| {
        source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".into())
    });

    let (mut manifest, stats) = ctx.engine.create(&source_path, &*exclude, &tag)?;
    let key = ctx.engine.save(&mut manifest)?;

    eprintln!("Archive {key}");
    eprintln!("  Entries: {}", manifest.totalcount);
    eprintln!("  Total size: {} bytes", manifest.totalsize);
    print_stats(&stats);
    println!("{key}");
    Ok(())
}

/// Re-snapshot an archive's tree, storing only what changed
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Archive to update (defaults to this host's latest)
    #[arg(long, short = 'a')]
    archive: Option<String>,

    /// Exclude file with `- pattern` lines
    #[arg(long, short = 'x')]
    exclude_file: Option<PathBuf>,
}

pub fn run_diff(
    global: &GlobalArgs,
    args: DiffArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    let base = ctx.resolve_archive(args.archive)?;
    let exclude = load_exclude(args.exclude_file.as_ref())?;

    let mut manifest = ctx.engine.read(&base)?;
    info!(%base, path = %manifest.path, "Updating archive");
    let outcome = ctx.engine.diff(&mut manifest, &*exclude)?;

    if !outcome.changed {
        eprintln!("No changes since {base}");
        println!("{base}");
        return Ok(());
    }

    let key = ctx.engine.save(&mut manifest)?;
    eprintln!("Archive {key} (from {base})");
    eprintln!(
        "  Deleted: {}, changed: {}, added: {}",
        outcome.stats.deleted, outcome.stats.changed, outcome.stats.added
    );
    eprintln!("  Entries: {}", manifest.totalcount);
    print_stats(&outcome.stats);
    println!("{key}");
    Ok(())
}

fn print_stats(stats: &ActionStats) {
    eprintln!(
        "  Files: {} put, {} file-dedup, {} block-dedup",
        stats.put, stats.fdedup, stats.bdedup
    );
    eprintln!("  Blocks stored: {}", stats.blocks_stored);
    if stats.exclude > 0 {
        eprintln!("  Excluded: {}", stats.exclude);
    }
    if stats.errors > 0 {
        eprintln!("  Errors: {} (see log)", stats.errors);
    }
}
