//! Verify an archive against storage

use clap::Args;

use cairn::{Cancel, Level, Verifier};

use super::{Context, GlobalArgs};

/// Check that an archive's files and blocks are still stored
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Archive to verify (defaults to this host's latest)
    #[arg(long, short = 'a')]
    archive: Option<String>,

    /// 0: recipes exist, 1: blocks exist, 2: download and rehash everything
    #[arg(long, short = 'l', default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    level: u8,
}

pub fn run(
    global: &GlobalArgs,
    args: VerifyArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    let key = ctx.resolve_archive(args.archive)?;
    let level = Level::try_from(args.level).map_err(|l| format!("invalid level {l}"))?;
    let manifest = ctx.engine.read(&key)?;

    let report = Verifier::new(&ctx.files, Cancel::new()).verify(&manifest, level)?;

    eprintln!("Verified {key} at level {}", args.level);
    eprintln!(
        "  Files: {} ({} unique)",
        report.files, report.unique_files
    );
    if level > Level::Fast {
        eprintln!(
            "  Blocks: {} ({} unique)",
            report.blocks, report.unique_blocks
        );
    }
    for path in &report.missing_files {
        println!("MISSING file {path}");
    }
    for id in &report.missing_blocks {
        println!("MISSING block {id}");
    }
    for id in &report.corrupt_blocks {
        println!("CORRUPT block {id}");
    }
    for id in &report.corrupt_files {
        println!("CORRUPT file {id}");
    }

    if report.is_ok() {
        eprintln!("  OK");
        Ok(())
    } else {
        Err(format!(
            "verification failed: {} missing files, {} missing blocks, {} corrupt blocks, {} corrupt files",
            report.missing_files.len(),
            report.missing_blocks.len(),
            report.corrupt_blocks.len(),
            report.corrupt_files.len()
        )
        .into())
    }
}
