//! Store and fetch single files without an archive

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::Args;

use cairn::{ContentId, DEFAULT_MIME_TYPE};

use super::{Context, GlobalArgs};

/// Store one file and print its checksum
#[derive(Args, Debug)]
pub struct PutFileArgs {
    /// File to store
    path: PathBuf,

    /// MIME type recorded in the recipe
    #[arg(long, default_value = DEFAULT_MIME_TYPE)]
    mime_type: String,
}

pub fn run_put(
    global: &GlobalArgs,
    args: PutFileArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    let recipe = ctx.files.put(File::open(&args.path)?, &args.mime_type)?;

    eprintln!(
        "{} {:?}: {} bytes in {} blocks ({} new)",
        recipe.action().label(),
        args.path,
        recipe.size,
        recipe.blockchain.len(),
        recipe.blocks_stored()
    );
    println!("{}", recipe.checksum);
    Ok(())
}

/// Write a stored file to disk or stdout
#[derive(Args, Debug)]
pub struct GetFileArgs {
    /// Checksum printed by put-file
    checksum: ContentId,

    /// Output file (stdout if omitted)
    output: Option<PathBuf>,

    /// Rehash every block as it is read
    #[arg(long)]
    verify: bool,
}

pub fn run_get(
    global: &GlobalArgs,
    args: GetFileArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    let mut reader = ctx.files.read(&args.checksum)?;
    if args.verify {
        reader = reader.verified();
    }

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };
    for block in reader {
        out.write_all(&block?)?;
    }
    out.flush()?;
    Ok(())
}
