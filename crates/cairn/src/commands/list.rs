//! Show archives and their contents

use clap::Args;

use cairn::FileType;

use super::{Context, GlobalArgs};

/// List stored archives, oldest first
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Include archives from every host
    #[arg(long)]
    all_hosts: bool,
}

pub fn run_list(
    global: &GlobalArgs,
    args: ListArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    let host = (!args.all_hosts).then(|| ctx.engine.hostname());
    let sets = ctx.engine.list_backupsets(host)?;

    for set in &sets {
        println!(
            "{} {} {:>12} {:<16} {:<16} {}",
            set.date, set.time, set.size, set.hostname, set.tag, set.basename
        );
    }
    eprintln!("{} archive(s)", sets.len());
    Ok(())
}

/// List the entries of one archive
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Archive to show (defaults to this host's latest)
    #[arg(long, short = 'a')]
    archive: Option<String>,
}

pub fn run_ls(
    global: &GlobalArgs,
    args: LsArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    let key = ctx.resolve_archive(args.archive)?;
    let manifest = ctx.engine.read(&key)?;

    for (path, entry) in &manifest.filedata {
        let kind = match entry.filetype {
            FileType::File => 'f',
            FileType::Dir => 'd',
            FileType::Symlink => 'l',
            FileType::Other => '?',
        };
        match &entry.target {
            Some(target) => println!("{kind} {:o} {:>12} {path} -> {target}", entry.stat.mode & 0o7777, entry.stat.size),
            None => println!("{kind} {:o} {:>12} {path}", entry.stat.mode & 0o7777, entry.stat.size),
        }
    }
    eprintln!(
        "{} entries, {} bytes, tag {}, host {}, taken {}",
        manifest.totalcount, manifest.totalsize, manifest.tag, manifest.hostname, manifest.datetime
    );
    Ok(())
}
