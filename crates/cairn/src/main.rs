use clap::{Parser, Subcommand};
use lloggs::LoggingArgs;

mod commands;

use commands::GlobalArgs;

#[derive(Parser)]
#[command(name = "cairn")]
#[command(about = "Deduplicating backups over a key/blob store")]
struct Args {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Create(commands::archive::CreateArgs),
    Diff(commands::archive::DiffArgs),
    List(commands::list::ListArgs),
    Ls(commands::list::LsArgs),
    Verify(commands::verify::VerifyArgs),
    Restore(commands::restore::RestoreArgs),
    Extract(commands::restore::ExtractArgs),
    PutFile(commands::blob::PutFileArgs),
    GetFile(commands::blob::GetFileArgs),
    PurgeCache(commands::cache::PurgeCacheArgs),
    RebuildCache(commands::cache::RebuildCacheArgs),
    Scrub(commands::scrub::ScrubArgs),
    Export(commands::transfer::ExportArgs),
    Import(commands::transfer::ImportArgs),
    Sync(commands::transfer::SyncArgs),
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    let _guard = args.logging.setup(|v| match v {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    })?;

    let global = &args.global;
    match args.command {
        Command::Create(a) => commands::archive::run_create(global, a),
        Command::Diff(a) => commands::archive::run_diff(global, a),
        Command::List(a) => commands::list::run_list(global, a),
        Command::Ls(a) => commands::list::run_ls(global, a),
        Command::Verify(a) => commands::verify::run(global, a),
        Command::Restore(a) => commands::restore::run_restore(global, a),
        Command::Extract(a) => commands::restore::run_extract(global, a),
        Command::PutFile(a) => commands::blob::run_put(global, a),
        Command::GetFile(a) => commands::blob::run_get(global, a),
        Command::PurgeCache(a) => commands::cache::run_purge(global, a),
        Command::RebuildCache(a) => commands::cache::run_rebuild(global, a),
        Command::Scrub(a) => commands::scrub::run(global, a),
        Command::Export(a) => commands::transfer::run_export(global, a),
        Command::Import(a) => commands::transfer::run_import(global, a),
        Command::Sync(a) => commands::transfer::run_sync(global, a),
    }
}
