//! Check stored objects against their keys

use clap::Args;

use cairn::Cancel;

use super::{Context, GlobalArgs};

/// Download every stored block and recipe and check it matches its key
#[derive(Args, Debug)]
pub struct ScrubArgs {
    /// Skip blocks, only check recipes
    #[arg(long)]
    recipes_only: bool,
}

pub fn run(
    global: &GlobalArgs,
    args: ScrubArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ctx = Context::open(global)?;
    let mut bad = 0;

    let recipes = ctx.files.scrub()?;
    for key in &recipes {
        println!("BAD recipe {key}");
    }
    bad += recipes.len();

    if !args.recipes_only {
        let report = ctx.blocks.scrub(&Cancel::new())?;
        for key in &report.mismatched {
            println!("BAD block {key}");
        }
        for key in &report.oversized {
            println!("OVERSIZED block {key}");
        }
        eprintln!("Checked {} blocks", report.checked);
        if !report.foreign.is_empty() {
            eprintln!("  {} objects are not blocks", report.foreign.len());
        }
        bad += report.mismatched.len() + report.oversized.len();
    }

    if bad > 0 {
        return Err(format!("{bad} bad objects").into());
    }
    eprintln!("Storage OK");
    Ok(())
}
