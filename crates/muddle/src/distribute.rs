//! Produce a named distribution into a target directory.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use muddle_distribute::{plan, prepare_target, PlanInputs};

use crate::context::{CommandContext, Global};

#[derive(Args, Debug)]
#[command(about = "Produce a named distribution into a target directory")]
pub struct DistributeArgs {
    /// A declared distribution, or one of _source_release, _just_gpl,
    /// _open, _by_license
    pub name: String,

    /// Directory to produce the distribution in (created; must be empty)
    pub target: PathBuf,
}

pub fn execute(args: DistributeArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let builder = &ctx.loaded.builder;

    let analysis = muddle_licenses::analyze(
        &builder.ruleset,
        &ctx.loaded.licenses,
        &builder.ctx.db.all_checkouts(),
    );
    let inputs = PlanInputs {
        db: &builder.ctx.db,
        layout: &builder.ctx.layout,
        ruleset: &builder.ruleset,
        vcs: &ctx.loaded.vcs,
        registry: &ctx.loaded.distributions,
        analysis: &analysis,
    };
    let plan = plan(&inputs, &args.name, &args.target)?;

    if global.just_print {
        println!(
            "Asked to distribute '{}' to {}:",
            plan.name,
            plan.target.display()
        );
        for copy in &plan.copies {
            if copy.exclusions.is_empty() {
                println!("  {} -> {}", copy.src.display(), copy.dst.display());
            } else {
                println!(
                    "  {} -> {} (without {})",
                    copy.src.display(),
                    copy.dst.display(),
                    copy.exclusions.join(", ")
                );
            }
        }
        return Ok(());
    }

    prepare_target(&args.target)?;
    plan.execute()?;
    for label in &plan.distributed {
        builder.ctx.db.set_tag(label)?;
    }
    println!(
        "Distributed '{}' to {}",
        plan.name,
        plan.target.display()
    );
    Ok(())
}
