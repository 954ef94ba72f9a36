//! The package-category commands: build, configure, clean, distclean.

use anyhow::Result;
use clap::Args;
use muddle_core::fragment::Category;
use muddle_core::tag;

use crate::context::{build_labels, CommandContext, Global};

#[derive(Args, Debug)]
#[command(about = "Build packages through to post-install")]
pub struct BuildArgs {
    /// Packages (or checkouts/deployments, meaning their packages);
    /// _all for everything. Defaults from the current directory.
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
#[command(about = "Configure packages without building them")]
pub struct ConfigureArgs {
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
#[command(about = "Run each package's clean target and retract its build tags")]
pub struct CleanArgs {
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
#[command(about = "Run each package's distclean target and retract its tags")]
pub struct DistcleanArgs {
    pub labels: Vec<String>,
}

pub fn execute_build(args: BuildArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = ctx.resolve(Category::Package, tag::POST_INSTALLED, &args.labels)?;
    build_labels(&ctx, global, "build", &labels, false)
}

pub fn execute_configure(args: ConfigureArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = ctx.resolve(Category::Package, tag::CONFIGURED, &args.labels)?;
    build_labels(&ctx, global, "configure", &labels, false)
}

pub fn execute_clean(args: CleanArgs, global: &Global) -> Result<()> {
    clean_to(args.labels, global, "clean", tag::CLEAN, tag::CONFIGURED)
}

pub fn execute_distclean(args: DistcleanArgs, global: &Global) -> Result<()> {
    clean_to(
        args.labels,
        global,
        "distclean",
        tag::DIST_CLEAN,
        tag::PRE_CONFIG,
    )
}

/// Cleaning runs the make target, then retracts the package's progress
/// back to (and including) `retract_from`, so dependents rebuild.
fn clean_to(
    args: Vec<String>,
    global: &Global,
    command_name: &str,
    clean_tag: &str,
    retract_from: &str,
) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = ctx.resolve(Category::Package, clean_tag, &args)?;
    build_labels(&ctx, global, command_name, &labels, true)?;
    if global.just_print {
        return Ok(());
    }

    let builder = &ctx.loaded.builder;
    for label in &labels {
        builder.kill_label(&label.with_tag(retract_from))?;
        // The clean tag itself must not linger either, or the next clean
        // would be a no-op.
        builder.ctx.db.clear_tag(label)?;
    }
    Ok(())
}
