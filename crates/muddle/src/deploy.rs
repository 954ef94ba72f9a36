//! The deployment-category commands, including the default action of a
//! bare `muddle` invocation.

use anyhow::Result;
use clap::Args;
use muddle_core::fragment::Category;
use muddle_core::tag;

use crate::context::{build_labels, CommandContext, Global};

#[derive(Args, Debug)]
#[command(about = "Deploy: aggregate package outputs into deployment trees")]
pub struct DeployArgs {
    /// Deployments (or checkouts/packages, meaning the deployments that
    /// use them); _all for everything.
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
#[command(about = "Remove deployment outputs and retract their tags")]
pub struct CleandeployArgs {
    pub labels: Vec<String>,
}

pub fn execute_deploy(args: DeployArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = ctx.resolve(Category::Deployment, tag::DEPLOYED, &args.labels)?;
    build_labels(&ctx, global, "deploy", &labels, false)
}

pub fn execute_cleandeploy(args: CleandeployArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = ctx.resolve(Category::Deployment, tag::CLEAN, &args.labels)?;
    build_labels(&ctx, global, "cleandeploy", &labels, true)?;
    if global.just_print {
        return Ok(());
    }

    let builder = &ctx.loaded.builder;
    for label in &labels {
        builder.kill_label(&label.with_tag(tag::DEPLOYED))?;
        builder.ctx.db.clear_tag(label)?;
    }
    Ok(())
}

/// A bare `muddle` builds the default deployments.
pub fn execute_default(global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = ctx.resolve(Category::Deployment, tag::DEPLOYED, &[])?;
    build_labels(&ctx, global, "deploy", &labels, false)
}
