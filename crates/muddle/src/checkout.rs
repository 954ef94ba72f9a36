//! The checkout-category commands: checkout, pull, merge, commit, push
//! and status. All of them resolve their arguments to checkout labels
//! and drive those labels to the command's tag.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use muddle_core::fragment::Category;
use muddle_core::{tag, Label, MuddleError};

use crate::context::{build_labels, report_failures, CommandContext, Global};

#[derive(Args, Debug)]
#[command(about = "Check sources out of version control")]
pub struct CheckoutArgs {
    /// Checkouts (or packages/deployments, meaning their checkouts);
    /// _all for everything. Defaults from the current directory.
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
#[command(about = "Fast-forward checkouts from their remotes")]
pub struct PullArgs {
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
#[command(about = "Merge remote changes into checkouts")]
pub struct MergeArgs {
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
#[command(about = "Commit local changes in checkouts")]
pub struct CommitArgs {
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
#[command(about = "Push committed changes to the remotes")]
pub struct PushArgs {
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
#[command(about = "Report the version-control state of checkouts")]
pub struct StatusArgs {
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
#[command(about = "Point working trees back at their registered remotes")]
pub struct ReparentArgs {
    pub labels: Vec<String>,
}

pub fn execute_checkout(args: CheckoutArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = ctx.resolve(Category::Checkout, tag::CHECKED_OUT, &args.labels)?;
    build_labels(&ctx, global, "checkout", &labels, false)
}

pub fn execute_pull(args: PullArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = ctx.resolve(Category::Checkout, tag::PULLED, &args.labels)?;
    build_labels(&ctx, global, "pull", &labels, true)
}

pub fn execute_merge(args: MergeArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = ctx.resolve(Category::Checkout, tag::MERGED, &args.labels)?;
    build_labels(&ctx, global, "merge", &labels, true)
}

pub fn execute_commit(args: CommitArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = ctx.resolve(Category::Checkout, tag::CHANGES_COMMITTED, &args.labels)?;
    build_labels(&ctx, global, "commit", &labels, true)
}

pub fn execute_push(args: PushArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = ctx.resolve(Category::Checkout, tag::CHANGES_PUSHED, &args.labels)?;
    build_labels(&ctx, global, "push", &labels, true)
}

/// Status is read-only: it talks to the VCS adapters directly rather
/// than driving tags through the rule set.
pub fn execute_status(args: StatusArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = ctx.resolve(Category::Checkout, tag::CHECKED_OUT, &args.labels)?;
    if global.just_print {
        println!("Asked to status: {}", crate::context::join_labels(&labels));
        return Ok(());
    }

    let mut failures: Vec<(Label, MuddleError)> = Vec::new();
    for label in &labels {
        match status_one(&ctx, label) {
            Ok(Some(report)) => {
                println!("{}", label.to_string().bold());
                for line in report.trim_end().lines() {
                    println!("  {line}");
                }
            }
            Ok(None) => println!("{} {}", label.to_string().bold(), "clean".green()),
            Err(e) if global.stop && !e.is_unsupported() => return Err(e.into()),
            Err(e) => failures.push((label.clone(), e)),
        }
    }
    report_failures("status", failures)
}

/// Re-point each checkout's remote at the repository the build
/// description registered for it, e.g. after a tree was copied around.
pub fn execute_reparent(args: ReparentArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = ctx.resolve(Category::Checkout, tag::CHECKED_OUT, &args.labels)?;
    if global.just_print {
        println!("Asked to reparent: {}", crate::context::join_labels(&labels));
        return Ok(());
    }

    let builder = &ctx.loaded.builder;
    let mut failures: Vec<(Label, MuddleError)> = Vec::new();
    for label in &labels {
        let outcome = (|| -> Result<(), MuddleError> {
            let info = builder.ctx.db.checkout_info(label)?;
            let dir = builder.ctx.layout.checkout_path(&builder.ctx.db, label)?;
            if !dir.exists() {
                return Err(MuddleError::Unsupported {
                    label: label.clone(),
                    reason: "not checked out".to_string(),
                });
            }
            let adapter = ctx.loaded.vcs.get(&info.vcs).map_err(MuddleError::from)?;
            println!("> reparent {label} -> {}", info.repo);
            adapter
                .reparent(&dir, &info.repo)
                .map_err(MuddleError::from)
        })();
        match outcome {
            Ok(()) => {}
            Err(e) if global.stop && !e.is_unsupported() => return Err(e.into()),
            Err(e) => failures.push((label.clone(), e)),
        }
    }
    report_failures("reparent", failures)
}

fn status_one(ctx: &CommandContext, label: &Label) -> Result<Option<String>, MuddleError> {
    let builder = &ctx.loaded.builder;
    let info = builder.ctx.db.checkout_info(label)?;
    let dir = builder.ctx.layout.checkout_path(&builder.ctx.db, label)?;
    if !dir.exists() {
        return Ok(Some("not checked out".to_string()));
    }
    let adapter = ctx.loaded.vcs.get(&info.vcs).map_err(MuddleError::from)?;
    adapter.status(&dir).map_err(MuddleError::from)
}
