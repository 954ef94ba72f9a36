//! Stamp commands: snapshot the tree's versions, and rebuild a tree from
//! a snapshot.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use muddle_stamp::{capture, restore, RevisionPolicy, Stamp};

use crate::context::{CommandContext, Global};

#[derive(Subcommand, Debug)]
pub enum StampCommands {
    /// Write versions/<build-name>.stamp for the current tree
    Version(StampVersionArgs),

    /// Write a stamp to an explicit file (or a content-named one)
    Save(StampSaveArgs),
}

#[derive(Args, Debug)]
pub struct StampVersionArgs {
    /// Record revisions even when working trees have uncommitted changes
    #[arg(short = 'f', long = "force")]
    pub force: bool,

    /// Record symbolic heads instead of concrete revisions
    #[arg(long = "head")]
    pub head: bool,
}

#[derive(Args, Debug)]
pub struct StampSaveArgs {
    /// Output file; defaults to a SHA-1-named file under versions/
    pub file: Option<PathBuf>,

    #[arg(short = 'f', long = "force")]
    pub force: bool,

    #[arg(long = "head")]
    pub head: bool,
}

#[derive(Args, Debug)]
#[command(about = "Recreate a build tree from a stamp file")]
pub struct UnstampArgs {
    /// The stamp file to restore from
    pub stamp_file: PathBuf,

    /// Directory to create the tree in; defaults to the current directory
    pub target: Option<PathBuf>,

    /// Allow restoring from a .partial stamp
    #[arg(short = 'f', long = "force")]
    pub force: bool,
}

pub fn execute(command: StampCommands, global: &Global) -> Result<()> {
    match command {
        StampCommands::Version(args) => version(args, global),
        StampCommands::Save(args) => save(args, global),
    }
}

fn capture_current(ctx: &CommandContext, force: bool, head: bool) -> Result<Stamp> {
    let builder = &ctx.loaded.builder;
    let policy = if head {
        RevisionPolicy::Head
    } else if force {
        RevisionPolicy::Force
    } else {
        RevisionPolicy::Normal
    };
    let (mut stamp, problems) = capture(
        &builder.ctx.db,
        &builder.ctx.layout,
        &ctx.loaded.vcs,
        policy,
    )?;
    for (name, domain) in &ctx.loaded.domains {
        stamp.domains.insert(
            name.clone(),
            muddle_stamp::DomainStamp {
                repository: domain.repository.clone(),
                description: domain.description.clone(),
            },
        );
    }
    for label in &problems {
        eprintln!(
            "{} no revision for {label}; the stamp will be partial",
            "warning:".yellow()
        );
    }
    Ok(stamp)
}

fn version(args: StampVersionArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let build_name = ctx.loaded.builder.ctx.build_name.clone();
    if build_name.is_empty() {
        bail!("this build has no name; use 'stamp save' instead");
    }
    if global.just_print {
        println!("Asked to stamp version as {build_name}");
        return Ok(());
    }
    let stamp = capture_current(&ctx, args.force, args.head)?;
    let versions = ctx.loaded.builder.ctx.layout.versions_path();
    let path = stamp.save(&versions, Some(build_name.as_str()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn save(args: StampSaveArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    if global.just_print {
        println!("Asked to stamp save");
        return Ok(());
    }
    let stamp = capture_current(&ctx, args.force, args.head)?;
    let path = match &args.file {
        Some(file) => {
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let text = stamp.write_string();
            let path = if stamp.is_partial() {
                file.with_extension("partial")
            } else {
                file.clone()
            };
            std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
            path
        }
        None => stamp.save(&ctx.loaded.builder.ctx.layout.versions_path(), None)?,
    };
    println!("Wrote {}", path.display());
    Ok(())
}

pub fn execute_unstamp(args: UnstampArgs, global: &Global) -> Result<()> {
    let target = match args.target {
        Some(target) => target,
        None => std::env::current_dir().context("cannot determine working directory")?,
    };
    if target.join(".muddle").exists() {
        bail!("{} already contains a build tree", target.display());
    }

    let stamp = Stamp::load(&args.stamp_file)?;
    if global.just_print {
        println!(
            "Asked to unstamp {} checkout(s) into {}",
            stamp.checkouts.len(),
            target.display()
        );
        return Ok(());
    }

    std::fs::create_dir_all(&target)
        .with_context(|| format!("creating {}", target.display()))?;
    let vcs = muddle_vcs::VcsRegistry::with_standard();
    let labels = restore(&stamp, &target, &vcs, args.force)?;
    for label in &labels {
        println!("> restored {label}");
    }

    // The restored tree must load; this also reports a broken stamp early.
    muddle_pkgs::load_build(&target)
        .map_err(|e| anyhow!("restored tree does not load: {e}"))?;
    println!("Unstamped into {}", target.display());
    Ok(())
}
