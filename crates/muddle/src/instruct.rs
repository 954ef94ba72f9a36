//! Attach an instruction file to a (package, role), for image-building
//! deployments to apply later.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context as _, Result};
use clap::Args;
use muddle_core::fragment::{self, Category};

use crate::context::{CommandContext, Global};

#[derive(Args, Debug)]
#[command(about = "Attach (or detach) an instruction file to a package")]
pub struct InstructArgs {
    /// The package, e.g. rootfs{arm}
    pub label: String,

    /// The instruction XML file; omit to clear existing instructions
    pub file: Option<PathBuf>,
}

pub fn execute(args: InstructArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = fragment::resolve_args(
        &ctx.loaded.builder,
        Category::Package,
        "*",
        std::slice::from_ref(&args.label),
    )?;
    let label = labels
        .first()
        .ok_or_else(|| anyhow!("'{}' does not name a package", args.label))?;
    if labels.len() > 1 {
        bail!(
            "'{}' names more than one package ({})",
            args.label,
            crate::context::join_labels(&labels)
        );
    }

    let db = &ctx.loaded.builder.ctx.db;
    match &args.file {
        Some(file) => {
            // Validate before installing; a bad file helps nobody later.
            let xml = std::fs::read_to_string(file)
                .with_context(|| format!("reading {}", file.display()))?;
            muddle_instr::parse(&xml)
                .map_err(|e| anyhow!("{}: {e}", file.display()))?;

            if global.just_print {
                println!("Asked to instruct {label} with {}", file.display());
                return Ok(());
            }
            db.set_instructions(label, file)?;
            println!("Instructions for {label} installed");
        }
        None => {
            if global.just_print {
                println!("Asked to clear instructions for {label}");
                return Ok(());
            }
            db.clear_instructions(label)?;
            println!("Instructions for {label} cleared");
        }
    }
    Ok(())
}
