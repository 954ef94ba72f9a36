//! Commands taking any sort of label, verbatim.

use anyhow::Result;
use clap::Args;
use muddle_core::fragment::{self, Category};
use muddle_core::Label;

use crate::context::{build_labels, CommandContext, Global};

#[derive(Args, Debug)]
#[command(about = "Drive an explicit label to its tag")]
pub struct BuildlabelArgs {
    /// Full labels, e.g. package:hello{x86}/PostInstalled
    #[arg(required = true)]
    pub labels: Vec<String>,
}

#[derive(Args, Debug)]
#[command(about = "Retract a label's tag, and transitively its dependents'")]
pub struct RetractArgs {
    #[arg(required = true)]
    pub labels: Vec<String>,
}

pub fn execute_buildlabel(args: BuildlabelArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = parse_labels(&ctx, &args.labels)?;
    build_labels(&ctx, global, "buildlabel", &labels, false)
}

pub fn execute_retract(args: RetractArgs, global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    let labels = parse_labels(&ctx, &args.labels)?;
    if global.just_print {
        println!("Asked to retract: {}", crate::context::join_labels(&labels));
        return Ok(());
    }
    for label in &labels {
        println!("> retract {label}");
        ctx.loaded.builder.kill_label(label)?;
    }
    Ok(())
}

/// Any-label commands keep the tag the user wrote; there is no required
/// tag to force.
fn parse_labels(ctx: &CommandContext, args: &[String]) -> Result<Vec<Label>> {
    let mut labels = Vec::new();
    for word in args {
        // A full label parses directly; otherwise fall back to fragment
        // resolution against the package namespace.
        match Label::parse(word) {
            Ok(label) => labels.push(label),
            Err(_) => labels.extend(fragment::resolve_args(
                &ctx.loaded.builder,
                Category::AnyLabel,
                muddle_core::tag::POST_INSTALLED,
                std::slice::from_ref(word),
            )?),
        }
    }
    Ok(labels)
}
