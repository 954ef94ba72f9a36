//! Read-only questions about the build tree.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use muddle_core::fragment::{self, Category};
use muddle_core::{Label, LabelKind};

use crate::context::{CommandContext, Global};

#[derive(Subcommand, Debug)]
pub enum QueryCommands {
    /// Print the build tree's root directory
    Root,

    /// Print the build's name
    Name,

    /// List all checkouts
    Checkouts(ListArgs),

    /// List all packages
    Packages(ListArgs),

    /// List all deployments
    Deployments(ListArgs),

    /// Print the rule set, optionally filtered by a label
    Depend(DependArgs),

    /// Report checkout licenses, implicit GPL propagation and clashes
    #[command(name = "checkout-licenses")]
    CheckoutLicenses,

    /// Print the directory a label corresponds to
    Dir(DirArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Emit a JSON array instead of one label per line
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct DependArgs {
    /// Only show rules whose target matches this label
    pub label: Option<String>,

    /// Include rules the engine synthesized for itself
    #[arg(long)]
    pub system: bool,
}

#[derive(Args, Debug)]
pub struct DirArgs {
    /// A label or label fragment
    pub label: String,
}

pub fn execute(command: QueryCommands, _global: &Global) -> Result<()> {
    let ctx = CommandContext::load()?;
    match command {
        QueryCommands::Root => {
            println!("{}", ctx.loaded.builder.ctx.layout.root().display());
            Ok(())
        }
        QueryCommands::Name => {
            println!("{}", ctx.loaded.builder.ctx.build_name);
            Ok(())
        }
        QueryCommands::Checkouts(args) => list(&ctx, LabelKind::Checkout, args),
        QueryCommands::Packages(args) => list(&ctx, LabelKind::Package, args),
        QueryCommands::Deployments(args) => list(&ctx, LabelKind::Deployment, args),
        QueryCommands::Depend(args) => depend(&ctx, args),
        QueryCommands::CheckoutLicenses => checkout_licenses(&ctx),
        QueryCommands::Dir(args) => dir(&ctx, args),
    }
}

fn list(ctx: &CommandContext, kind: LabelKind, args: ListArgs) -> Result<()> {
    let labels = fragment::all_labels_of_kind(&ctx.loaded.builder, &kind, "*");
    if args.json {
        println!("{}", serde_json::to_string_pretty(&labels)?);
    } else {
        for label in labels {
            println!("{label}");
        }
    }
    Ok(())
}

fn depend(ctx: &CommandContext, args: DependArgs) -> Result<()> {
    let filter = match &args.label {
        Some(fragment) => Some(parse_filter(fragment)?),
        None => None,
    };
    print!(
        "{}",
        ctx.loaded
            .builder
            .ruleset
            .render(filter.as_ref(), true, args.system, false)
    );
    Ok(())
}

fn parse_filter(fragment: &str) -> Result<Label> {
    // Accept a full label, or a bare fragment matched over every kind.
    Label::parse(fragment).or_else(|_| {
        let candidates =
            fragment::labels_from_fragment(fragment, &LabelKind::Wildcard, &[])?;
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("'{fragment}' does not name a label"))
    })
}

fn checkout_licenses(ctx: &CommandContext) -> Result<()> {
    let builder = &ctx.loaded.builder;
    let analysis = muddle_licenses::analyze(
        &builder.ruleset,
        &ctx.loaded.licenses,
        &builder.ctx.db.all_checkouts(),
    );
    print!("{}", muddle_licenses::render_report(&analysis));
    Ok(())
}

fn dir(ctx: &CommandContext, args: DirArgs) -> Result<()> {
    let builder = &ctx.loaded.builder;
    let labels = fragment::resolve_args(
        &ctx.loaded.builder,
        Category::AnyLabel,
        "*",
        std::slice::from_ref(&args.label),
    )?;
    let label = labels
        .first()
        .ok_or_else(|| anyhow!("'{}' does not name a label", args.label))?;

    let path = match label.kind() {
        LabelKind::Checkout => builder.ctx.layout.checkout_path(&builder.ctx.db, label)?,
        LabelKind::Package => builder.ctx.layout.package_obj_path(label),
        LabelKind::Deployment => builder
            .ctx
            .layout
            .deploy_path(label.name(), label.domain()),
        other => return Err(anyhow!("no directory for labels of kind '{}'", other.as_str())),
    };
    println!("{}", path.display());
    Ok(())
}
