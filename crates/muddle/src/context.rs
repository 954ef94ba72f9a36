//! Shared command plumbing: finding the build tree, resolving label
//! arguments, and driving labels with the collect-and-report policy.

use std::path::PathBuf;

use anyhow::{anyhow, Context as _, Result};
use colored::Colorize;
use muddle_core::fragment::{self, Category};
use muddle_core::{Label, MuddleError};
use muddle_pkgs::{load_build, Loaded};

/// Flags shared by every command.
pub struct Global {
    pub just_print: bool,
    pub stop: bool,
}

/// A located and loaded build tree.
pub struct CommandContext {
    pub loaded: Loaded,
    pub current_dir: PathBuf,
}

impl CommandContext {
    /// Find the enclosing build tree from the working directory and load
    /// its description.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().context("cannot determine working directory")?;
        let root = muddle_core::find_root(&current_dir).ok_or_else(|| {
            anyhow!(
                "{} is not inside a muddle build tree (no .muddle/ found)",
                current_dir.display()
            )
        })?;
        log::debug!("loading build tree at {}", root.display());
        let loaded = load_build(&root)?;
        Ok(CommandContext {
            loaded,
            current_dir,
        })
    }

    /// Resolve command arguments (or, when empty, the working directory)
    /// to a sorted label list at the command's required tag.
    pub fn resolve(
        &self,
        category: Category,
        required_tag: &str,
        args: &[String],
    ) -> Result<Vec<Label>> {
        let labels = if args.is_empty() {
            fragment::default_args(
                &self.loaded.builder,
                category,
                required_tag,
                &self.current_dir,
            )?
        } else {
            fragment::resolve_args(&self.loaded.builder, category, required_tag, args)?
        };
        Ok(labels)
    }
}

/// Drive each label to its tag.
///
/// With `refresh`, the label's own tag is cleared first so the action
/// runs again (pull, status and friends always act). Failures are
/// collected and re-reported at the end unless `--stop` was given;
/// `Unsupported` is only ever reported.
pub fn build_labels(
    ctx: &CommandContext,
    global: &Global,
    command_name: &str,
    labels: &[Label],
    refresh: bool,
) -> Result<()> {
    if global.just_print {
        println!("Asked to {command_name}: {}", join_labels(labels));
        return Ok(());
    }

    let builder = &ctx.loaded.builder;
    let mut failures: Vec<(Label, MuddleError)> = Vec::new();

    for label in labels {
        println!("> {command_name} {label}");
        if refresh && !label.transient {
            builder.ctx.db.clear_tag(label)?;
        }
        match builder.build_label(label) {
            Ok(()) => {}
            Err(e) if global.stop && !e.is_unsupported() => {
                return Err(e.into());
            }
            Err(e) => failures.push((label.clone(), e)),
        }
    }

    report_failures(command_name, failures)
}

/// Print collected failures; hard-fail unless they were all `Unsupported`.
pub fn report_failures(
    command_name: &str,
    failures: Vec<(Label, MuddleError)>,
) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }
    let mut fatal = 0;
    eprintln!();
    for (label, error) in &failures {
        if error.is_unsupported() {
            eprintln!("{} {error}", "ignored:".yellow());
        } else {
            fatal += 1;
            eprintln!("{} {label}: {error}", "failed:".red());
        }
    }
    if fatal > 0 {
        Err(anyhow!("{command_name}: {fatal} label(s) failed"))
    } else {
        Ok(())
    }
}

pub fn join_labels(labels: &[Label]) -> String {
    labels
        .iter()
        .map(Label::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
