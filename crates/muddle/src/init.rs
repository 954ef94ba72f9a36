use anyhow::{bail, Context as _, Result};
use clap::Args;

use crate::context::Global;

#[derive(Args, Debug)]
#[command(about = "Initialise a build tree in the current directory")]
pub struct InitArgs {
    /// Root repository, as <vcs>+<url> (e.g. git+https://example.com/repo)
    pub repository: String,

    /// Path of the build description under src/ (e.g. builds/muddle.toml)
    pub description: String,
}

pub fn execute(args: InitArgs, global: &Global) -> Result<()> {
    let current_dir = std::env::current_dir().context("cannot determine working directory")?;
    if current_dir.join(".muddle").exists() {
        bail!("{} already contains a build tree", current_dir.display());
    }

    if global.just_print {
        println!(
            "Asked to init {} with description {}",
            args.repository, args.description
        );
        return Ok(());
    }

    println!("Initialising build tree in {}", current_dir.display());
    muddle_pkgs::init_tree(&current_dir, &args.repository, &args.description)?;

    // A successful init must leave a loadable tree behind.
    muddle_pkgs::load_build(&current_dir)?;
    println!("Build tree initialised");
    Ok(())
}
