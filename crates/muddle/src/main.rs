use clap::{Parser, Subcommand};
use colored::Colorize;
use env_logger::Env;

mod checkout;
mod context;
mod deploy;
mod distribute;
mod init;
mod instruct;
mod labelcmd;
mod package;
mod query;
mod stamp;

#[derive(Parser)]
#[command(name = "muddle")]
#[command(about = "A multi-repository build orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true)]
    debug: bool,

    /// Report what would be done without doing it
    #[arg(short = 'n', long = "just-print", global = true)]
    just_print: bool,

    /// Stop at the first failure instead of collecting and re-reporting
    #[arg(long = "stop", global = true)]
    stop: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialise a build tree from a repository and description path
    Init(init::InitArgs),

    /// Check sources out of version control
    #[command(alias = "co")]
    Checkout(checkout::CheckoutArgs),

    /// Fast-forward checkouts from their remotes
    Pull(checkout::PullArgs),

    /// Merge remote changes into checkouts
    Merge(checkout::MergeArgs),

    /// Commit local changes in checkouts
    Commit(checkout::CommitArgs),

    /// Push committed changes to the remotes
    Push(checkout::PushArgs),

    /// Report the version-control state of checkouts
    Status(checkout::StatusArgs),

    /// Point working trees back at their registered remotes
    Reparent(checkout::ReparentArgs),

    /// Build packages (configure, build, install)
    #[command(alias = "b")]
    Build(package::BuildArgs),

    /// Configure packages without building
    Configure(package::ConfigureArgs),

    /// Run each package's clean target and retract its build tags
    Clean(package::CleanArgs),

    /// Run each package's distclean target and retract its tags
    Distclean(package::DistcleanArgs),

    /// Deploy (aggregate package outputs)
    Deploy(deploy::DeployArgs),

    /// Remove deployment outputs and retract their tags
    Cleandeploy(deploy::CleandeployArgs),

    /// Drive an explicit label to its tag
    Buildlabel(labelcmd::BuildlabelArgs),

    /// Retract a label's tag, and its dependents' tags
    Retract(labelcmd::RetractArgs),

    /// Ask the build tree questions
    #[command(subcommand)]
    Query(query::QueryCommands),

    /// Stamp files: snapshot the build tree's versions
    #[command(subcommand)]
    Stamp(stamp::StampCommands),

    /// Recreate a build tree from a stamp file
    Unstamp(stamp::UnstampArgs),

    /// Produce a named distribution into a target directory
    Distribute(distribute::DistributeArgs),

    /// Attach (or detach) an instruction file to a package
    Instruct(instruct::InstructArgs),
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    let global = context::Global {
        just_print: cli.just_print,
        stop: cli.stop,
    };

    let result = match cli.command {
        Some(Commands::Init(args)) => init::execute(args, &global),
        Some(Commands::Checkout(args)) => checkout::execute_checkout(args, &global),
        Some(Commands::Pull(args)) => checkout::execute_pull(args, &global),
        Some(Commands::Merge(args)) => checkout::execute_merge(args, &global),
        Some(Commands::Commit(args)) => checkout::execute_commit(args, &global),
        Some(Commands::Push(args)) => checkout::execute_push(args, &global),
        Some(Commands::Status(args)) => checkout::execute_status(args, &global),
        Some(Commands::Reparent(args)) => checkout::execute_reparent(args, &global),
        Some(Commands::Build(args)) => package::execute_build(args, &global),
        Some(Commands::Configure(args)) => package::execute_configure(args, &global),
        Some(Commands::Clean(args)) => package::execute_clean(args, &global),
        Some(Commands::Distclean(args)) => package::execute_distclean(args, &global),
        Some(Commands::Deploy(args)) => deploy::execute_deploy(args, &global),
        Some(Commands::Cleandeploy(args)) => deploy::execute_cleandeploy(args, &global),
        Some(Commands::Buildlabel(args)) => labelcmd::execute_buildlabel(args, &global),
        Some(Commands::Retract(args)) => labelcmd::execute_retract(args, &global),
        Some(Commands::Query(args)) => query::execute(args, &global),
        Some(Commands::Stamp(args)) => stamp::execute(args, &global),
        Some(Commands::Unstamp(args)) => stamp::execute_unstamp(args, &global),
        Some(Commands::Distribute(args)) => distribute::execute(args, &global),
        Some(Commands::Instruct(args)) => instruct::execute(args, &global),
        None => deploy::execute_default(&global),
    };

    if let Err(error) = result {
        eprintln!("{} {error:#}", "error:".red().bold());
        std::process::exit(1);
    }
}
