//! CLI command definitions and dispatch.

pub mod mounts;
pub mod plan;
pub mod run;

use clap::{ArgMatches, Parser, Subcommand};

/// Run a command in a scoped alternate root.
#[derive(Parser, Debug)]
#[command(name = "rootscope", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command inside the root, tearing the mounts down afterwards.
    Run(run::RunArgs),
    /// Print the mounts a run would apply, without touching the system.
    Plan(plan::PlanArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// `matches` is the raw parse result, used to recover the command-line
/// order of mount flags. Returns the process exit code.
///
/// # Errors
///
/// Returns an error if the command could not be carried out. Errors from
/// inside a scoped run are mapped to exit codes instead.
pub fn execute(cli: Cli, matches: &ArgMatches) -> anyhow::Result<i32> {
    match cli.command {
        Command::Run(args) => run::execute(&args, matches.subcommand_matches("run")),
        Command::Plan(args) => plan::execute(&args, matches.subcommand_matches("plan")),
    }
}
