//! `rootscope run`: run a command inside the alternate root.

use std::path::PathBuf;

use clap::{ArgMatches, Args};
use rootscope_common::constants;
use rootscope_runtime::process;

use crate::commands::mounts::MountArgs;
use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Directory that becomes `/` for the command.
    pub root: PathBuf,

    /// Command and arguments to run (default: `$SHELL -i`).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    #[command(flatten)]
    pub mounts: MountArgs,

    /// Run the scope in this process instead of a forked child.
    #[arg(long)]
    pub in_process: bool,
}

/// Executes the `run` command.
///
/// Returns the command's exit code, or the setup and invocation codes
/// that `chroot(1)` uses when the command never ran.
///
/// # Errors
///
/// Never fails in practice; scope errors are reported and mapped to exit
/// codes here.
pub fn execute(args: &RunArgs, matches: Option<&ArgMatches>) -> anyhow::Result<i32> {
    let config = match args.mounts.to_config(&args.root, matches) {
        Ok(config) => config,
        Err(e) => return Ok(output::report_error(&e)),
    };
    let command = if args.command.is_empty() {
        constants::default_command()
    } else {
        args.command.clone()
    };
    tracing::debug!(root = %args.root.display(), cmd = ?command, in_process = args.in_process, "run");

    let outcome = if args.in_process {
        process::run_in_process(&config, &command)
    } else {
        process::run_isolated(&config, &command)
    };
    Ok(match outcome {
        Ok(outcome) => outcome.exit_code,
        Err(e) => output::report_error(&e),
    })
}
