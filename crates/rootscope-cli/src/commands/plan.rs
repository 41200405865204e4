//! `rootscope plan`: show the resolved mounts without applying them.

use std::path::PathBuf;

use clap::{ArgMatches, Args};
use rootscope_core::resolver;

use crate::commands::mounts::MountArgs;
use crate::output;

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Directory that would become `/`.
    pub root: PathBuf,

    #[command(flatten)]
    pub mounts: MountArgs,

    /// Print the actions as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `plan` command.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the mount requests
/// do not resolve.
pub fn execute(args: &PlanArgs, matches: Option<&ArgMatches>) -> anyhow::Result<i32> {
    let config = args.mounts.to_config(&args.root, matches)?;
    let actions = resolver::resolve(&config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&actions)?);
    } else {
        print!("{}", output::render_plan(&config, &actions));
    }
    Ok(0)
}
