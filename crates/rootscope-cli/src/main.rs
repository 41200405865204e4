//! # rootscope
//!
//! Runs a command inside an alternate root with the usual pseudo-filesystems
//! mounted, then unmounts everything it mounted on the way out.

#![allow(clippy::print_stderr, clippy::print_stdout)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use std::process::ExitCode;

use clap::{CommandFactory, FromArgMatches};
use rootscope_common::constants::{APP_NAME, EXIT_SETUP_FAILURE};

use crate::commands::Cli;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = Cli::command().get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    let code = match commands::execute(cli, &matches) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{APP_NAME}: {e:#}");
            EXIT_SETUP_FAILURE
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX))
}
