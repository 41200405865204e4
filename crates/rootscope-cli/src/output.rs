//! Formatted output helpers for CLI commands.
//!
//! Renders mount plans and turns scope errors into the exit codes and
//! messages `chroot(1)` users expect.

use std::fmt::Write as _;

use rootscope_common::config::EnvironmentConfig;
use rootscope_common::constants::{
    APP_NAME, EXIT_CANNOT_INVOKE, EXIT_NOT_FOUND, EXIT_SETUP_FAILURE,
};
use rootscope_common::error::{ErrorKind, ScopeError};
use rootscope_common::types::MountAction;

const ENOENT: i32 = 2;

/// Renders the resolved mounts of `config` as a human-readable plan.
#[must_use]
pub fn render_plan(config: &EnvironmentConfig, actions: &[MountAction]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Scope plan for: {}", config.target_root.display());
    let _ = writeln!(out);

    let width = actions
        .iter()
        .map(|a| a.source.to_string().len())
        .max()
        .unwrap_or(0);
    for action in actions {
        let _ = write!(
            out,
            "  {:<width$}  ->  {}  ({})",
            action.source.to_string(),
            action.target.display(),
            action.flavour(),
        );
        if action.optional {
            let _ = write!(out, " [optional]");
        }
        let _ = writeln!(out);
    }
    if !actions.is_empty() {
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "  {} mount(s) will be applied.", actions.len());
    if let Some(name) = &config.hostname {
        let _ = writeln!(out, "  hostname: {}", name.host());
        if let Some(domain) = name.domain() {
            let _ = writeln!(out, "  domain:   {domain}");
        }
    }
    if config.skip_chdir {
        let _ = writeln!(out, "  working directory is kept");
    }
    out
}

/// Maps a scope error to a `chroot(1)`-style exit code.
#[must_use]
pub fn exit_code_for(err: &ScopeError) -> i32 {
    match err.kind() {
        ErrorKind::Execution if err.raw_os_error() == Some(ENOENT) => EXIT_NOT_FOUND,
        ErrorKind::Execution => EXIT_CANNOT_INVOKE,
        _ => EXIT_SETUP_FAILURE,
    }
}

/// Prints `err` to stderr and returns its exit code.
pub fn report_error(err: &ScopeError) -> i32 {
    tracing::debug!(kind = %err.kind(), "scope failed");
    eprintln!("{APP_NAME}: {err}");
    exit_code_for(err)
}
