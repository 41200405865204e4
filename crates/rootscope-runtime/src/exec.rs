//! Running a command inside an open scope.
//!
//! The command is spawned and waited for, never `exec`ed over the current
//! process, so the scope can still be closed after it exits.

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, ExitStatus};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use rootscope_common::constants::EXIT_SIGNAL_BASE;
use rootscope_common::error::{Result, ScopeError};

const INTERRUPTS: [Signal; 2] = [Signal::SIGINT, Signal::SIGQUIT];

/// Captured output from a command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code, with signals mapped to `128 + signal`.
    pub exit_code: i32,
}

/// Runs `command` with inherited stdio and waits for it.
///
/// Interactive interrupts reach the command but not the caller, which
/// must survive to close the scope.
///
/// # Errors
///
/// Returns [`ScopeError::Config`] for an empty command, or
/// [`ScopeError::Execution`] if the program cannot be started.
pub fn run_command(command: &[String]) -> Result<ExitStatus> {
    let mut cmd = build(command)?;
    tracing::info!(cmd = ?command, "running command in scope");

    let _interrupts = IgnoreInterrupts::install();
    let status = cmd.status().map_err(|e| execution_error(command, e))?;
    tracing::debug!(%status, "command finished");
    Ok(status)
}

/// Runs `command` and captures its output.
///
/// # Errors
///
/// Returns [`ScopeError::Config`] for an empty command, or
/// [`ScopeError::Execution`] if the program cannot be started.
pub fn run_captured(command: &[String]) -> Result<ExecOutput> {
    let output = build(command)?
        .output()
        .map_err(|e| execution_error(command, e))?;

    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: exit_code(output.status),
    })
}

/// Maps an exit status to a shell-style exit code.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| EXIT_SIGNAL_BASE + sig))
        .unwrap_or(EXIT_SIGNAL_BASE)
}

fn build(command: &[String]) -> Result<Command> {
    let Some((program, args)) = command.split_first() else {
        return Err(ScopeError::Config {
            message: "command is empty".into(),
        });
    };
    let mut cmd = Command::new(program);
    let _ = cmd.args(args);

    // SAFETY: the hook only calls `sigaction(2)`, which is
    // async-signal-safe, between fork and exec.
    unsafe {
        let _ = cmd.pre_exec(|| {
            let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
            for signal in INTERRUPTS {
                let _ = sigaction(signal, &default)?;
            }
            Ok(())
        });
    }
    Ok(cmd)
}

fn execution_error(command: &[String], source: std::io::Error) -> ScopeError {
    ScopeError::Execution {
        command: command.first().cloned().unwrap_or_default(),
        source,
    }
}

/// Ignores `SIGINT` and `SIGQUIT` until dropped.
///
/// The previous dispositions are restored on drop. Signals that could not
/// be changed are left alone.
#[derive(Debug)]
pub struct IgnoreInterrupts {
    previous: Vec<(Signal, SigAction)>,
}

impl IgnoreInterrupts {
    /// Installs the ignore dispositions.
    #[must_use]
    pub fn install() -> Self {
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        let mut previous = Vec::with_capacity(INTERRUPTS.len());
        for signal in INTERRUPTS {
            // SAFETY: SIG_IGN runs no code in signal context.
            match unsafe { sigaction(signal, &ignore) } {
                Ok(old) => previous.push((signal, old)),
                Err(e) => tracing::debug!(%signal, error = %e, "could not ignore signal"),
            }
        }
        Self { previous }
    }
}

impl Drop for IgnoreInterrupts {
    fn drop(&mut self) {
        for (signal, old) in self.previous.drain(..).rev() {
            // SAFETY: reinstates a disposition this process had before.
            if let Err(e) = unsafe { sigaction(signal, &old) } {
                tracing::debug!(%signal, error = %e, "could not restore signal disposition");
            }
        }
    }
}
