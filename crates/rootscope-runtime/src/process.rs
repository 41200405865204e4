//! Fork-per-scope execution.
//!
//! Mount and UTS namespaces cannot be left once entered, so the default
//! way to run a scope is in a forked child. The child opens the
//! environment, runs the command, closes the environment, and reports back
//! over a pipe as JSON before exiting. Everything the child changed dies
//! with it.

use std::fs::File;
use std::io::{Read, Write};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork, pipe2};
use serde::{Deserialize, Serialize};

use rootscope_common::config::EnvironmentConfig;
use rootscope_common::constants::EXIT_SETUP_FAILURE;
use rootscope_common::error::{ErrorKind, Result, ScopeError};
use rootscope_core::controller::LinuxController;
use rootscope_core::resolver;

use crate::environment::{ScopedEnvironment, TeardownReport, scoped};
use crate::exec::{self, IgnoreInterrupts};

/// Outcome of a scope whose command ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeOutcome {
    /// Shell-style exit code of the command.
    pub exit_code: i32,
    /// Teardown steps that failed after the command finished.
    pub teardown_warnings: Vec<String>,
}

/// A [`ScopeError`] flattened for transport out of the child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Phase classification.
    pub kind: ErrorKind,
    /// Rendered message.
    pub message: String,
    /// Raw OS error code, if any.
    pub os_error: Option<i32>,
}

impl From<&ScopeError> for ErrorReport {
    fn from(err: &ScopeError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            os_error: err.raw_os_error(),
        }
    }
}

impl From<ErrorReport> for ScopeError {
    fn from(report: ErrorReport) -> Self {
        Self::Isolated {
            kind: report.kind,
            message: report.message,
            os_error: report.os_error,
        }
    }
}

/// What the child writes to the pipe before exiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChildReport {
    /// The command ran to completion.
    Completed(ScopeOutcome),
    /// Setup or execution failed.
    Failed {
        /// The primary error.
        error: ErrorReport,
        /// Teardown steps that also failed.
        teardown_warnings: Vec<String>,
    },
}

impl ChildReport {
    fn into_result(self) -> Result<ScopeOutcome> {
        match self {
            Self::Completed(outcome) => {
                for warning in &outcome.teardown_warnings {
                    tracing::warn!(failure = %warning, "teardown step failed in isolated scope");
                }
                Ok(outcome)
            }
            Self::Failed {
                error,
                teardown_warnings,
            } => {
                for warning in &teardown_warnings {
                    tracing::warn!(
                        primary = %error.message,
                        failure = %warning,
                        "teardown step failed after earlier error"
                    );
                }
                Err(error.into())
            }
        }
    }
}

/// Runs `command` inside a scope opened in a forked child.
///
/// Mount requests are resolved in the caller first, so malformed requests
/// fail without forking. While the child runs, the caller ignores
/// `SIGINT` and `SIGQUIT`; the command itself gets default dispositions.
///
/// The caller must be single-threaded: only the forking thread exists in
/// the child.
///
/// # Errors
///
/// Returns [`ScopeError::InvalidMountSpec`] or [`ScopeError::Config`] for
/// bad input, [`ScopeError::Isolated`] carrying the child's error kind if
/// setup or execution failed there, or [`ScopeError::Child`] if the child
/// could not be started or died without reporting.
pub fn run_isolated(config: &EnvironmentConfig, command: &[String]) -> Result<ScopeOutcome> {
    let _ = resolver::resolve(config)?;
    if command.is_empty() {
        return Err(ScopeError::Config {
            message: "command is empty".into(),
        });
    }

    let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).map_err(|e| child_error("pipe", e))?;
    let _interrupts = IgnoreInterrupts::install();

    // SAFETY: the caller is single-threaded, so the child's copy of the
    // address space holds no locks owned by other threads.
    match unsafe { fork() }.map_err(|e| child_error("fork", e))? {
        ForkResult::Child => {
            drop(read_end);
            let report = run_scope(config, command);
            let code = match write_report(File::from(write_end), &report) {
                Ok(()) => 0,
                Err(_) => EXIT_SETUP_FAILURE,
            };
            // SAFETY: skips the parent's destructors and atexit handlers,
            // which must not run twice.
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => {
            drop(write_end);
            tracing::info!(pid = %child, "scope forked");
            let report = read_report(File::from(read_end));
            let status = reap(child)?;
            tracing::debug!(?status, "scope child reaped");
            match report {
                Some(report) => report.into_result(),
                None => Err(ScopeError::Child {
                    message: describe_silent_exit(status),
                }),
            }
        }
    }
}

/// Runs `command` in a scope opened in this process.
///
/// The mount and UTS namespaces stay in effect after return; see
/// [`scoped`].
///
/// The caller must be single-threaded. `unshare(CLONE_NEWNS)` fails with
/// `EINVAL` in a multi-threaded process, and the root switch applies to
/// every thread, so other threads would run inside the target root until
/// teardown. Use [`run_isolated`] from a program that has already started
/// threads.
///
/// # Errors
///
/// Returns the setup or execution error, or [`ScopeError::Teardown`] if
/// the command ran but teardown did not fully succeed.
pub fn run_in_process(config: &EnvironmentConfig, command: &[String]) -> Result<ScopeOutcome> {
    scoped(config, LinuxController::new(), |_| exec::run_command(command)).map(|status| {
        ScopeOutcome {
            exit_code: exec::exit_code(status),
            teardown_warnings: Vec::new(),
        }
    })
}

fn run_scope(config: &EnvironmentConfig, command: &[String]) -> ChildReport {
    let env = match ScopedEnvironment::open(config, LinuxController::new()) {
        Ok(env) => env,
        Err(e) => {
            return ChildReport::Failed {
                error: ErrorReport::from(&e),
                teardown_warnings: Vec::new(),
            };
        }
    };
    let outcome = exec::run_command(command);
    let teardown_warnings = warnings(&env.close());
    match outcome {
        Ok(status) => ChildReport::Completed(ScopeOutcome {
            exit_code: exec::exit_code(status),
            teardown_warnings,
        }),
        Err(e) => ChildReport::Failed {
            error: ErrorReport::from(&e),
            teardown_warnings,
        },
    }
}

fn warnings(report: &TeardownReport) -> Vec<String> {
    report.failures.iter().map(ToString::to_string).collect()
}

fn write_report(mut pipe: File, report: &ChildReport) -> std::io::Result<()> {
    serde_json::to_writer(&mut pipe, report)?;
    pipe.flush()
}

fn read_report(mut pipe: File) -> Option<ChildReport> {
    let mut buf = Vec::new();
    if let Err(e) = pipe.read_to_end(&mut buf) {
        tracing::warn!(error = %e, "failed reading scope report");
        return None;
    }
    if buf.is_empty() {
        return None;
    }
    match serde_json::from_slice(&buf) {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::warn!(error = %e, "malformed scope report");
            None
        }
    }
}

fn reap(child: Pid) -> Result<WaitStatus> {
    loop {
        match waitpid(child, None) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => return Ok(status),
            Ok(_) | Err(Errno::EINTR) => {}
            Err(e) => return Err(child_error("waitpid", e)),
        }
    }
}

fn describe_silent_exit(status: WaitStatus) -> String {
    match status {
        WaitStatus::Signaled(_, signal, _) => format!("killed by {signal} before reporting"),
        WaitStatus::Exited(_, code) => format!("exited with status {code} without reporting"),
        other => format!("ended without reporting ({other:?})"),
    }
}

fn child_error(operation: &str, errno: Errno) -> ScopeError {
    ScopeError::Child {
        message: format!("{operation}: {errno}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_report_round_trips_kind_and_os_error() {
        let err = ScopeError::Execution {
            command: "/bin/missing".into(),
            source: std::io::Error::from_raw_os_error(libc::ENOENT),
        };
        let report = ErrorReport::from(&err);
        let back: ScopeError = report.into();
        assert_eq!(back.kind(), ErrorKind::Execution);
        assert_eq!(back.raw_os_error(), Some(libc::ENOENT));
        assert_eq!(back.to_string(), err.to_string());
    }

    #[test]
    fn child_report_is_tagged_json() {
        let report = ChildReport::Completed(ScopeOutcome {
            exit_code: 0,
            teardown_warnings: Vec::new(),
        });
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["exit_code"], 0);
    }

    #[test]
    fn failed_report_becomes_isolated_error() {
        let report = ChildReport::Failed {
            error: ErrorReport {
                kind: ErrorKind::MountApply,
                message: "failed mounting /srv".into(),
                os_error: Some(libc::EBUSY),
            },
            teardown_warnings: vec!["unmount /mnt/root/dev: busy".into()],
        };
        let err = report.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MountApply);
        assert_eq!(err.to_string(), "failed mounting /srv");
    }

    #[test]
    fn silent_exit_mentions_signal() {
        let status = WaitStatus::Signaled(Pid::from_raw(1), nix::sys::signal::Signal::SIGKILL, false);
        assert!(describe_silent_exit(status).contains("SIGKILL"));
    }

    #[test]
    fn invalid_mounts_fail_before_forking() {
        let config = EnvironmentConfig::new("/mnt/root").mount(
            rootscope_common::types::MountRequest::bind("/srv")
                .recursive()
                .readonly(),
        );
        let err = run_isolated(&config, &["/bin/true".to_string()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMountSpec);
    }

    #[test]
    fn empty_command_fails_before_forking() {
        let err = run_isolated(&EnvironmentConfig::new("/mnt/root"), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn missing_root_is_reported_by_the_child() {
        let parent = tempfile::tempdir().unwrap();
        let config = EnvironmentConfig::new(parent.path().join("gone")).without_default_mounts();

        let err = run_isolated(&config, &["/bin/true".to_string()]).unwrap_err();
        assert!(matches!(err, ScopeError::Isolated { .. }), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::RootSwitch);
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn unprivileged_namespace_failure_is_reported_by_the_child() {
        // A privileged caller would really enter the namespace.
        if nix::unistd::geteuid().is_root() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let config = EnvironmentConfig::new(root.path()).without_default_mounts();

        let err = run_isolated(&config, &["/bin/true".to_string()]).unwrap_err();
        assert!(matches!(err, ScopeError::Isolated { .. }), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Namespace);
    }

    #[test]
    fn pipe_report_is_read_back() {
        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).unwrap();
        let report = ChildReport::Completed(ScopeOutcome {
            exit_code: 7,
            teardown_warnings: vec!["restore hostname: denied".into()],
        });
        write_report(File::from(write_end), &report).unwrap();
        assert_eq!(read_report(File::from(read_end)), Some(report));
    }

    #[test]
    fn empty_pipe_means_no_report() {
        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).unwrap();
        drop(write_end);
        assert_eq!(read_report(File::from(read_end)), None);
    }
}
