//! Error taxonomy for the rootscope workspace.
//!
//! Every failure a caller can observe maps to one [`ErrorKind`], so callers
//! can tell a mount setup problem apart from a command that could not be
//! started without matching on message text.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Phase-level classification of a [`ScopeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad mount request shape, caught before any OS mutation.
    InvalidMountSpec,
    /// Namespace isolation, propagation change, or UTS setup failed.
    Namespace,
    /// A bind, filesystem mount, or read-only remount failed.
    MountApply,
    /// Saving state, changing root, or changing directory failed.
    RootSwitch,
    /// One or more reversals failed during teardown.
    Teardown,
    /// The command inside the scope could not be started.
    Execution,
    /// Another environment is already open in this process.
    AlreadyActive,
    /// The isolated child process vanished without reporting.
    Child,
    /// Configuration could not be loaded or is invalid.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidMountSpec => "invalid mount spec",
            Self::Namespace => "namespace",
            Self::MountApply => "mount apply",
            Self::RootSwitch => "root switch",
            Self::Teardown => "teardown",
            Self::Execution => "execution",
            Self::AlreadyActive => "already active",
            Self::Child => "child",
            Self::Config => "config",
        };
        f.write_str(name)
    }
}

/// A single reversal that failed during teardown.
#[derive(Debug, Error)]
#[error("{step}: {source}")]
pub struct TeardownFailure {
    /// What was being undone (a mount destination or a restore step).
    pub step: String,
    /// Underlying OS error.
    pub source: std::io::Error,
}

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// A mount request is malformed.
    #[error("invalid mount spec: {message}")]
    InvalidMountSpec {
        /// Description of the rejected request.
        message: String,
    },

    /// A namespace operation failed.
    #[error("{operation} failed: {source}")]
    Namespace {
        /// The operation that failed (`unshare(CLONE_NEWNS)`, ...).
        operation: &'static str,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Applying a mount action failed.
    #[error("failed mounting {source_path} at {}: {source}", .destination.display())]
    MountApply {
        /// Mount source as displayed to the user.
        source_path: String,
        /// Host path of the destination.
        destination: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Switching into the new root failed.
    #[error("cannot change root directory to {}: {source}", .path.display())]
    RootSwitch {
        /// Path being switched into (or the directory being entered).
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Teardown could not undo every change.
    #[error("teardown left {} change(s) in place: {}", .failures.len(), join_failures(.failures))]
    Teardown {
        /// Every reversal that failed, in the order attempted.
        failures: Vec<TeardownFailure>,
    },

    /// The scoped command could not be started.
    #[error("failed to run command '{command}': {source}")]
    Execution {
        /// Program that was attempted.
        command: String,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A second environment was opened while one is live.
    #[error("a scoped environment is already active in this process")]
    AlreadyActive,

    /// The isolated child exited without reporting an outcome.
    #[error("isolated child failed: {message}")]
    Child {
        /// What is known about the child's fate.
        message: String,
    },

    /// A failure reported back by an isolated child process.
    #[error("{message}")]
    Isolated {
        /// Classification reported by the child.
        kind: ErrorKind,
        /// Rendered error message from the child.
        message: String,
        /// Raw OS error code behind the failure, if there was one.
        os_error: Option<i32>,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// An I/O operation outside the scope lifecycle failed.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl ScopeError {
    /// Returns the phase classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidMountSpec { .. } => ErrorKind::InvalidMountSpec,
            Self::Namespace { .. } => ErrorKind::Namespace,
            Self::MountApply { .. } => ErrorKind::MountApply,
            Self::RootSwitch { .. } => ErrorKind::RootSwitch,
            Self::Teardown { .. } => ErrorKind::Teardown,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::AlreadyActive => ErrorKind::AlreadyActive,
            Self::Child { .. } => ErrorKind::Child,
            Self::Isolated { kind, .. } => *kind,
            Self::Config { .. } | Self::Io { .. } | Self::Serialization { .. } => ErrorKind::Config,
        }
    }

    /// Returns the raw OS error code carried by this error, if any.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Namespace { source, .. }
            | Self::MountApply { source, .. }
            | Self::RootSwitch { source, .. }
            | Self::Execution { source, .. }
            | Self::Io { source, .. } => source.raw_os_error(),
            Self::Isolated { os_error, .. } => *os_error,
            _ => None,
        }
    }
}

fn join_failures(failures: &[TeardownFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ScopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    const ENOENT: i32 = 2;

    #[test]
    fn isolated_error_reports_child_kind() {
        let err = ScopeError::Isolated {
            kind: ErrorKind::MountApply,
            message: "boom".into(),
            os_error: Some(16),
        };
        assert_eq!(err.kind(), ErrorKind::MountApply);
        assert_eq!(err.raw_os_error(), Some(16));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn execution_error_names_command() {
        let err = ScopeError::Execution {
            command: "/bin/missing".into(),
            source: std::io::Error::from_raw_os_error(ENOENT),
        };
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(err.to_string().starts_with("failed to run command '/bin/missing'"));
        assert_eq!(err.raw_os_error(), Some(ENOENT));
    }

    #[test]
    fn teardown_error_lists_every_failure() {
        let err = ScopeError::Teardown {
            failures: vec![
                TeardownFailure {
                    step: "umount /a".into(),
                    source: std::io::Error::other("busy"),
                },
                TeardownFailure {
                    step: "umount /b".into(),
                    source: std::io::Error::other("busy"),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("2 change(s)"));
        assert!(text.contains("umount /a: busy; umount /b: busy"));
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InvalidMountSpec).unwrap();
        assert_eq!(json, "\"invalid_mount_spec\"");
    }
}
