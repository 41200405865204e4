//! System-wide constants and the default mount table.

use crate::types::{FilesystemKind, MountRequest};

/// Shell used when no command is given and `$SHELL` is unset.
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// Environment variable naming the caller's interactive shell.
pub const SHELL_ENV: &str = "SHELL";

/// Maximum length of a hostname or domain name component.
pub const UTS_NAME_MAX: usize = 64;

/// Exit status when the environment itself could not be set up.
pub const EXIT_SETUP_FAILURE: i32 = 125;

/// Exit status when the command exists but could not be invoked.
pub const EXIT_CANNOT_INVOKE: i32 = 126;

/// Exit status when the command could not be found.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Offset added to a signal number to form an exit status.
pub const EXIT_SIGNAL_BASE: i32 = 128;

/// Application name used in CLI output.
pub const APP_NAME: &str = "rootscope";

/// Mounts a conventional chroot expects, in application order.
///
/// `/dev` is bound recursively so `/dev/pts` and friends come along; the
/// fresh `tmpfs` on `/dev/shm` is layered on top of it afterwards.
#[must_use]
pub fn default_mounts() -> Vec<MountRequest> {
    vec![
        MountRequest::bind("/dev").recursive(),
        MountRequest::filesystem(FilesystemKind::Proc, "/proc"),
        MountRequest::filesystem(FilesystemKind::Sysfs, "/sys"),
        MountRequest::filesystem(FilesystemKind::Tmpfs, "/dev/shm"),
        MountRequest::bind("/etc/resolv.conf").optional(),
    ]
}

/// Returns the command to run when the caller gives none: `$SHELL -i`,
/// or [`FALLBACK_SHELL`] when the variable is unset or empty.
#[must_use]
pub fn default_command() -> Vec<String> {
    let shell = std::env::var(SHELL_ENV)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_SHELL.to_string());
    vec![shell, "-i".to_string()]
}
