//! Mount namespace isolation.
//!
//! Gives the calling process its own mount table so binds made for the
//! scope never show up in the parent namespace.

use rootscope_common::error::{Result, ScopeError};

/// Unshares the mount namespace and marks every existing mount private.
///
/// The second step is `mount --make-rprivate /`: without it, mounts made
/// under a shared root would still propagate back to the host.
///
/// # Errors
///
/// Returns [`ScopeError::Namespace`] if either syscall fails.
#[cfg(target_os = "linux")]
pub fn create_mount_namespace() -> Result<()> {
    use nix::mount::{MsFlags, mount};
    use nix::sched::{CloneFlags, unshare};

    unshare(CloneFlags::CLONE_NEWNS).map_err(|e| ScopeError::Namespace {
        operation: "unshare(CLONE_NEWNS)",
        source: e.into(),
    })?;
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| ScopeError::Namespace {
        operation: "make-rprivate /",
        source: e.into(),
    })?;
    tracing::debug!("mount namespace created with private propagation");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: mount namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn create_mount_namespace() -> Result<()> {
    Err(ScopeError::Config {
        message: "Linux required for mount namespace isolation".into(),
    })
}
