//! Applying and reversing individual mount actions.
//!
//! Handles bind mounts, fresh pseudo-filesystems (`proc`, `sysfs`,
//! `tmpfs`, `devpts`), read-only remounts, and mountpoint creation inside
//! the target root.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};

use rootscope_common::error::{Result, ScopeError};
use rootscope_common::types::{MountAction, MountSource};

/// Symlinks followed while resolving one destination before giving up
/// with `ELOOP`, matching the kernel's limit.
const MAX_SYMLINK_HOPS: usize = 40;

/// Result of applying a single action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The mount is in place at this host path and must be reversed at
    /// teardown.
    Mounted(PathBuf),
    /// An optional action had nothing to mount or nowhere to mount it.
    Skipped,
}

impl Applied {
    /// Returns `true` if the action changed the mount table.
    #[must_use]
    pub const fn is_mounted(&self) -> bool {
        matches!(self, Self::Mounted(_))
    }
}

/// Applies `action` under `root`.
///
/// The in-root target is resolved with [`resolve_in_root`] first, so
/// symlinks in the image are followed the way they will be seen after the
/// root switch and nothing is created outside `root`. Missing mountpoints
/// are then created at the resolved path: a directory, or an empty file
/// when a bind source is a regular file.
///
/// An optional action is skipped when its source is missing or its
/// mountpoint cannot be resolved or created.
///
/// A read-only action is bound first and remounted read-only second. If the
/// remount fails the bind is undone before returning, so a failed action
/// never leaves a mount behind.
///
/// # Errors
///
/// Returns [`ScopeError::MountApply`] if the source is missing (and not
/// optional), the mountpoint cannot be prepared, or any `mount(2)` call
/// fails.
#[cfg(target_os = "linux")]
pub fn apply_action(root: &Path, action: &MountAction) -> Result<Applied> {
    let fail = |source: io::Error| ScopeError::MountApply {
        source_path: action.source.to_string(),
        destination: action.destination.clone(),
        source,
    };

    let source_is_dir = match &action.source {
        MountSource::Bind(path) => match std::fs::metadata(path) {
            Ok(meta) => meta.is_dir(),
            Err(e) if e.kind() == io::ErrorKind::NotFound && action.optional => {
                tracing::debug!(source = %path.display(), "optional mount source missing, skipping");
                return Ok(Applied::Skipped);
            }
            Err(e) => return Err(fail(e)),
        },
        MountSource::Filesystem(_) => true,
    };

    let prepared = resolve_in_root(root, &action.target).and_then(|destination| {
        prepare_mountpoint(&destination, source_is_dir)?;
        Ok(destination)
    });
    let destination = match prepared {
        Ok(destination) => destination,
        Err(e) if action.optional => {
            tracing::debug!(
                path = %action.target.display(),
                error = %e,
                "optional mountpoint unavailable, skipping"
            );
            return Ok(Applied::Skipped);
        }
        Err(e) => return Err(fail(e)),
    };

    mount_source(action, &destination).map_err(fail)?;
    tracing::debug!(action = %action, at = %destination.display(), "mounted");

    if action.readonly {
        if let Err(e) = remount_readonly(action, &destination) {
            if let Err(undo) = detach(&destination) {
                tracing::warn!(
                    destination = %destination.display(),
                    error = %undo,
                    "failed to undo bind after read-only remount failure"
                );
            }
            return Err(fail(e));
        }
        tracing::debug!(destination = %destination.display(), "remounted read-only");
    }

    Ok(Applied::Mounted(destination))
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn apply_action(_root: &Path, _action: &MountAction) -> Result<Applied> {
    Err(ScopeError::Config {
        message: "Linux required for mount operations".into(),
    })
}

/// Unmounts the destination of `action`.
///
/// Recursive binds are detached lazily so their nested mounts go with
/// them. A destination that is no longer a mountpoint, or no longer
/// exists, counts as already reversed.
///
/// # Errors
///
/// Returns the underlying OS error if `umount2(2)` fails for any other
/// reason.
#[cfg(target_os = "linux")]
pub fn reverse_action(action: &MountAction) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::mount::{MntFlags, umount2};

    let flags = if action.recursive {
        MntFlags::MNT_DETACH
    } else {
        MntFlags::empty()
    };
    match umount2(action.destination.as_path(), flags) {
        Ok(()) => {
            tracing::debug!(destination = %action.destination.display(), "unmounted");
            Ok(())
        }
        Err(Errno::EINVAL | Errno::ENOENT) => {
            tracing::debug!(destination = %action.destination.display(), "already unmounted");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn reverse_action(_action: &MountAction) -> io::Result<()> {
    Err(io::Error::other("Linux required for mount operations"))
}

/// Creates `destination` if it does not exist yet.
///
/// Only the missing tail is created; an existing path is left untouched
/// whatever its type.
///
/// # Errors
///
/// Returns an error if a directory or file cannot be created.
pub fn prepare_mountpoint(destination: &Path, as_dir: bool) -> io::Result<()> {
    match std::fs::symlink_metadata(destination) {
        Ok(_) => return Ok(()),
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        Err(_) => {}
    }

    if as_dir {
        std::fs::create_dir_all(destination)?;
    } else {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(destination)?;
    }
    tracing::debug!(destination = %destination.display(), as_dir, "created mountpoint");
    Ok(())
}

/// Resolves the in-root path `target` to a host path under `root`.
///
/// Components are walked one at a time as if `root` were `/`: an absolute
/// symlink restarts at `root`, a relative one continues from its parent,
/// and `..` stops at `root`. Components that do not exist yet are taken
/// as written, so the result may name a path still to be created. It
/// always lies strictly below `root`.
///
/// # Errors
///
/// Returns an error if `root` cannot be canonicalized, a component cannot
/// be inspected, more than 40 symlinks are followed (`ELOOP`), or the path
/// resolves to `root` itself.
pub fn resolve_in_root(root: &Path, target: &Path) -> io::Result<PathBuf> {
    let root = std::fs::canonicalize(root)?;
    let mut resolved = root.clone();
    let mut pending = VecDeque::new();
    push_components(&mut pending, target);
    let mut hops = 0;

    while let Some(part) = pending.pop_front() {
        if part == ".." {
            if resolved != root {
                let _ = resolved.pop();
            }
            continue;
        }

        let next = resolved.join(&part);
        match std::fs::symlink_metadata(&next) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_SYMLINK_HOPS {
                    return Err(io::Error::from_raw_os_error(libc::ELOOP));
                }
                let link = std::fs::read_link(&next)?;
                if link.is_absolute() {
                    resolved.clone_from(&root);
                }
                push_components(&mut pending, &link);
            }
            Ok(_) => resolved = next,
            Err(e) if e.kind() == io::ErrorKind::NotFound => resolved = next,
            Err(e) => return Err(e),
        }
    }

    if resolved == root {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} resolves to the target root itself", target.display()),
        ));
    }
    Ok(resolved)
}

/// Queues the components of `path` ahead of whatever is pending.
fn push_components(pending: &mut VecDeque<OsString>, path: &Path) {
    for component in path.components().rev() {
        match component {
            Component::Normal(part) => pending.push_front(part.to_os_string()),
            Component::ParentDir => pending.push_front(OsString::from("..")),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
}

#[cfg(target_os = "linux")]
fn mount_source(action: &MountAction, destination: &Path) -> io::Result<()> {
    use nix::mount::{MsFlags, mount};
    use rootscope_common::types::FilesystemKind;

    match &action.source {
        MountSource::Bind(path) => {
            let mut flags = MsFlags::MS_BIND;
            if action.recursive {
                flags |= MsFlags::MS_REC;
            }
            mount(Some(path.as_path()), destination, None::<&str>, flags, None::<&str>)?;
        }
        MountSource::Filesystem(kind) => {
            let (flags, data) = match kind {
                FilesystemKind::Proc | FilesystemKind::Sysfs => (
                    MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
                    None,
                ),
                FilesystemKind::Tmpfs => (MsFlags::MS_NOSUID | MsFlags::MS_NODEV, Some("mode=1777")),
                FilesystemKind::Devpts => (
                    MsFlags::MS_NOSUID | MsFlags::MS_NOEXEC,
                    Some("newinstance,ptmxmode=0666,mode=0620"),
                ),
            };
            mount(Some(kind.as_str()), destination, Some(kind.as_str()), flags, data)?;
        }
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn remount_readonly(action: &MountAction, destination: &Path) -> io::Result<()> {
    use nix::mount::{MsFlags, mount};

    let flags = match action.source {
        MountSource::Bind(_) => MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
        MountSource::Filesystem(_) => MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
    };
    mount(None::<&str>, destination, None::<&str>, flags, None::<&str>)?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn detach(destination: &Path) -> io::Result<()> {
    use nix::mount::{MntFlags, umount2};

    umount2(destination, MntFlags::MNT_DETACH)?;
    Ok(())
}
