//! Root directory switching and its reversal.
//!
//! `chroot(2)` on its own cannot be undone, so the original root and
//! working directory are held open as directory descriptors beforehand.
//! Restoring means `fchdir` back to the saved root, `chroot(".")`, then
//! `fchdir` to the saved working directory.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use rootscope_common::error::{Result, ScopeError};

/// Root and working directory captured before a root switch.
#[derive(Debug)]
pub struct SavedRoot {
    root: File,
    cwd: File,
    cwd_path: Option<PathBuf>,
}

impl SavedRoot {
    /// Opens the current root and working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::RootSwitch`] if either directory cannot be
    /// opened.
    pub fn capture() -> Result<Self> {
        let open = |path: &str| {
            File::open(path).map_err(|e| ScopeError::RootSwitch {
                path: PathBuf::from(path),
                source: e,
            })
        };
        let root = open("/")?;
        let cwd = open(".")?;
        let cwd_path = std::env::current_dir().ok();
        tracing::debug!(cwd = ?cwd_path, "saved root and working directory");
        Ok(Self {
            root,
            cwd,
            cwd_path,
        })
    }

    /// Returns the working directory path at capture time, if it was
    /// representable.
    #[must_use]
    pub fn cwd_path(&self) -> Option<&Path> {
        self.cwd_path.as_deref()
    }

    /// Returns to the captured root and working directory.
    ///
    /// # Errors
    ///
    /// Returns the first OS error from `fchdir(2)` or `chroot(2)`.
    #[cfg(target_os = "linux")]
    pub fn restore(&self) -> io::Result<()> {
        fchdir(&self.root)?;
        nix::unistd::chroot(".")?;
        fchdir(&self.cwd)?;
        tracing::debug!(cwd = ?self.cwd_path, "restored root and working directory");
        Ok(())
    }

    /// Stub for non-Linux platforms.
    ///
    /// # Errors
    ///
    /// Always returns an error: root switching requires Linux.
    #[cfg(not(target_os = "linux"))]
    pub fn restore(&self) -> io::Result<()> {
        Err(io::Error::other("Linux required for root switching"))
    }
}

/// Changes the process root to `new_root`, entering `/` inside it unless
/// `skip_chdir` is set.
///
/// # Errors
///
/// Returns [`ScopeError::RootSwitch`] if `chroot(2)` or `chdir(2)` fails.
#[cfg(target_os = "linux")]
pub fn switch_root(new_root: &Path, skip_chdir: bool) -> Result<()> {
    nix::unistd::chroot(new_root).map_err(|e| ScopeError::RootSwitch {
        path: new_root.to_path_buf(),
        source: e.into(),
    })?;
    if !skip_chdir {
        nix::unistd::chdir("/").map_err(|e| ScopeError::RootSwitch {
            path: new_root.to_path_buf(),
            source: e.into(),
        })?;
    }
    tracing::info!(new_root = %new_root.display(), skip_chdir, "root switched");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: root switching requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn switch_root(_new_root: &Path, _skip_chdir: bool) -> Result<()> {
    Err(ScopeError::Config {
        message: "Linux required for root switching".into(),
    })
}

#[cfg(target_os = "linux")]
fn fchdir(dir: &File) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    // SAFETY: the descriptor is owned by `dir` and stays open for the
    // duration of the call.
    let ret = unsafe { libc::fchdir(dir.as_raw_fd()) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_records_working_directory() {
        let saved = SavedRoot::capture().unwrap();
        assert_eq!(
            saved.cwd_path().map(Path::to_path_buf),
            std::env::current_dir().ok()
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn switch_into_missing_root_fails() {
        let err = switch_root(Path::new("/nonexistent/rootscope-root"), false).unwrap_err();
        assert!(matches!(err, ScopeError::RootSwitch { .. }));
    }
}
