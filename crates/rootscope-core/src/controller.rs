//! The namespace controller abstraction.
//!
//! [`NamespaceController`] is the seam between the orchestrator, which
//! decides what happens and in which order, and the privileged OS calls
//! that make it happen. [`LinuxController`] is the real implementation;
//! tests substitute recording fakes.

use std::io;
use std::path::Path;

use rootscope_common::error::{Result, TeardownFailure};
use rootscope_common::types::{Hostname, MountAction};

use crate::filesystem::chroot::{self, SavedRoot};
use crate::filesystem::mount::{self, Applied};
use crate::namespace::uts::{self, UtsNames};
use crate::namespace::{ProcessLease, mount as mount_ns};

/// Process state captured before the root switch, needed to undo it.
#[derive(Debug, Default)]
pub struct SavedState {
    /// Original root and working directory.
    pub root: Option<SavedRoot>,
    /// Original hostname and domain name, if they were changed.
    pub names: Option<UtsNames>,
}

/// Privileged operations that bracket a batch of mount actions.
///
/// Setup calls return the typed error for their phase. Teardown calls
/// return plain OS errors, which the orchestrator collects without
/// stopping.
pub trait NamespaceController {
    /// Isolates the mount namespace and stops propagation to the parent.
    ///
    /// # Errors
    ///
    /// Returns a namespace error if isolation fails.
    fn enter(&mut self) -> Result<()>;

    /// Applies one action under `root`.
    ///
    /// # Errors
    ///
    /// Returns a mount error if the action could not be applied. A failed
    /// action must leave nothing mounted.
    fn apply(&mut self, root: &Path, action: &MountAction) -> Result<Applied>;

    /// Captures what [`restore`](Self::restore) needs to undo the root
    /// switch.
    ///
    /// # Errors
    ///
    /// Returns a root-switch error if the state cannot be captured.
    fn save_state(&mut self) -> Result<SavedState>;

    /// Changes the process root, and the working directory unless
    /// `skip_chdir` is set.
    ///
    /// # Errors
    ///
    /// Returns a root-switch error on failure.
    fn switch_root(&mut self, root: &Path, skip_chdir: bool) -> Result<()>;

    /// Sets the hostname in a private UTS namespace, recording the
    /// original names in `saved`.
    ///
    /// # Errors
    ///
    /// Returns a namespace error on failure.
    fn set_hostname(&mut self, name: &Hostname, saved: &mut SavedState) -> Result<()>;

    /// Undoes one applied action. Already-unmounted counts as success.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the destination could not be unmounted.
    fn reverse(&mut self, action: &MountAction) -> io::Result<()>;

    /// Restores the root, working directory, and hostname from `saved`.
    ///
    /// Every step is attempted; the returned list holds the ones that
    /// failed and is empty on full success.
    fn restore(&mut self, saved: SavedState) -> Vec<TeardownFailure>;
}

/// Controller that performs real Linux syscalls.
///
/// Holds the [`ProcessLease`] from [`enter`](NamespaceController::enter)
/// until it is dropped.
#[derive(Debug, Default)]
pub struct LinuxController {
    lease: Option<ProcessLease>,
    uts_isolated: bool,
}

impl LinuxController {
    /// Creates a controller that has not entered any namespace yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NamespaceController for LinuxController {
    fn enter(&mut self) -> Result<()> {
        if self.lease.is_none() {
            self.lease = Some(ProcessLease::acquire()?);
        }
        mount_ns::create_mount_namespace()
    }

    fn apply(&mut self, root: &Path, action: &MountAction) -> Result<Applied> {
        mount::apply_action(root, action)
    }

    fn save_state(&mut self) -> Result<SavedState> {
        Ok(SavedState {
            root: Some(SavedRoot::capture()?),
            names: None,
        })
    }

    fn switch_root(&mut self, root: &Path, skip_chdir: bool) -> Result<()> {
        chroot::switch_root(root, skip_chdir)
    }

    fn set_hostname(&mut self, name: &Hostname, saved: &mut SavedState) -> Result<()> {
        if !self.uts_isolated {
            uts::create_uts_namespace()?;
            self.uts_isolated = true;
        }
        if saved.names.is_none() {
            saved.names = Some(uts::current_names()?);
        }
        uts::set_hostname(name)
    }

    fn reverse(&mut self, action: &MountAction) -> io::Result<()> {
        mount::reverse_action(action)
    }

    fn restore(&mut self, saved: SavedState) -> Vec<TeardownFailure> {
        let mut failures = Vec::new();
        if let Some(root) = saved.root {
            if let Err(e) = root.restore() {
                failures.push(TeardownFailure {
                    step: "restore root and working directory".into(),
                    source: e,
                });
            }
        }
        if let Some(names) = saved.names {
            if let Err(e) = uts::restore_names(&names) {
                failures.push(TeardownFailure {
                    step: "restore hostname".into(),
                    source: e
                        .raw_os_error()
                        .map_or_else(|| io::Error::other(e.to_string()), io::Error::from_raw_os_error),
                });
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_controller_holds_no_lease() {
        let controller = LinuxController::new();
        assert!(controller.lease.is_none());
        assert!(!controller.uts_isolated);
    }

    #[test]
    fn restoring_empty_state_is_a_no_op() {
        let mut controller = LinuxController::new();
        assert!(controller.restore(SavedState::default()).is_empty());
    }
}
