//! The scoped environment orchestrator.
//!
//! Setup runs in a fixed order: resolve mounts, enter the namespace, apply
//! each mount, save process state, switch root, set the hostname. Every
//! applied mount is logged so teardown can undo exactly those mounts, most
//! recent first, whether setup finished, stopped halfway, or the work in
//! between failed.

use std::io;
use std::path::{Path, PathBuf};

use rootscope_common::config::EnvironmentConfig;
use rootscope_common::error::{Result, ScopeError, TeardownFailure};
use rootscope_common::types::MountAction;
use rootscope_core::controller::{NamespaceController, SavedState};
use rootscope_core::filesystem::mount::Applied;
use rootscope_core::resolver;

/// One entry in the [`ActionLog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The action that was attempted.
    pub action: MountAction,
    /// Whether it changed the mount table and needs reversing.
    pub applied: bool,
}

/// Append-only record of mount actions taken during setup.
#[derive(Debug, Default)]
pub struct ActionLog {
    entries: Vec<LogEntry>,
}

impl ActionLog {
    /// Appends an entry.
    pub fn record(&mut self, action: MountAction, applied: bool) {
        self.entries.push(LogEntry { action, applied });
    }

    /// Returns all entries in the order they were recorded.
    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Returns the number of entries that need reversing.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.entries.iter().filter(|e| e.applied).count()
    }

    /// Empties the log, yielding applied actions most recent first.
    fn drain_applied_rev(&mut self) -> impl Iterator<Item = MountAction> + use<> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .rev()
            .filter(|e| e.applied)
            .map(|e| e.action)
    }
}

/// What teardown undid and what it could not.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Actions that were reversed, in the order they were reversed.
    pub reversed: Vec<MountAction>,
    /// Steps that failed; teardown carried on past each of them.
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    /// Returns `true` if every step succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Converts the report into a result.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Teardown`] if any step failed.
    pub fn into_result(self) -> Result<Vec<MountAction>> {
        if self.failures.is_empty() {
            Ok(self.reversed)
        } else {
            Err(ScopeError::Teardown {
                failures: self.failures,
            })
        }
    }

    /// Logs each failure as a secondary warning behind `primary`.
    pub fn warn_secondary(&self, primary: &ScopeError) {
        for failure in &self.failures {
            tracing::warn!(
                primary = %primary,
                failure = %failure,
                "teardown step failed after earlier error"
            );
        }
    }
}

/// A live alternate-root environment.
///
/// Owns the controller, the action log, and the saved pre-entry state.
/// Teardown runs exactly once: on [`close`](Self::close), or on drop if
/// `close` was never reached.
#[derive(Debug)]
pub struct ScopedEnvironment<C: NamespaceController> {
    controller: C,
    root: PathBuf,
    log: ActionLog,
    saved: Option<SavedState>,
    torn_down: bool,
}

impl<C: NamespaceController> ScopedEnvironment<C> {
    /// Sets up the environment described by `config`.
    ///
    /// Mount requests are validated before anything else happens. If a
    /// later step fails, everything applied so far is torn down before the
    /// original error is returned; teardown failures at that point are
    /// only logged.
    ///
    /// # Errors
    ///
    /// Returns the first setup failure: [`ScopeError::InvalidMountSpec`],
    /// [`ScopeError::RootSwitch`] for a missing root,
    /// [`ScopeError::Namespace`], [`ScopeError::MountApply`], or
    /// [`ScopeError::AlreadyActive`].
    pub fn open(config: &EnvironmentConfig, controller: C) -> Result<Self> {
        let mut actions = resolver::resolve(config)?;
        let root = canonical_root(&config.target_root)?;
        resolver::rebase(&mut actions, &root);

        tracing::info!(
            root = %root.display(),
            mounts = actions.len(),
            hostname = ?config.hostname.as_ref().map(ToString::to_string),
            "opening scoped environment"
        );

        let mut env = Self {
            controller,
            root,
            log: ActionLog::default(),
            saved: None,
            torn_down: false,
        };
        if let Err(e) = env.setup(config, actions) {
            let report = env.teardown();
            report.warn_secondary(&e);
            tracing::debug!(
                reversed = report.reversed.len(),
                error = %e,
                "setup aborted"
            );
            return Err(e);
        }
        Ok(env)
    }

    fn setup(&mut self, config: &EnvironmentConfig, actions: Vec<MountAction>) -> Result<()> {
        self.controller.enter()?;

        for mut action in actions {
            match self.controller.apply(&self.root, &action)? {
                Applied::Mounted(at) => {
                    // Teardown runs after the root is restored, so it needs
                    // the host path the mount actually landed on.
                    action.destination = at;
                    self.log.record(action, true);
                }
                Applied::Skipped => self.log.record(action, false),
            }
        }

        self.saved = Some(self.controller.save_state()?);
        self.controller.switch_root(&self.root, config.skip_chdir)?;

        if let (Some(name), Some(saved)) = (&config.hostname, self.saved.as_mut()) {
            self.controller.set_hostname(name, saved)?;
        }
        Ok(())
    }

    /// Returns the canonical host path of the new root.
    #[must_use]
    pub fn target_root(&self) -> &Path {
        &self.root
    }

    /// Returns the log of mount actions taken during setup.
    #[must_use]
    pub fn log(&self) -> &ActionLog {
        &self.log
    }

    /// Returns the controller driving this environment.
    #[must_use]
    pub const fn controller(&self) -> &C {
        &self.controller
    }

    /// Tears the environment down and reports the outcome.
    pub fn close(mut self) -> TeardownReport {
        let report = self.teardown();
        tracing::info!(
            reversed = report.reversed.len(),
            failures = report.failures.len(),
            "scoped environment closed"
        );
        report
    }

    fn teardown(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.torn_down {
            return report;
        }
        self.torn_down = true;

        if let Some(saved) = self.saved.take() {
            report.failures.extend(self.controller.restore(saved));
        }
        for action in self.log.drain_applied_rev() {
            match self.controller.reverse(&action) {
                Ok(()) => report.reversed.push(action),
                Err(e) => {
                    tracing::debug!(action = %action, error = %e, "reversal failed");
                    report.failures.push(TeardownFailure {
                        step: format!("unmount {}", action.destination.display()),
                        source: e,
                    });
                }
            }
        }
        report
    }
}

impl<C: NamespaceController> Drop for ScopedEnvironment<C> {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        let report = self.teardown();
        for failure in &report.failures {
            tracing::warn!(failure = %failure, "teardown step failed while dropping environment");
        }
    }
}

/// Opens an environment, runs `work` inside it, and always closes it.
///
/// This runs in the calling process. The mount and UTS namespaces entered
/// during setup are not reversible in-process and stay in effect for the
/// rest of the process's life, although every mount, the root, the
/// working directory, and the hostname are restored. Use
/// [`crate::process::run_isolated`] when the namespace itself must go
/// away.
///
/// With [`LinuxController`](rootscope_core::controller::LinuxController)
/// the caller must be single-threaded: `unshare(CLONE_NEWNS)` fails with
/// `EINVAL` once a process has more than one thread, and `chroot(2)`
/// changes the root of every thread, not just the caller's.
///
/// # Errors
///
/// Returns the setup error if opening fails, the work's error if it fails
/// (teardown failures are then only logged), or
/// [`ScopeError::Teardown`] if the work succeeded but teardown did not.
pub fn scoped<C, T, F>(config: &EnvironmentConfig, controller: C, work: F) -> Result<T>
where
    C: NamespaceController,
    F: FnOnce(&ScopedEnvironment<C>) -> Result<T>,
{
    let env = ScopedEnvironment::open(config, controller)?;
    let outcome = work(&env);
    let report = env.close();
    match outcome {
        Ok(value) => report.into_result().map(|_| value),
        Err(e) => {
            report.warn_secondary(&e);
            Err(e)
        }
    }
}

fn canonical_root(path: &Path) -> Result<PathBuf> {
    let root = std::fs::canonicalize(path).map_err(|e| ScopeError::RootSwitch {
        path: path.to_path_buf(),
        source: e,
    })?;
    if !root.is_dir() {
        return Err(ScopeError::RootSwitch {
            path: path.to_path_buf(),
            source: io::Error::from(io::ErrorKind::NotADirectory),
        });
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use rootscope_common::types::MountSource;

    fn action(target: &str) -> MountAction {
        MountAction {
            source: MountSource::Bind(PathBuf::from(target)),
            target: PathBuf::from(target),
            destination: PathBuf::from("/mnt/root").join(target.trim_start_matches('/')),
            recursive: false,
            readonly: false,
            optional: false,
        }
    }

    #[test]
    fn log_counts_only_applied_entries() {
        let mut log = ActionLog::default();
        log.record(action("/a"), true);
        log.record(action("/b"), false);
        log.record(action("/c"), true);
        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.applied_count(), 2);
    }

    #[test]
    fn log_drains_applied_in_reverse() {
        let mut log = ActionLog::default();
        log.record(action("/a"), true);
        log.record(action("/b"), false);
        log.record(action("/c"), true);
        let drained: Vec<_> = log.drain_applied_rev().map(|a| a.target).collect();
        assert_eq!(drained, vec![PathBuf::from("/c"), PathBuf::from("/a")]);
        assert!(log.entries().is_empty());
    }

    #[test]
    fn clean_report_converts_to_reversed_actions() {
        let report = TeardownReport {
            reversed: vec![action("/a")],
            failures: Vec::new(),
        };
        assert!(report.is_clean());
        assert_eq!(report.into_result().unwrap().len(), 1);
    }

    #[test]
    fn failed_report_converts_to_teardown_error() {
        let report = TeardownReport {
            reversed: Vec::new(),
            failures: vec![TeardownFailure {
                step: "unmount /mnt/root/a".into(),
                source: io::Error::other("busy"),
            }],
        };
        let err = report.into_result().unwrap_err();
        assert!(matches!(err, ScopeError::Teardown { .. }));
    }

    #[test]
    fn missing_root_is_a_root_switch_error() {
        let err = canonical_root(Path::new("/nonexistent/rootscope-root")).unwrap_err();
        assert!(matches!(err, ScopeError::RootSwitch { .. }));
    }

    #[test]
    fn file_root_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = canonical_root(file.path()).unwrap_err();
        assert!(matches!(err, ScopeError::RootSwitch { .. }));
    }
}
