//! Linux namespace management for scope isolation.
//!
//! Provides safe wrappers around `unshare(2)` for the mount and UTS
//! namespaces, plus the process lease that keeps two environments from
//! mutating the same process-wide state at once.

pub mod mount;
pub mod uts;

use std::sync::atomic::{AtomicBool, Ordering};

use rootscope_common::error::{Result, ScopeError};

static LEASE_HELD: AtomicBool = AtomicBool::new(false);

/// Exclusive claim on this process's namespace, mount, root, and hostname
/// state.
///
/// Mount tables and namespaces belong to the whole process rather than a
/// thread, so only one lease can exist at a time. Dropping it releases the
/// claim.
#[derive(Debug)]
pub struct ProcessLease {
    _private: (),
}

impl ProcessLease {
    /// Claims the process lease.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::AlreadyActive`] if another lease is live.
    pub fn acquire() -> Result<Self> {
        LEASE_HELD
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ScopeError::AlreadyActive)?;
        tracing::trace!("process lease acquired");
        Ok(Self { _private: () })
    }

    /// Returns `true` if some lease is currently held in this process.
    #[must_use]
    pub fn is_held() -> bool {
        LEASE_HELD.load(Ordering::Acquire)
    }
}

impl Drop for ProcessLease {
    fn drop(&mut self) {
        LEASE_HELD.store(false, Ordering::Release);
        tracing::trace!("process lease released");
    }
}
