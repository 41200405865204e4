//! Filesystem operations inside the target root.
//!
//! Provides per-action mount application and reversal, and the reversible
//! root switch built on `chroot(2)`.

pub mod chroot;
pub mod mount;
