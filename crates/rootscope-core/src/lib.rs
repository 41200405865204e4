//! # rootscope-core
//!
//! Low-level Linux isolation primitives for rootscope.
//!
//! This crate provides:
//! - **Resolution**: turning mount requests into an ordered action list.
//! - **Namespaces**: mount and UTS isolation, plus the process lease.
//! - **Filesystem**: bind and pseudo-filesystem mounts, reversible `chroot`.
//! - **Controller**: the [`controller::NamespaceController`] seam the
//!   orchestrator drives.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod controller;
pub mod filesystem;
pub mod namespace;
pub mod resolver;
