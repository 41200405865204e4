//! Scoped environment lifecycle for rootscope.
//!
//! [`environment::ScopedEnvironment`] drives setup through a
//! [`rootscope_core::controller::NamespaceController`], records every
//! applied mount, and unwinds them in reverse on every exit path.
//! [`process::run_isolated`] runs a whole scope in a forked child so its
//! namespace dies with it.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod environment;
pub mod exec;
pub mod process;
