//! UTS namespace isolation.
//!
//! Lets the scope carry its own hostname and domain name without touching
//! the host's.

use std::ffi::OsString;

use rootscope_common::error::{Result, ScopeError};
use rootscope_common::types::Hostname;

/// Hostname and domain name captured before they were changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtsNames {
    /// Original hostname.
    pub hostname: OsString,
    /// Original NIS domain name (`(none)` on most systems).
    pub domainname: Vec<u8>,
}

/// Creates a new UTS namespace for the calling process.
///
/// # Errors
///
/// Returns an error if the `unshare(CLONE_NEWUTS)` syscall fails.
#[cfg(target_os = "linux")]
pub fn create_uts_namespace() -> Result<()> {
    use nix::sched::{CloneFlags, unshare};

    unshare(CloneFlags::CLONE_NEWUTS).map_err(|e| ScopeError::Namespace {
        operation: "unshare(CLONE_NEWUTS)",
        source: e.into(),
    })?;
    tracing::debug!("UTS namespace created");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: UTS namespaces require Linux.
#[cfg(not(target_os = "linux"))]
pub fn create_uts_namespace() -> Result<()> {
    Err(ScopeError::Config {
        message: "Linux required for UTS namespace isolation".into(),
    })
}

/// Reads the current hostname and domain name.
///
/// # Errors
///
/// Returns an error if `gethostname(2)` or `getdomainname(2)` fails.
#[cfg(target_os = "linux")]
pub fn current_names() -> Result<UtsNames> {
    let hostname = nix::unistd::gethostname().map_err(|e| ScopeError::Namespace {
        operation: "gethostname",
        source: e.into(),
    })?;

    let mut buf = [0u8; rootscope_common::constants::UTS_NAME_MAX + 1];
    // SAFETY: buf is a valid writable buffer and its exact length is passed.
    let ret = unsafe { libc::getdomainname(buf.as_mut_ptr().cast(), buf.len()) };
    if ret != 0 {
        return Err(ScopeError::Namespace {
            operation: "getdomainname",
            source: std::io::Error::last_os_error(),
        });
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());

    Ok(UtsNames {
        hostname,
        domainname: buf[..len].to_vec(),
    })
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: UTS names are only managed on Linux.
#[cfg(not(target_os = "linux"))]
pub fn current_names() -> Result<UtsNames> {
    Err(ScopeError::Config {
        message: "Linux required for UTS namespace isolation".into(),
    })
}

/// Sets the hostname, and the domain name when one is present.
///
/// # Errors
///
/// Returns an error if `sethostname(2)` or `setdomainname(2)` fails.
#[cfg(target_os = "linux")]
pub fn set_hostname(name: &Hostname) -> Result<()> {
    write_names(std::ffi::OsStr::new(name.host()), name.domain().map(str::as_bytes))?;
    tracing::debug!(hostname = %name, "hostname set");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: UTS names are only managed on Linux.
#[cfg(not(target_os = "linux"))]
pub fn set_hostname(_name: &Hostname) -> Result<()> {
    Err(ScopeError::Config {
        message: "Linux required for UTS namespace isolation".into(),
    })
}

/// Puts back names captured by [`current_names`].
///
/// # Errors
///
/// Returns an error if either name cannot be written.
#[cfg(target_os = "linux")]
pub fn restore_names(names: &UtsNames) -> Result<()> {
    write_names(&names.hostname, Some(names.domainname.as_slice()))?;
    tracing::debug!("hostname restored");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: UTS names are only managed on Linux.
#[cfg(not(target_os = "linux"))]
pub fn restore_names(_names: &UtsNames) -> Result<()> {
    Err(ScopeError::Config {
        message: "Linux required for UTS namespace isolation".into(),
    })
}

#[cfg(target_os = "linux")]
fn write_names(hostname: &std::ffi::OsStr, domainname: Option<&[u8]>) -> Result<()> {
    nix::unistd::sethostname(hostname).map_err(|e| ScopeError::Namespace {
        operation: "sethostname",
        source: e.into(),
    })?;

    if let Some(domain) = domainname {
        // SAFETY: domain points to `domain.len()` initialized bytes; the
        // kernel copies them and does not require a trailing NUL.
        let ret = unsafe { libc::setdomainname(domain.as_ptr().cast(), domain.len()) };
        if ret != 0 {
            return Err(ScopeError::Namespace {
                operation: "setdomainname",
                source: std::io::Error::last_os_error(),
            });
        }
    }
    Ok(())
}
