//! Domain primitive types used across the rootscope workspace.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScopeError};

/// Pseudo-filesystem types that can be mounted fresh inside the new root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemKind {
    /// Process information (`proc`).
    Proc,
    /// Kernel object view (`sysfs`).
    Sysfs,
    /// Memory-backed scratch filesystem (`tmpfs`).
    Tmpfs,
    /// Pseudo-terminal devices (`devpts`).
    Devpts,
}

impl FilesystemKind {
    /// Every supported kind, in lookup order.
    pub const ALL: [Self; 4] = [Self::Proc, Self::Sysfs, Self::Tmpfs, Self::Devpts];

    /// Returns the kernel filesystem type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proc => "proc",
            Self::Sysfs => "sysfs",
            Self::Tmpfs => "tmpfs",
            Self::Devpts => "devpts",
        }
    }
}

impl fmt::Display for FilesystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What gets attached at a mount destination.
///
/// Serialized as a plain string: the bare names `proc`, `sysfs`, `tmpfs`
/// and `devpts` select a pseudo-filesystem, anything else is a host path
/// to bind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MountSource {
    /// Bind an existing host path.
    Bind(PathBuf),
    /// Mount a fresh pseudo-filesystem instance.
    Filesystem(FilesystemKind),
}

impl MountSource {
    /// Returns the host path for bind sources.
    #[must_use]
    pub fn bind_path(&self) -> Option<&Path> {
        match self {
            Self::Bind(path) => Some(path),
            Self::Filesystem(_) => None,
        }
    }

    /// Returns `true` if this source is a pseudo-filesystem.
    #[must_use]
    pub const fn is_filesystem(&self) -> bool {
        matches!(self, Self::Filesystem(_))
    }
}

impl FromStr for MountSource {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(ScopeError::InvalidMountSpec {
                message: "mount source is empty".into(),
            });
        }
        Ok(FilesystemKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .map_or_else(|| Self::Bind(PathBuf::from(s)), Self::Filesystem))
    }
}

impl TryFrom<String> for MountSource {
    type Error = ScopeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MountSource> for String {
    fn from(source: MountSource) -> Self {
        source.to_string()
    }
}

impl fmt::Display for MountSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind(path) => write!(f, "{}", path.display()),
            Self::Filesystem(kind) => write!(f, "{kind}"),
        }
    }
}

/// A declarative request to mount one source at one or more destinations
/// inside the new root.
///
/// Destinations are paths as seen from inside the new root (`/dev`, not
/// `/mnt/image/dev`).
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    /// What to mount.
    pub source: MountSource,
    /// Where to mount it, in insertion order.
    pub destinations: Vec<PathBuf>,
    /// Also bind every mount nested under the source.
    #[serde(default)]
    pub recursive: bool,
    /// Remount the destination read-only after binding.
    #[serde(default)]
    pub readonly: bool,
    /// Skip the mount instead of failing when the bind source is missing.
    #[serde(default)]
    pub optional: bool,
}

impl MountRequest {
    /// Creates a request mounting `source` at a single destination.
    #[must_use]
    pub fn new(source: MountSource, destination: impl Into<PathBuf>) -> Self {
        Self {
            source,
            destinations: vec![destination.into()],
            recursive: false,
            readonly: false,
            optional: false,
        }
    }

    /// Creates a bind request whose destination mirrors the source path.
    #[must_use]
    pub fn bind(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(MountSource::Bind(path.clone()), path)
    }

    /// Creates a pseudo-filesystem request.
    #[must_use]
    pub fn filesystem(kind: FilesystemKind, destination: impl Into<PathBuf>) -> Self {
        Self::new(MountSource::Filesystem(kind), destination)
    }

    /// Adds another destination for the same source. Duplicates are ignored.
    #[must_use]
    pub fn to(mut self, destination: impl Into<PathBuf>) -> Self {
        self.add_destination(destination);
        self
    }

    /// Adds another destination in place. Duplicates are ignored.
    pub fn add_destination(&mut self, destination: impl Into<PathBuf>) {
        let destination = destination.into();
        if !self.destinations.contains(&destination) {
            self.destinations.push(destination);
        }
    }

    /// Marks the request as recursive.
    #[must_use]
    pub const fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    /// Marks the request as read-only.
    #[must_use]
    pub const fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    /// Marks the request as optional.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Returns `true` if `other` carries the same source and flags, so
    /// its destinations can be folded into this request.
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.source == other.source
            && self.recursive == other.recursive
            && self.readonly == other.readonly
            && self.optional == other.optional
    }
}

/// A fully resolved unit of mount work.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountAction {
    /// What to mount.
    pub source: MountSource,
    /// Normalized destination as seen from inside the new root.
    pub target: PathBuf,
    /// Absolute host path of the destination, under the target root.
    pub destination: PathBuf,
    /// Propagate the bind to nested mounts.
    pub recursive: bool,
    /// Remount read-only as a second step.
    pub readonly: bool,
    /// Skip when the bind source is missing.
    pub optional: bool,
}

impl MountAction {
    /// Short human label for the mount flavour.
    #[must_use]
    pub fn flavour(&self) -> &'static str {
        match (&self.source, self.recursive, self.readonly) {
            (MountSource::Filesystem(_), _, true) => "fs,ro",
            (MountSource::Filesystem(_), _, false) => "fs",
            (MountSource::Bind(_), true, _) => "rbind",
            (MountSource::Bind(_), false, true) => "bind,ro",
            (MountSource::Bind(_), false, false) => "bind",
        }
    }
}

impl fmt::Display for MountAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({})",
            self.source,
            self.destination.display(),
            self.flavour()
        )?;
        if self.optional {
            f.write_str(" [optional]")?;
        }
        Ok(())
    }
}

/// A hostname split into host and optional domain parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hostname {
    host: String,
    domain: Option<String>,
}

impl Hostname {
    /// Parses `host` or `host.domain`; the split happens at the first dot.
    ///
    /// # Errors
    ///
    /// Returns an error if the host part is empty or either part exceeds
    /// the kernel's 64-byte limit.
    pub fn parse(value: &str) -> Result<Self> {
        let (host, domain) = match value.split_once('.') {
            Some((host, domain)) if !domain.is_empty() => (host, Some(domain)),
            Some((host, _)) => (host, None),
            None => (value, None),
        };
        if host.is_empty() {
            return Err(ScopeError::Config {
                message: format!("invalid hostname: {value:?}"),
            });
        }
        for part in std::iter::once(host).chain(domain) {
            if part.len() > crate::constants::UTS_NAME_MAX {
                return Err(ScopeError::Config {
                    message: format!(
                        "hostname component {part:?} exceeds {} bytes",
                        crate::constants::UTS_NAME_MAX
                    ),
                });
            }
        }
        Ok(Self {
            host: host.to_string(),
            domain: domain.map(str::to_string),
        })
    }

    /// Returns the host part.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the domain part, if any.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }
}

impl TryFrom<String> for Hostname {
    type Error = ScopeError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Hostname> for String {
    fn from(name: Hostname) -> Self {
        name.to_string()
    }
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{}.{domain}", self.host),
            None => f.write_str(&self.host),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_source_recognizes_pseudo_filesystems() {
        assert_eq!(
            "proc".parse::<MountSource>().unwrap(),
            MountSource::Filesystem(FilesystemKind::Proc)
        );
        assert_eq!(
            "/proc".parse::<MountSource>().unwrap(),
            MountSource::Bind(PathBuf::from("/proc"))
        );
    }

    #[test]
    fn mount_source_rejects_empty() {
        let err = "".parse::<MountSource>().unwrap_err();
        assert!(matches!(err, ScopeError::InvalidMountSpec { .. }));
    }

    #[test]
    fn mount_source_serializes_as_string() {
        let json = serde_json::to_string(&MountSource::Filesystem(FilesystemKind::Tmpfs)).unwrap();
        assert_eq!(json, "\"tmpfs\"");
        let back: MountSource = serde_json::from_str("\"/srv/data\"").unwrap();
        assert_eq!(back, MountSource::Bind(PathBuf::from("/srv/data")));
    }

    #[test]
    fn request_ignores_duplicate_destinations() {
        let req = MountRequest::bind("/srv/data").to("/home/user/data").to("/srv/data");
        assert_eq!(
            req.destinations,
            vec![PathBuf::from("/srv/data"), PathBuf::from("/home/user/data")]
        );
    }

    #[test]
    fn request_deserializes_with_flag_defaults() {
        let req: MountRequest =
            serde_json::from_str(r#"{"source": "/srv", "destinations": ["/mnt/srv"]}"#).unwrap();
        assert!(!req.recursive && !req.readonly && !req.optional);
    }

    #[test]
    fn hostname_splits_at_first_dot() {
        let name = Hostname::parse("builder.example.com").unwrap();
        assert_eq!(name.host(), "builder");
        assert_eq!(name.domain(), Some("example.com"));
        assert_eq!(name.to_string(), "builder.example.com");
    }

    #[test]
    fn hostname_without_domain() {
        let name = Hostname::parse("builder").unwrap();
        assert_eq!(name.domain(), None);
        let trailing = Hostname::parse("builder.").unwrap();
        assert_eq!(trailing.domain(), None);
    }

    #[test]
    fn hostname_rejects_empty_host() {
        assert!(Hostname::parse("").is_err());
        assert!(Hostname::parse(".example.com").is_err());
    }

    #[test]
    fn hostname_rejects_oversized_part() {
        let long = "a".repeat(65);
        assert!(Hostname::parse(&long).is_err());
    }

    #[test]
    fn action_display_names_flavour() {
        let action = MountAction {
            source: MountSource::Bind(PathBuf::from("/dev")),
            target: PathBuf::from("/dev"),
            destination: PathBuf::from("/mnt/root/dev"),
            recursive: true,
            readonly: false,
            optional: false,
        };
        assert_eq!(action.to_string(), "/dev -> /mnt/root/dev (rbind)");
    }
}
