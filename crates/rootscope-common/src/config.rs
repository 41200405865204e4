//! Configuration model for a scoped environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScopeError};
use crate::types::{Hostname, MountRequest};

/// Everything needed to open a scoped environment.
///
/// Can be built fluently or loaded from JSON:
///
/// ```json
/// {
///   "target_root": "/mnt/image",
///   "mounts": [{ "source": "/srv/data", "destinations": ["/srv/data"] }],
///   "hostname": "builder.example.com"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Directory that becomes `/` inside the scope.
    pub target_root: PathBuf,
    /// Whether the default mount table is applied before `mounts`.
    #[serde(default = "default_true")]
    pub default_mounts: bool,
    /// Caller-supplied mounts, layered on top of the defaults.
    #[serde(default)]
    pub mounts: Vec<MountRequest>,
    /// Hostname to set inside a private UTS namespace.
    #[serde(default)]
    pub hostname: Option<Hostname>,
    /// Keep the current working directory instead of entering `/`.
    #[serde(default)]
    pub skip_chdir: bool,
}

const fn default_true() -> bool {
    true
}

impl EnvironmentConfig {
    /// Creates a configuration for `target_root` with the default mounts.
    #[must_use]
    pub fn new(target_root: impl Into<PathBuf>) -> Self {
        Self {
            target_root: target_root.into(),
            default_mounts: true,
            mounts: Vec::new(),
            hostname: None,
            skip_chdir: false,
        }
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ScopeError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Disables the default mount table.
    #[must_use]
    pub const fn without_default_mounts(mut self) -> Self {
        self.default_mounts = false;
        self
    }

    /// Adds a caller-supplied mount request.
    ///
    /// A request with the same source and flags as an existing one is
    /// folded into it as extra destinations.
    #[must_use]
    pub fn mount(mut self, request: MountRequest) -> Self {
        self.add_mount(request);
        self
    }

    /// Adds a caller-supplied mount request in place.
    pub fn add_mount(&mut self, request: MountRequest) {
        if let Some(existing) = self.mounts.iter_mut().find(|m| m.same_shape(&request)) {
            for destination in request.destinations {
                existing.add_destination(destination);
            }
        } else {
            self.mounts.push(request);
        }
    }

    /// Sets the hostname.
    #[must_use]
    pub fn hostname(mut self, hostname: Hostname) -> Self {
        self.hostname = Some(hostname);
        self
    }

    /// Keeps the working directory unchanged after the root switch.
    #[must_use]
    pub const fn skip_chdir(mut self, skip: bool) -> Self {
        self.skip_chdir = skip;
        self
    }

    /// Checks invariants that do not depend on the mount table.
    ///
    /// # Errors
    ///
    /// Returns an error if the target root is empty.
    pub fn validate(&self) -> Result<()> {
        if self.target_root.as_os_str().is_empty() {
            return Err(ScopeError::Config {
                message: "target root is empty".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::types::{FilesystemKind, MountSource};

    #[test]
    fn new_config_uses_default_mounts() {
        let config = EnvironmentConfig::new("/mnt/root");
        assert!(config.default_mounts);
        assert!(config.mounts.is_empty());
        assert!(!config.skip_chdir);
    }

    #[test]
    fn mount_folds_same_source_into_one_request() {
        let config = EnvironmentConfig::new("/mnt/root")
            .mount(MountRequest::bind("/srv/data"))
            .mount(MountRequest::new(
                MountSource::Bind("/srv/data".into()),
                "/home/user/data",
            ));
        assert_eq!(config.mounts.len(), 1);
        assert_eq!(config.mounts[0].destinations.len(), 2);
    }

    #[test]
    fn mount_keeps_different_flags_apart() {
        let config = EnvironmentConfig::new("/mnt/root")
            .mount(MountRequest::bind("/srv/data"))
            .mount(MountRequest::new(MountSource::Bind("/srv/data".into()), "/ro").readonly());
        assert_eq!(config.mounts.len(), 2);
    }

    #[test]
    fn validate_rejects_empty_root() {
        let err = EnvironmentConfig::new("").validate().unwrap_err();
        assert!(matches!(err, ScopeError::Config { .. }));
    }

    #[test]
    fn load_reads_json_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "target_root": "/mnt/image",
                "mounts": [{{"source": "tmpfs", "destinations": ["/tmp"]}}],
                "hostname": "builder.example.com"
            }}"#
        )
        .unwrap();

        let config = EnvironmentConfig::load(file.path()).unwrap();
        assert!(config.default_mounts);
        assert_eq!(
            config.mounts[0].source,
            MountSource::Filesystem(FilesystemKind::Tmpfs)
        );
        assert_eq!(
            config.hostname.as_ref().and_then(Hostname::domain),
            Some("example.com")
        );
    }

    #[test]
    fn load_reports_missing_file() {
        let err = EnvironmentConfig::load(Path::new("/nonexistent/rootscope.json")).unwrap_err();
        assert!(matches!(err, ScopeError::Io { .. }));
    }
}
