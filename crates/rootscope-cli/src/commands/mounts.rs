//! Mount flags shared by `run` and `plan`, and their translation into an
//! [`EnvironmentConfig`].

use std::path::{Path, PathBuf};

use clap::{ArgMatches, Args};
use rootscope_common::config::EnvironmentConfig;
use rootscope_common::error::{Result, ScopeError};
use rootscope_common::types::{Hostname, MountRequest, MountSource};

/// How a `SRC[:DEST]` spec is mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindFlavour {
    /// `-B/--bind`
    Plain,
    /// `-R/--rbind`
    Recursive,
    /// `--ro/--readonly`
    ReadOnly,
}

/// Flags describing the environment around the command.
#[derive(Args, Debug, Default)]
pub struct MountArgs {
    /// Bind SRC at DEST inside the root (DEST defaults to SRC).
    #[arg(short = 'B', long = "bind", value_name = "SRC[:DEST]")]
    pub bind: Vec<String>,

    /// Recursively bind SRC, including mounts nested under it.
    #[arg(short = 'R', long = "rbind", value_name = "SRC[:DEST]")]
    pub rbind: Vec<String>,

    /// Bind SRC read-only.
    #[arg(long = "ro", visible_alias = "readonly", value_name = "SRC[:DEST]")]
    pub readonly: Vec<String>,

    /// Do not apply the default mounts (/dev, /proc, /sys, /dev/shm, resolv.conf).
    #[arg(long)]
    pub no_mounts: bool,

    /// Hostname inside the root; a dotted name also sets the domain name.
    #[arg(long, value_name = "NAME")]
    pub hostname: Option<String>,

    /// Keep the current working directory instead of entering `/`.
    #[arg(long)]
    pub skip_chdir: bool,

    /// JSON configuration to start from; flags are layered on top.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl MountArgs {
    /// Builds the environment for `root`.
    ///
    /// Mount flags keep their command-line order when `matches` is given;
    /// otherwise `--bind`, `--rbind` and `--ro` specs follow each other in
    /// that order.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or a spec or
    /// hostname is malformed.
    pub fn to_config(&self, root: &Path, matches: Option<&ArgMatches>) -> Result<EnvironmentConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let mut base = EnvironmentConfig::load(path)?;
                base.target_root = root.to_path_buf();
                base
            }
            None => EnvironmentConfig::new(root),
        };

        if self.no_mounts {
            config.default_mounts = false;
        }
        for request in self.ordered_requests(matches)? {
            config.add_mount(request);
        }
        if let Some(name) = &self.hostname {
            config.hostname = Some(Hostname::parse(name)?);
        }
        config.skip_chdir |= self.skip_chdir;

        config.validate()?;
        Ok(config)
    }

    fn ordered_requests(&self, matches: Option<&ArgMatches>) -> Result<Vec<MountRequest>> {
        let groups = [
            ("bind", &self.bind, BindFlavour::Plain),
            ("rbind", &self.rbind, BindFlavour::Recursive),
            ("readonly", &self.readonly, BindFlavour::ReadOnly),
        ];

        let mut specs = Vec::new();
        for (id, values, flavour) in groups {
            let indices: Vec<usize> = matches
                .and_then(|m| m.indices_of(id))
                .map(|it| it.collect())
                .unwrap_or_default();
            for (i, value) in values.iter().enumerate() {
                let position = indices.get(i).copied().unwrap_or(usize::MAX);
                specs.push((position, value.as_str(), flavour));
            }
        }
        specs.sort_by_key(|(position, ..)| *position);

        specs
            .into_iter()
            .map(|(_, spec, flavour)| parse_spec(spec, flavour))
            .collect()
    }
}

/// Parses `SRC[:DEST]` into a request.
///
/// A relative bind source is taken relative to the current directory.
/// Without `:DEST` the source path doubles as the destination; for the
/// pseudo-filesystems `proc`, `sysfs`, `tmpfs` and `devpts` that means
/// `/proc` and so on.
///
/// # Errors
///
/// Returns [`ScopeError::InvalidMountSpec`] if either side is empty.
pub fn parse_spec(spec: &str, flavour: BindFlavour) -> Result<MountRequest> {
    let (src, dest) = match spec.split_once(':') {
        Some((src, dest)) => (src, Some(dest)),
        None => (spec, None),
    };
    if dest.is_some_and(str::is_empty) {
        return Err(ScopeError::InvalidMountSpec {
            message: format!("{spec}: destination after ':' is empty"),
        });
    }

    let source = match src.parse::<MountSource>()? {
        MountSource::Bind(path) if path.is_relative() => {
            MountSource::Bind(std::path::absolute(&path).map_err(|e| ScopeError::Io {
                path: path.clone(),
                source: e,
            })?)
        }
        source => source,
    };
    let dest = dest.map_or_else(
        || match &source {
            MountSource::Bind(path) => path.clone(),
            MountSource::Filesystem(kind) => Path::new("/").join(kind.as_str()),
        },
        PathBuf::from,
    );

    let request = MountRequest::new(source, dest);
    Ok(match flavour {
        BindFlavour::Plain => request,
        BindFlavour::Recursive => request.recursive(),
        BindFlavour::ReadOnly => request.readonly(),
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use clap::{CommandFactory, FromArgMatches};
    use rootscope_common::types::FilesystemKind;

    use super::*;

    #[derive(Parser, Debug)]
    struct Harness {
        #[command(flatten)]
        mounts: MountArgs,
    }

    fn config_from(args: &[&str]) -> EnvironmentConfig {
        let matches = Harness::command()
            .try_get_matches_from(std::iter::once("rootscope").chain(args.iter().copied()))
            .unwrap();
        let harness = Harness::from_arg_matches(&matches).unwrap();
        harness
            .mounts
            .to_config(Path::new("/mnt/root"), Some(&matches))
            .unwrap()
    }

    #[test]
    fn source_alone_mirrors_destination() {
        let request = parse_spec("/srv/data", BindFlavour::Plain).unwrap();
        assert_eq!(request.source, MountSource::Bind("/srv/data".into()));
        assert_eq!(request.destinations, vec![PathBuf::from("/srv/data")]);
    }

    #[test]
    fn explicit_destination_is_used() {
        let request = parse_spec("/srv/data:/data", BindFlavour::ReadOnly).unwrap();
        assert_eq!(request.destinations, vec![PathBuf::from("/data")]);
        assert!(request.readonly);
    }

    #[test]
    fn pseudo_filesystem_defaults_to_root_level() {
        let request = parse_spec("tmpfs", BindFlavour::Plain).unwrap();
        assert_eq!(request.source, MountSource::Filesystem(FilesystemKind::Tmpfs));
        assert_eq!(request.destinations, vec![PathBuf::from("/tmpfs")]);

        let request = parse_spec("tmpfs:/tmp", BindFlavour::Plain).unwrap();
        assert_eq!(request.destinations, vec![PathBuf::from("/tmp")]);
    }

    #[test]
    fn relative_source_is_made_absolute() {
        let request = parse_spec("data", BindFlavour::Plain).unwrap();
        let path = request.source.bind_path().unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("data"));
    }

    #[test]
    fn empty_parts_are_rejected() {
        assert!(parse_spec("", BindFlavour::Plain).is_err());
        assert!(parse_spec(":/data", BindFlavour::Plain).is_err());
        assert!(parse_spec("/srv:", BindFlavour::Plain).is_err());
    }

    #[test]
    fn same_source_specs_merge_into_one_request() {
        let config = config_from(&["-B", "/srv/data", "-B", "/srv/data:/home/user/data"]);
        assert_eq!(config.mounts.len(), 1);
        assert_eq!(config.mounts[0].destinations.len(), 2);
    }

    #[test]
    fn flags_keep_command_line_order() {
        let config = config_from(&["--ro", "/etc:/a", "-R", "/srv:/b", "-B", "/opt:/c"]);
        let first: Vec<_> = config.mounts.iter().map(|m| m.destinations[0].clone()).collect();
        assert_eq!(first, vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")]);
        assert!(config.mounts[0].readonly);
        assert!(config.mounts[1].recursive);
    }

    #[test]
    fn environment_flags_are_applied() {
        let config = config_from(&["--no-mounts", "--hostname", "build.example.com", "--skip-chdir"]);
        assert!(!config.default_mounts);
        assert!(config.skip_chdir);
        let name = config.hostname.unwrap();
        assert_eq!(name.host(), "build");
        assert_eq!(name.domain(), Some("example.com"));
    }

    #[test]
    fn config_file_is_layered_under_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scope.json");
        std::fs::write(
            &path,
            r#"{"target_root": "/ignored", "default_mounts": false, "mounts": [{"source": "/srv", "destinations": ["/srv"]}]}"#,
        )
        .unwrap();

        let config = config_from(&["--config", path.to_str().unwrap(), "-B", "/opt"]);
        assert_eq!(config.target_root, PathBuf::from("/mnt/root"));
        assert!(!config.default_mounts);
        assert_eq!(config.mounts.len(), 2);
    }
}
