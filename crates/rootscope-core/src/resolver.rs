//! Mount request resolution.
//!
//! Turns the default mount table plus caller requests into the ordered
//! list of [`MountAction`]s a controller applies. Resolution is pure: it
//! never touches the filesystem, so every rejection here happens before
//! any OS state changes.

use std::path::{Component, Path, PathBuf};

use rootscope_common::config::EnvironmentConfig;
use rootscope_common::constants;
use rootscope_common::error::{Result, ScopeError};
use rootscope_common::types::{MountAction, MountRequest, MountSource};

/// Resolves the mounts for `config` into application order.
///
/// Defaults come first, in table order. A caller request whose destination
/// matches a default takes over that default's slot; every other caller
/// action follows in insertion order.
///
/// # Errors
///
/// Returns [`ScopeError::InvalidMountSpec`] if any request is malformed,
/// escapes the target root, duplicates another caller destination, or
/// would hide a mount applied before it.
pub fn resolve(config: &EnvironmentConfig) -> Result<Vec<MountAction>> {
    config.validate()?;
    let root = config.target_root.as_path();

    let mut actions = Vec::new();
    if config.default_mounts {
        for request in constants::default_mounts() {
            actions.extend(expand(root, &request)?);
        }
    }
    let defaults = actions.len();
    let mut overridden = vec![false; defaults];

    for request in &config.mounts {
        for action in expand(root, request)? {
            let slot = actions.iter().position(|a| a.target == action.target);
            match slot {
                Some(i) if i < defaults && !overridden[i] => {
                    tracing::debug!(dest = %action.target.display(), "caller mount replaces default");
                    overridden[i] = true;
                    actions[i] = action;
                }
                Some(_) => {
                    return Err(invalid(format!(
                        "destination {} is requested more than once",
                        action.target.display()
                    )));
                }
                None => actions.push(action),
            }
        }
    }

    check_shadowing(&actions)?;
    tracing::debug!(count = actions.len(), "mount actions resolved");
    Ok(actions)
}

/// Expands one request into an action per destination.
///
/// # Errors
///
/// Returns [`ScopeError::InvalidMountSpec`] if the request shape is invalid.
pub fn expand(root: &Path, request: &MountRequest) -> Result<Vec<MountAction>> {
    validate_request(request)?;
    request
        .destinations
        .iter()
        .map(|dest| {
            let target = normalize_target(dest)?;
            let destination = anchor(root, &target);
            Ok(MountAction {
                source: request.source.clone(),
                target,
                destination,
                recursive: request.recursive,
                readonly: request.readonly,
                optional: request.optional,
            })
        })
        .collect()
}

/// Re-anchors resolved actions under `root`, typically the canonical form
/// of the root they were resolved against.
pub fn rebase(actions: &mut [MountAction], root: &Path) {
    for action in actions {
        action.destination = anchor(root, &action.target);
    }
}

fn anchor(root: &Path, target: &Path) -> PathBuf {
    root.join(target.strip_prefix("/").unwrap_or(target))
}

fn validate_request(request: &MountRequest) -> Result<()> {
    if request.readonly && request.recursive {
        return Err(invalid(format!(
            "{}: read-only recursive bind mounts are not supported",
            request.source
        )));
    }
    match &request.source {
        MountSource::Bind(path) if path.as_os_str().is_empty() => {
            return Err(invalid("mount source is empty".into()));
        }
        MountSource::Bind(path) if !path.is_absolute() => {
            return Err(invalid(format!(
                "bind source {} must be an absolute path",
                path.display()
            )));
        }
        MountSource::Filesystem(kind) if request.recursive => {
            return Err(invalid(format!("{kind} cannot be mounted recursively")));
        }
        _ => {}
    }
    if request.destinations.is_empty() {
        return Err(invalid(format!("{} has no destination", request.source)));
    }
    Ok(())
}

/// Lexically normalizes a destination to an absolute path inside the root.
///
/// `..` is resolved against the root itself, so any path that climbs out
/// of it is rejected rather than clamped.
fn normalize_target(dest: &Path) -> Result<PathBuf> {
    if dest.as_os_str().is_empty() {
        return Err(invalid("mount destination is empty".into()));
    }

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in dest.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(invalid(format!(
                        "destination {} escapes the target root",
                        dest.display()
                    )));
                }
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    if parts.is_empty() {
        return Err(invalid(format!(
            "destination {} resolves to the target root itself",
            dest.display()
        )));
    }

    let mut target = PathBuf::from("/");
    target.extend(parts);
    Ok(target)
}

/// Rejects an action that would be mounted over a path already holding an
/// earlier mount, hiding it for the life of the scope.
fn check_shadowing(actions: &[MountAction]) -> Result<()> {
    for (i, later) in actions.iter().enumerate() {
        if let Some(earlier) = actions[..i]
            .iter()
            .find(|a| a.target != later.target && a.target.starts_with(&later.target))
        {
            return Err(invalid(format!(
                "mount at {} would hide the earlier mount at {}",
                later.target.display(),
                earlier.target.display()
            )));
        }
    }
    Ok(())
}

const fn invalid(message: String) -> ScopeError {
    ScopeError::InvalidMountSpec { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootscope_common::types::FilesystemKind;

    fn targets(actions: &[MountAction]) -> Vec<&str> {
        actions
            .iter()
            .map(|a| a.target.to_str().unwrap())
            .collect()
    }

    fn bare(root: &str) -> EnvironmentConfig {
        EnvironmentConfig::new(root).without_default_mounts()
    }

    #[test]
    fn defaults_resolve_in_table_order() {
        let actions = resolve(&EnvironmentConfig::new("/mnt/root")).unwrap();
        assert_eq!(
            targets(&actions),
            vec!["/dev", "/proc", "/sys", "/dev/shm", "/etc/resolv.conf"]
        );
        assert_eq!(actions[0].destination, PathBuf::from("/mnt/root/dev"));
        assert!(actions[0].recursive);
    }

    #[test]
    fn no_defaults_and_no_mounts_yields_nothing() {
        assert!(resolve(&bare("/mnt/root")).unwrap().is_empty());
    }

    #[test]
    fn custom_mounts_follow_defaults() {
        let config = EnvironmentConfig::new("/mnt/root").mount(MountRequest::bind("/srv/data"));
        let actions = resolve(&config).unwrap();
        assert_eq!(actions.len(), 6);
        assert_eq!(actions[5].target, PathBuf::from("/srv/data"));
    }

    #[test]
    fn custom_mount_replaces_default_in_place() {
        let config = EnvironmentConfig::new("/mnt/root")
            .mount(MountRequest::new(MountSource::Bind("/proc".into()), "/proc").recursive());
        let actions = resolve(&config).unwrap();
        assert_eq!(actions.len(), 5);
        assert_eq!(actions[1].source, MountSource::Bind("/proc".into()));
        assert!(actions[1].recursive);
    }

    #[test]
    fn one_source_expands_to_each_destination() {
        let config = bare("/mnt/root").mount(MountRequest::bind("/srv/data").to("/home/user/data"));
        let actions = resolve(&config).unwrap();
        assert_eq!(targets(&actions), vec!["/srv/data", "/home/user/data"]);
        assert!(actions.iter().all(|a| a.source == MountSource::Bind("/srv/data".into())));
    }

    #[test]
    fn readonly_recursive_is_rejected() {
        let config = bare("/mnt/root").mount(MountRequest::bind("/srv").recursive().readonly());
        let err = resolve(&config).unwrap_err();
        assert!(matches!(err, ScopeError::InvalidMountSpec { .. }));
    }

    #[test]
    fn traversal_out_of_root_is_rejected() {
        let config = bare("/mnt/root").mount(MountRequest::new(
            MountSource::Bind("/srv".into()),
            "/srv/../../etc",
        ));
        let err = resolve(&config).unwrap_err();
        assert!(err.to_string().contains("escapes the target root"));
    }

    #[test]
    fn traversal_that_stays_inside_is_normalized() {
        let config = bare("/mnt/root").mount(MountRequest::new(
            MountSource::Bind("/srv".into()),
            "opt/./x/../srv",
        ));
        let actions = resolve(&config).unwrap();
        assert_eq!(actions[0].target, PathBuf::from("/opt/srv"));
        assert_eq!(actions[0].destination, PathBuf::from("/mnt/root/opt/srv"));
    }

    #[test]
    fn root_itself_is_rejected_as_destination() {
        let config = bare("/mnt/root").mount(MountRequest::new(MountSource::Bind("/srv".into()), "/"));
        assert!(resolve(&config).is_err());
    }

    #[test]
    fn empty_source_and_destination_are_rejected() {
        let empty_source = bare("/mnt/root").mount(MountRequest::new(MountSource::Bind(PathBuf::new()), "/x"));
        assert!(resolve(&empty_source).is_err());
        let empty_dest = bare("/mnt/root").mount(MountRequest::new(MountSource::Bind("/srv".into()), ""));
        assert!(resolve(&empty_dest).is_err());
    }

    #[test]
    fn relative_bind_source_is_rejected() {
        let config = bare("/mnt/root").mount(MountRequest::bind("srv/data"));
        assert!(resolve(&config).is_err());
    }

    #[test]
    fn recursive_filesystem_is_rejected() {
        let config = bare("/mnt/root")
            .mount(MountRequest::filesystem(FilesystemKind::Tmpfs, "/tmp").recursive());
        assert!(resolve(&config).is_err());
    }

    #[test]
    fn duplicate_custom_destination_is_rejected() {
        let config = bare("/mnt/root")
            .mount(MountRequest::new(MountSource::Bind("/a".into()), "/data"))
            .mount(MountRequest::new(MountSource::Bind("/b".into()), "/data"));
        let err = resolve(&config).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn mount_hiding_an_earlier_one_is_rejected() {
        let config = bare("/mnt/root")
            .mount(MountRequest::new(MountSource::Bind("/a".into()), "/data/inner"))
            .mount(MountRequest::new(MountSource::Bind("/b".into()), "/data"));
        let err = resolve(&config).unwrap_err();
        assert!(err.to_string().contains("would hide"));
    }

    #[test]
    fn nested_mount_after_parent_is_accepted() {
        let config = bare("/mnt/root")
            .mount(MountRequest::new(MountSource::Bind("/b".into()), "/data"))
            .mount(MountRequest::new(MountSource::Bind("/a".into()), "/data/inner"));
        assert_eq!(resolve(&config).unwrap().len(), 2);
    }

    #[test]
    fn rebase_moves_destinations_under_new_root() {
        let mut actions = resolve(&EnvironmentConfig::new("link/root")).unwrap();
        rebase(&mut actions, Path::new("/srv/images/root"));
        assert_eq!(actions[0].destination, PathBuf::from("/srv/images/root/dev"));
        assert_eq!(actions[0].target, PathBuf::from("/dev"));
    }

    #[test]
    fn sibling_prefix_is_not_nesting() {
        let config = bare("/mnt/root")
            .mount(MountRequest::new(MountSource::Bind("/a".into()), "/database"))
            .mount(MountRequest::new(MountSource::Bind("/b".into()), "/data"));
        assert_eq!(resolve(&config).unwrap().len(), 2);
    }
}
