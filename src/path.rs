//! Pidfile path computation.
//!
//! Given the daemon name and the caller-supplied pid directory and optional
//! chroot, derive the path to the pidfile as seen from outside any jail
//! (`pre_chroot`, used before `Phase::Secured`) and as seen from inside it
//! (`post_chroot`, used from `Phase::Secured` onward). The two are equal
//! whenever there is no chroot.

use crate::error::DaemonError;
use std::path::{Path, PathBuf};

/// The pre- and post-chroot views of the same pidfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFilePaths {
    pub pre_chroot: PathBuf,
    pub post_chroot: PathBuf,
}

/// Computes the pidfile paths for `name` given an optional `pid_dir` and an
/// optional `chroot`. `pid_dir == None` means no pidfile is configured at all
/// (`status`/`stop`/`signal` report "not running" and `acquire_pidfile`
/// advances the phase without locking anything), mirroring the "pid_dir not
/// given" mode. `invoked_as_root` selects whether the post-chroot view
/// actually differs from the pre-chroot one: without root, a chroot can't be
/// entered, so the two paths coincide regardless of whether one was requested.
pub fn compute(
    name: &str,
    pid_dir: Option<&Path>,
    chroot: Option<&Path>,
    invoked_as_root: bool,
) -> Result<Option<PidFilePaths>, DaemonError> {
    let Some(pid_dir) = pid_dir else {
        return Ok(None);
    };

    if !pid_dir.is_absolute() {
        return Err(DaemonError::configuration(format!(
            "pid directory {} must be an absolute path",
            pid_dir.display()
        )));
    }
    if let Some(chroot) = chroot {
        if !chroot.is_absolute() {
            return Err(DaemonError::configuration(format!(
                "chroot path {} must be an absolute path",
                chroot.display()
            )));
        }
        match std::fs::metadata(chroot) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(DaemonError::configuration(format!(
                    "chroot path {} exists but is not a directory",
                    chroot.display()
                )));
            }
            Err(_) => {
                return Err(DaemonError::configuration(format!(
                    "chroot path {} does not exist",
                    chroot.display()
                )));
            }
        }
    }

    let file_name = format!("{name}.pid");

    let pre_chroot = match chroot {
        Some(chroot) => join_stripping_root(chroot, pid_dir).join(&file_name),
        None => pid_dir.join(&file_name),
    };

    let post_chroot = if chroot.is_some() && invoked_as_root {
        pid_dir.join(&file_name)
    } else {
        pre_chroot.clone()
    };

    Ok(Some(PidFilePaths { pre_chroot, post_chroot }))
}

/// Joins `chroot` with `pid_dir`, treating `pid_dir` (itself absolute) as
/// relative to `chroot` rather than letting `PathBuf::join` discard `chroot`
/// outright the way it would for a second absolute path.
fn join_stripping_root(chroot: &Path, pid_dir: &Path) -> PathBuf {
    let mut result = chroot.to_path_buf();
    for component in pid_dir.components() {
        if component.as_os_str() != std::path::Component::RootDir.as_os_str() {
            result.push(component);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_pid_dir_means_no_pidfile_configured() {
        assert_eq!(compute("svc", None, None, true).unwrap(), None);
    }

    #[test]
    fn no_chroot_pre_and_post_are_equal() {
        let paths = compute("svc", Some(Path::new("/var/run/svc")), None, true).unwrap().unwrap();
        assert_eq!(paths.pre_chroot, PathBuf::from("/var/run/svc/svc.pid"));
        assert_eq!(paths.pre_chroot, paths.post_chroot);
    }

    #[test]
    fn relative_pid_dir_is_rejected() {
        let err =
            compute("svc", Some(Path::new("relative/path")), None, true).unwrap_err();
        assert!(matches!(err, DaemonError::Configuration(_)));
    }

    #[test]
    fn chroot_to_missing_directory_is_rejected() {
        let err = compute(
            "svc",
            Some(Path::new("/run")),
            Some(Path::new("/does/not/exist")),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, DaemonError::Configuration(_)));
    }

    #[test]
    fn chroot_with_root_computes_distinct_pre_and_post_paths() {
        let dir = tempfile::tempdir().unwrap();
        let paths = compute("svc", Some(Path::new("/run")), Some(dir.path()), true)
            .unwrap()
            .unwrap();
        assert_eq!(paths.post_chroot, PathBuf::from("/run/svc.pid"));
        assert_eq!(paths.pre_chroot, dir.path().join("run/svc.pid"));
    }

    #[test]
    fn chroot_without_root_leaves_pre_and_post_equal() {
        let dir = tempfile::tempdir().unwrap();
        let paths = compute("svc", Some(Path::new("/run")), Some(dir.path()), false)
            .unwrap()
            .unwrap();
        assert_eq!(paths.pre_chroot, paths.post_chroot);
    }
}
