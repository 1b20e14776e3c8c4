//! Library-level tests for the parts of the lifecycle that never fork, so
//! they can run safely in-process against a real `Daemon`.

use daemon_core::Daemon;
use std::path::Path;
use tempfile::tempdir;

/// Foreground, no privdrop, no helper: the lifecycle's cheapest path.
#[test]
fn foreground_without_privdrop_skips_forking_entirely() {
    let dir = tempdir().unwrap();
    let pid_dir = dir.path().join("run");

    let mut daemon = Daemon::init1("svc", false, true, true, false).unwrap();
    daemon.init2(Some(&pid_dir), None).unwrap();
    daemon.init3(None, false).unwrap();
    daemon.fork().unwrap();
    daemon.secure().unwrap();
    daemon.acquire_pidfile().unwrap();
    daemon.finish().unwrap();

    let pidfile = pid_dir.join("svc.pid");
    let contents = std::fs::read_to_string(&pidfile).unwrap();
    assert_eq!(contents, format!("{}\n", std::process::id()));

    assert_eq!(daemon.status().unwrap(), std::process::id() as i32);
}

#[test]
fn chroot_without_a_username_is_a_configuration_error() {
    let dir = tempdir().unwrap();
    let pid_dir = dir.path().join("run");
    let chroot = tempdir().unwrap();

    let mut daemon = Daemon::init1("svc", false, true, true, false).unwrap();

    // Without root, the chroot is never actually attempted (will_chroot is
    // gated on invoked_as_root), so this only exercises the configuration
    // check meaningfully when the test itself runs as root. Either way
    // init2/init3 must not panic or abort.
    let init2_result = daemon.init2(Some(&pid_dir), Some(chroot.path()));
    assert!(init2_result.is_ok());

    let init3_result = daemon.init3(None, false);
    if nix::unistd::geteuid().is_root() {
        assert!(matches!(init3_result, Err(daemon_core::DaemonError::Configuration(_))));
    } else {
        assert!(init3_result.is_ok());
    }
}

#[test]
fn relative_pid_dir_is_a_configuration_error_not_a_panic() {
    let mut daemon = Daemon::init1("svc", false, true, true, false).unwrap();
    let err = daemon.init2(Some(Path::new("relative/run")), None).unwrap_err();
    assert!(matches!(err, daemon_core::DaemonError::Configuration(_)));
}

#[test]
fn no_pid_dir_means_status_is_always_not_running() {
    let mut daemon = Daemon::init1("svc", false, true, true, false).unwrap();
    daemon.init2(None, None).unwrap();
    daemon.init3(None, false).unwrap();
    daemon.fork().unwrap();
    daemon.secure().unwrap();
    daemon.acquire_pidfile().unwrap();

    assert_eq!(daemon.status().unwrap(), 0);
}
