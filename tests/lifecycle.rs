//! End-to-end lifecycle tests against the compiled `daemonctl` binary.
//!
//! Runs the full fork/secure/acquire/finish sequence out-of-process: anything
//! that forks or could escalate to a fatal exit needs its own address space,
//! since a forked child sharing this test binary's address space would be
//! running an entire `cargo test` harness through a chroot/privdrop path it
//! never asked for.

use assert_cmd::cargo::cargo_bin_cmd;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    predicate()
}

#[test]
fn background_start_then_status_then_stop() {
    let dir = tempdir().unwrap();
    let pid_dir = dir.path().join("run");
    let pidfile = pid_dir.join("svc.pid");

    let mut start = cargo_bin_cmd!("daemonctl")
        .arg("--name")
        .arg("svc")
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("start")
        .spawn()
        .unwrap();

    // The invoking process is retained as the helper until the daemon's
    // finish() closes the helper pipe, so this wait returns once startup
    // has genuinely completed rather than racing the pidfile's creation.
    let status = start.wait().unwrap();
    assert!(status.success(), "daemonctl start did not report startup success");

    assert!(
        wait_until(|| pidfile.exists(), Duration::from_secs(5)),
        "pidfile was never created at {}",
        pidfile.display()
    );

    let status_output = cargo_bin_cmd!("daemonctl")
        .arg("--name")
        .arg("svc")
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("status")
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&status_output.stdout);
    assert!(stdout.starts_with("running, pid"), "unexpected status output: {stdout}");

    let marker = pid_dir.join("daemonctl-demo.touch");
    assert!(
        wait_until(|| marker.exists(), Duration::from_secs(5)),
        "the registered privileged action never ran"
    );

    let stop_status = cargo_bin_cmd!("daemonctl")
        .arg("--name")
        .arg("svc")
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("stop")
        .status()
        .unwrap();
    assert!(stop_status.success());

    let final_status = cargo_bin_cmd!("daemonctl")
        .arg("--name")
        .arg("svc")
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("status")
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&final_status.stdout).trim(), "not running");
}

#[test]
fn starting_twice_without_restart_leaves_the_first_instance_running() {
    let dir = tempdir().unwrap();
    let pid_dir = dir.path().join("run");

    let first = cargo_bin_cmd!("daemonctl")
        .arg("--name")
        .arg("svc")
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("start")
        .status()
        .unwrap();
    assert!(first.success());

    let second = cargo_bin_cmd!("daemonctl")
        .arg("--name")
        .arg("svc")
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("start")
        .status()
        .unwrap();
    assert!(!second.success(), "a second instance without --restart should not start");

    let status_output = cargo_bin_cmd!("daemonctl")
        .arg("--name")
        .arg("svc")
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("status")
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&status_output.stdout).starts_with("running, pid"));

    cargo_bin_cmd!("daemonctl")
        .arg("--name")
        .arg("svc")
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("stop")
        .status()
        .unwrap();
}

#[test]
fn restart_evicts_a_live_prior_instance() {
    let dir = tempdir().unwrap();
    let pid_dir = dir.path().join("run");
    let pidfile = pid_dir.join("svc.pid");

    let first = cargo_bin_cmd!("daemonctl")
        .arg("--name")
        .arg("svc")
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("start")
        .status()
        .unwrap();
    assert!(first.success());

    assert!(
        wait_until(|| pidfile.exists(), Duration::from_secs(5)),
        "pidfile was never created at {}",
        pidfile.display()
    );
    let first_pid: i32 =
        std::fs::read_to_string(&pidfile).unwrap().trim().parse().unwrap();

    let second = cargo_bin_cmd!("daemonctl")
        .arg("--name")
        .arg("svc")
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("start")
        .arg("--restart")
        .status()
        .unwrap();
    assert!(second.success(), "restart should evict the prior instance and start cleanly");

    assert!(
        wait_until(
            || std::fs::read_to_string(&pidfile)
                .ok()
                .and_then(|c| c.trim().parse::<i32>().ok())
                .is_some_and(|pid| pid != first_pid),
            Duration::from_secs(5)
        ),
        "pidfile still names the evicted instance"
    );
    let second_pid: i32 =
        std::fs::read_to_string(&pidfile).unwrap().trim().parse().unwrap();
    assert_ne!(first_pid, second_pid);

    let status_output = cargo_bin_cmd!("daemonctl")
        .arg("--name")
        .arg("svc")
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("status")
        .output()
        .unwrap();
    assert_eq!(
        String::from_utf8_lossy(&status_output.stdout).trim(),
        format!("running, pid {second_pid}")
    );

    cargo_bin_cmd!("daemonctl")
        .arg("--name")
        .arg("svc")
        .arg("--pid-dir")
        .arg(&pid_dir)
        .arg("stop")
        .status()
        .unwrap();
}
