//! Pidfile lock manager.
//!
//! The lock primitive is `fcntl(F_SETLK/F_GETLK)`, not `flock`: only
//! `F_GETLK` reports the holder's pid in its `l_pid` field, which `status`
//! requires. This is also why the crate does not use `fs2` here — `fs2` wraps
//! `flock` and has no way to report a holder pid.

use crate::constants::{PIDFILE_MODE, TERMINATE_POLL_ATTEMPTS, TERMINATE_POLL_INTERVAL};
use crate::error::DaemonError;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::Mode;
use nix::unistd::Pid;
use std::os::unix::io::RawFd;
use std::path::Path;
use std::thread::sleep;

/// Result of probing a pidfile for a live holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No instance is running (file missing or present-but-unlocked/"stale").
    NotRunning,
    /// An instance holds the lock, with this pid.
    Running(i32),
}

impl Status {
    /// Collapses to the plain integer convention used by callers: 0 for "not
    /// running", otherwise the holder pid.
    pub fn as_pid(self) -> i32 {
        match self {
            Status::NotRunning => 0,
            Status::Running(pid) => pid,
        }
    }
}

/// Builds a zeroed `libc::flock` describing a whole-file lock of `lock_type`
/// (`libc::F_WRLCK` or `libc::F_UNLCK`), leaving every field but `l_type` and
/// `l_whence` at its zero value.
fn whole_file_lock(lock_type: libc::c_short) -> libc::flock {
    let mut lock: libc::flock = unsafe { std::mem::zeroed() };
    lock.l_type = lock_type;
    lock.l_whence = libc::SEEK_SET as libc::c_short;
    lock.l_start = 0;
    lock.l_len = 0;
    lock
}

/// Queries whether `path` is held by a live instance, without acquiring it.
/// Opens the file read-only; a missing file is `NotRunning`, not an error. A
/// present-but-unlocked file is `NotRunning` too (a "stale" pidfile), and the
/// caller is expected to log that distinction at debug level since this
/// function itself has no Logger handle.
pub fn status(path: &Path) -> Result<Status, DaemonError> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Status::NotRunning),
        Err(e) => return Err(e.into()),
    };

    let mut lock = whole_file_lock(libc::F_WRLCK as libc::c_short);
    fcntl(std::os::unix::io::AsRawFd::as_raw_fd(&file), FcntlArg::F_GETLK(&mut lock))
        .map_err(|e| DaemonError::system("fcntl(F_GETLK) on pidfile", e))?;

    if lock.l_type == libc::F_UNLCK as libc::c_short {
        Ok(Status::NotRunning)
    } else {
        Ok(Status::Running(lock.l_pid))
    }
}

/// Sends a termination signal to `pid`, then polls at
/// `TERMINATE_POLL_INTERVAL` for up to `TERMINATE_POLL_ATTEMPTS` iterations
/// (≈15s) for it to exit. Returns `Ok(())` as soon as the pid is observed gone,
/// `Err(DaemonError::Transient(pid))` if it outlives the budget.
pub fn terminate_and_wait(pid: i32) -> Result<(), DaemonError> {
    let target = Pid::from_raw(pid);
    if let Err(e) = kill(target, Signal::SIGTERM) {
        if e == nix::Error::ESRCH {
            return Ok(());
        }
        return Err(DaemonError::system("kill(SIGTERM) on prior instance", e));
    }

    for _ in 0..TERMINATE_POLL_ATTEMPTS {
        match kill(target, None) {
            Err(nix::Error::ESRCH) => return Ok(()),
            _ => sleep(TERMINATE_POLL_INTERVAL),
        }
    }

    match kill(target, None) {
        Err(nix::Error::ESRCH) => Ok(()),
        _ => Err(DaemonError::Transient(pid)),
    }
}

/// Acquires the pidfile at `path` for the current process: opens (creating if
/// needed) with close-on-exec, takes a non-blocking exclusive whole-file write
/// lock, truncates, and writes the current pid as ASCII decimal plus a newline.
///
/// On success, intentionally leaks the descriptor (returns the raw fd without
/// an owning `File`): the lock must outlive this function's stack frame for
/// the remainder of the process's life, and process death by any means is
/// exactly what should release it.
///
/// If `restart` is set and a prior instance holds the lock, termination is
/// attempted (via `terminate_and_wait`) before the lock attempt either way:
/// whether or not the prior instance actually died within the termination
/// budget, the subsequent `F_SETLK` call is still made, so the real outcome
/// is decided by the lock rather than by the poll timeout. A conflicting lock
/// produces `DaemonError::Contention`, naming the holder pid and whether a
/// restart was attempted first.
pub fn acquire(path: &Path, restart: bool) -> Result<RawFd, DaemonError> {
    if restart {
        if let Status::Running(holder) = status(path)? {
            // Best-effort: proceed to the lock attempt regardless of whether
            // the prior instance actually exited in time.
            let _ = terminate_and_wait(holder);
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let fd = nix::fcntl::open(
        path,
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_CLOEXEC,
        Mode::from_bits_truncate(PIDFILE_MODE),
    )
    .map_err(|e| DaemonError::system(format!("open({}) for pidfile", path.display()), e))?;

    let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };

    let lock = whole_file_lock(libc::F_WRLCK as libc::c_short);
    if fcntl(fd, FcntlArg::F_SETLK(&lock)).is_err() {
        let holder = status(path).ok().map(Status::as_pid).unwrap_or(0);
        let _ = nix::unistd::close(fd);
        return Err(DaemonError::Contention {
            path: path.display().to_string(),
            holder_pid: holder,
            restart,
        });
    }

    nix::unistd::ftruncate(borrowed, 0)
        .map_err(|e| DaemonError::system("ftruncate pidfile", e))?;

    let contents = format!("{}\n", std::process::id());
    nix::unistd::write(borrowed, contents.as_bytes())
        .map_err(|e| DaemonError::system("write pid to pidfile", e))?;

    Ok(fd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_of_missing_file_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.pid");
        assert_eq!(status(&path).unwrap(), Status::NotRunning);
    }

    #[test]
    fn status_of_unlocked_present_file_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.pid");
        std::fs::write(&path, "12345\n").unwrap();
        assert_eq!(status(&path).unwrap(), Status::NotRunning);
    }

    #[test]
    fn acquire_writes_current_pid_and_locks_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.pid");
        let fd = acquire(&path, false).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("{}\n", std::process::id()));

        match status(&path).unwrap() {
            Status::Running(pid) => assert_eq!(pid, std::process::id() as i32),
            Status::NotRunning => panic!("expected the lock to be held"),
        }

        let _ = nix::unistd::close(fd);
    }

    #[test]
    fn acquire_twice_without_restart_is_contention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.pid");
        let fd = acquire(&path, false).unwrap();

        let err = acquire(&path, false).unwrap_err();
        match err {
            DaemonError::Contention { restart, .. } => assert!(!restart),
            other => panic!("expected Contention, got {other:?}"),
        }

        let _ = nix::unistd::close(fd);
    }

    // Restarting against an actually-live holder requires signaling a real,
    // separate process, which this in-process unit test cannot do safely (the
    // holder here would be the test binary itself). That path is covered
    // out-of-process by the integration test driving two `daemonctl` runs.
    #[test]
    fn restart_against_an_unheld_path_behaves_like_a_normal_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.pid");
        let fd = acquire(&path, true).unwrap();
        let _ = nix::unistd::close(fd);
    }
}
