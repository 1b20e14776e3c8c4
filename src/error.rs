//! Error handling for the daemonization core.
//!
//! `Bug`, `Configuration`, `System`, `Contention`, and `Transient` are the
//! categories a caller can observe as a typed `Result::Err`; `Benign` exists
//! only so internal code can name the stale-pidfile case before collapsing it
//! to `Ok(0)`. Even variants a caller would treat as fatal are still returned
//! as an `Err` from their immediate call site — the actual escalation (log at
//! `fatal`, abort) happens in exactly one place, `Daemon::fatal`, so tests can
//! observe the category without tearing down the test process.

use thiserror::Error;

/// Errors surfaced by the daemonization core.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// A phase-contract or internal-invariant violation: calling an entry point
    /// out of order, exhausting the format buffer pool, registering a 65th
    /// privileged action, or a helper-protocol desync.
    #[error("bug: {0}")]
    Bug(String),

    /// A caller-supplied parameter that cannot be honored: a relative path where
    /// an absolute one is required, a chroot target that doesn't exist or isn't
    /// a directory, a chroot without a username, an unknown username, or a
    /// username resolving to uid 0.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A syscall failed: fork, pipe, open, chroot, a set*id call, or the pidfile
    /// lock itself.
    #[error("system error: {message}: {source}")]
    System {
        message: String,
        #[source]
        source: nix::Error,
    },

    /// The pidfile is already held by another live instance. `restart`
    /// records whether a restart was attempted first, so the message can
    /// distinguish "already running" from "restart failed to evict the
    /// prior instance".
    #[error("{}", contention_message(path, *holder_pid, *restart))]
    Contention { path: String, holder_pid: i32, restart: bool },

    /// A prior instance did not die within the termination poll's budget.
    #[error("pid {0} did not exit within the termination timeout")]
    Transient(i32),

    /// A pidfile is present on disk but not locked. Never surfaced to a caller
    /// as an `Err` — `status` collapses this to `Ok(0)` after logging at debug.
    #[error("stale pidfile at {0}")]
    Benign(String),
}

fn contention_message(path: &str, holder_pid: i32, restart: bool) -> String {
    if restart {
        format!(
            "{path} is still locked by pid {holder_pid}: restart could not evict the prior instance"
        )
    } else {
        format!("{path} is already locked by pid {holder_pid}")
    }
}

impl DaemonError {
    pub fn system(message: impl Into<String>, source: nix::Error) -> Self {
        DaemonError::System { message: message.into(), source }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        DaemonError::Configuration(message.into())
    }

    pub fn bug(message: impl Into<String>) -> Self {
        DaemonError::Bug(message.into())
    }
}

impl From<std::io::Error> for DaemonError {
    fn from(err: std::io::Error) -> Self {
        DaemonError::System {
            message: "I/O operation failed".to_string(),
            source: nix::Error::from_raw(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }
}
