//! A Unix daemonization core: double-fork backgrounding, privilege drop with a
//! retained helper process, pidfile-based liveness, and leveled logging that
//! survives a chroot.

#![warn(unused_crate_dependencies)]

/// Constants shared across the phase machine, format buffer, pidfile, and helper IPC.
pub mod constants;

/// The daemonization state machine.
pub mod daemon;

/// Error taxonomy.
pub mod error;

/// Per-thread format-buffer pool backing the logger.
pub mod fmtbuf;

/// Helper-process IPC protocol and the privileged-action table.
pub mod helper;

/// Leveled logging to a duplicated stderr handle and/or syslog.
pub mod logger;

/// Pidfile path computation across a chroot boundary.
pub mod path;

/// Pidfile acquisition, liveness probing, and termination.
pub mod pidfile;

/// The daemonization phase machine.
pub mod phase;

/// Chroot entry and privilege drop, with the reacquire-root self-test.
pub mod privilege;

pub use daemon::Daemon;
pub use error::DaemonError;

// These are real dependencies of the crate's bin target (src/bin/daemonctl.rs)
// but nothing in the library target itself calls into them.
use clap as _;
use ctrlc as _;
use tracing as _;
use tracing_subscriber as _;
