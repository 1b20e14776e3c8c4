//! Constants used throughout the daemonization core.
//!
//! This module centralizes magic numbers that would otherwise be scattered across
//! the phase machine, the format buffer, the pidfile lock manager, and the helper
//! IPC framing.

use std::time::Duration;

// ============================================================================
// Format buffer pool
// ============================================================================

/// Number of per-thread format buffers.
pub const FMTBUF_COUNT: usize = 4;

/// Capacities of the format buffers, smallest first. Each buffer is twice the
/// previous; allocation picks the smallest buffer with enough remaining space.
pub const FMTBUF_SIZES: [usize; FMTBUF_COUNT] = [1024, 4096, 16384, 65536];

// ============================================================================
// Privileged-action table / helper IPC framing
// ============================================================================

/// Maximum number of privileged actions that may be registered. The wire format
/// reserves request codes 64..127 for action indices, giving 64 usable slots.
pub const MAX_PRIVILEGED_ACTIONS: usize = 64;

/// Request code meaning "startup succeeded", sent exactly once by the daemon.
pub const PCALL_STARTUP_SUCCESS: u8 = 0;

/// First request code used for privileged-action invocation; action `i` is
/// requested as `PCALL_BASE + i`.
pub const PCALL_BASE: u8 = 64;

/// High bit set on a response byte to distinguish it from a request byte.
pub const PCALL_RESPONSE_BIT: u8 = 0x80;

// ============================================================================
// Pidfile
// ============================================================================

/// Filesystem mode applied to a newly created or chowned pidfile.
pub const PIDFILE_MODE: u32 = 0o644;

/// Filesystem mode applied to a newly created or chmod'd pid directory.
pub const PIDDIR_MODE: u32 = 0o755;

// ============================================================================
// Termination polling
// ============================================================================

/// Interval between liveness checks while waiting for a terminated process to exit.
pub const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Number of liveness checks attempted before giving up, ≈15s total at the
/// interval above.
pub const TERMINATE_POLL_ATTEMPTS: u32 = 150;
