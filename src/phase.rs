//! The daemonization phase machine.
//!
//! Call ordering is enforced at every public entry point by checking the
//! current phase against an `after`/`before` range, plus a per-transition
//! `bool` flag on `Daemon` tracking whether that specific transition already
//! fired. `Daemon` only exists once `init1` has run, so calling anything
//! before that is a compile error rather than a runtime one.

use std::fmt;

/// A point in the daemonization lifecycle. Advances by exactly one step per
/// transition; no phase is ever skipped or revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    Init1 = 1,
    Init2 = 2,
    Init3 = 3,
    Forked = 4,
    Secured = 5,
    PidLocked = 6,
    Finished = 7,
}

impl Phase {
    /// Human-readable name, used in bug messages.
    pub const fn name(self) -> &'static str {
        match self {
            Phase::Init1 => "INIT1",
            Phase::Init2 => "INIT2",
            Phase::Init3 => "INIT3",
            Phase::Forked => "FORKED",
            Phase::Secured => "SECURED",
            Phase::PidLocked => "PIDLOCKED",
            Phase::Finished => "FINISHED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Asserts that `current` is at or after `floor`. Intended to be called at the
/// top of every phase-transition and lifecycle method; on violation, writes
/// directly to standard error (the Logger is not guaranteed reachable when this
/// fires — in particular it cannot fire before `Phase::Init1`, since there is no
/// `Daemon` value yet) and aborts the process before any externally visible
/// side effect.
pub fn require_after(current: Phase, floor: Phase, site: &str) {
    if current < floor {
        abort_bug(&format!(
            "{site}: called at phase {current} but requires phase >= {floor}"
        ));
    }
}

/// Asserts that `current` is strictly before `ceiling`.
pub fn require_before(current: Phase, ceiling: Phase, site: &str) {
    if current >= ceiling {
        abort_bug(&format!(
            "{site}: called at phase {current} but requires phase < {ceiling}"
        ));
    }
}

/// Asserts a "unique" call site has not already fired. `already_called` is the
/// per-`Daemon` flag for this specific transition (the Rust analogue of the C
/// macro's per-call-site `static` counter).
pub fn require_unique(already_called: bool, site: &str) {
    if already_called {
        abort_bug(&format!("{site}: called a second time, this is only legal once"));
    }
}

/// Writes a bug message directly to standard error and aborts the process. This
/// is the one path in the whole crate that does not go through the Logger: it
/// exists precisely to cover the case where the Logger itself cannot be trusted
/// (before `Phase::Init1`, or when the phase contract itself has already been
/// violated).
pub fn abort_bug(message: &str) -> ! {
    eprintln!("bug: {message}");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_order_correctly() {
        assert!(Phase::Init1 < Phase::Init2);
        assert!(Phase::Secured < Phase::PidLocked);
        assert!(Phase::PidLocked < Phase::Finished);
    }

    #[test]
    fn require_after_passes_when_equal_or_later() {
        require_after(Phase::Init2, Phase::Init2, "test");
        require_after(Phase::Init3, Phase::Init2, "test");
    }

    #[test]
    fn require_before_passes_when_strictly_earlier() {
        require_before(Phase::Init2, Phase::Init3, "test");
    }
}
