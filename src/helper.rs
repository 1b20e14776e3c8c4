//! Helper IPC: the one-byte framed protocol between the unprivileged daemon and
//! the privileged process retained across the fork(s).
//!
//! Framing: the low 7 bits of a byte carry a request code, the high bit
//! distinguishes a response from a request. Code 0 means "daemon reports
//! startup success"; codes 64..127 invoke the registered privileged action at
//! index `code - 64`; all other codes are a protocol error.

use crate::constants::{MAX_PRIVILEGED_ACTIONS, PCALL_BASE, PCALL_RESPONSE_BIT, PCALL_STARTUP_SUCCESS};
use crate::error::DaemonError;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::io::RawFd;

/// A registered privileged action: a zero-argument, zero-return callback.
pub type PrivilegedAction = Box<dyn Fn() + Send + Sync>;

/// The daemon-side endpoints of the helper pipes. `None` when no helper process
/// exists (`need_helper` was false at `Phase::Forked`).
pub struct HelperLink {
    pub fd_to_helper: RawFd,
    pub fd_from_helper: RawFd,
}

fn read_byte(fd: BorrowedFd<'_>) -> Result<Option<u8>, DaemonError> {
    let mut buf = [0u8; 1];
    loop {
        match nix::unistd::read(fd.as_fd().as_raw_fd(), &mut buf) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(buf[0])),
            Err(nix::Error::EINTR) | Err(nix::Error::EAGAIN) => continue,
            Err(e) => return Err(DaemonError::system("read from helper pipe", e)),
        }
    }
}

fn write_byte(fd: BorrowedFd<'_>, byte: u8) -> Result<(), DaemonError> {
    loop {
        match nix::unistd::write(fd, &[byte]) {
            Ok(_) => return Ok(()),
            Err(nix::Error::EINTR) => continue,
            Err(e) => return Err(DaemonError::system("write to helper pipe", e)),
        }
    }
}

/// Runs in the privileged helper process; never returns. Reads request bytes
/// from `read_fd`, dispatches to `actions`, echoes each request with the high
/// bit set, and exits via `_exit` (skipping both Rust destructors and libc
/// atexit handlers) once the loop ends, either because the pipe closed or a
/// protocol error occurred.
pub fn helper_loop(read_fd: RawFd, write_fd: RawFd, actions: &[PrivilegedAction]) -> ! {
    let read = unsafe { BorrowedFd::borrow_raw(read_fd) };
    let write = unsafe { BorrowedFd::borrow_raw(write_fd) };
    let mut exit_code = 1;

    loop {
        let request = match read_byte(read) {
            Ok(Some(b)) if b < 128 => b,
            Ok(Some(_)) | Err(_) => break,
            Ok(None) => break,
        };

        if request == PCALL_STARTUP_SUCCESS {
            exit_code = 0;
        } else if request >= PCALL_BASE {
            let index = (request - PCALL_BASE) as usize;
            if let Some(action) = actions.get(index) {
                action();
            } else {
                break;
            }
        } else {
            break;
        }

        if write_byte(write, request | PCALL_RESPONSE_BIT).is_err() {
            break;
        }
    }

    unsafe { libc::_exit(exit_code) }
}

/// Daemon-side invocation of privileged action `index`. If `will_privdrop` is
/// false there is no helper to talk to (or there is one but privileges were
/// never dropped, so there's nothing gained by crossing the pipe): the action
/// simply runs in-process. Otherwise sends the request byte and blocks for the
/// echoed response, failing fatally (from the caller's point of view: as a
/// `DaemonError::Bug`) on desync.
pub fn invoke(
    link: Option<&HelperLink>,
    index: usize,
    will_privdrop: bool,
    actions: &[PrivilegedAction],
) -> Result<(), DaemonError> {
    if index >= actions.len() {
        return Err(DaemonError::bug(format!(
            "privileged action index {index} was never registered"
        )));
    }

    if !will_privdrop {
        actions[index]();
        return Ok(());
    }

    let link = link.ok_or_else(|| {
        DaemonError::bug("privilege was dropped but no helper link exists")
    })?;

    let request = PCALL_BASE + index as u8;
    let to = unsafe { BorrowedFd::borrow_raw(link.fd_to_helper) };
    let from = unsafe { BorrowedFd::borrow_raw(link.fd_from_helper) };

    write_byte(to, request)?;
    let response = read_byte(from)?.ok_or_else(|| {
        DaemonError::bug("helper closed its pipe without responding")
    })?;

    if response != (request | PCALL_RESPONSE_BIT) {
        return Err(DaemonError::bug(format!(
            "helper protocol desync: sent {request:#x}, got {response:#x} back"
        )));
    }

    Ok(())
}

/// Sends the "startup success" byte and waits for its echo, the daemon side of
/// `finish`. Returns an error (never escalates itself) so the caller can decide
/// how fatally to treat it, matching the fatal-at-the-edges error design.
pub fn send_startup_success(link: &HelperLink) -> Result<(), DaemonError> {
    let to = unsafe { BorrowedFd::borrow_raw(link.fd_to_helper) };
    let from = unsafe { BorrowedFd::borrow_raw(link.fd_from_helper) };

    write_byte(to, PCALL_STARTUP_SUCCESS)?;
    let response = read_byte(from)?.ok_or_else(|| {
        DaemonError::bug("helper closed its pipe before acknowledging startup")
    })?;

    if response != PCALL_RESPONSE_BIT {
        return Err(DaemonError::bug(format!(
            "helper acknowledged startup with {response:#x}, expected {PCALL_RESPONSE_BIT:#x}"
        )));
    }

    Ok(())
}

/// Validates a registration against the capacity the wire format allows.
pub fn check_registration_capacity(current_len: usize) -> Result<(), DaemonError> {
    if current_len >= MAX_PRIVILEGED_ACTIONS {
        return Err(DaemonError::bug(format!(
            "cannot register more than {MAX_PRIVILEGED_ACTIONS} privileged actions"
        )));
    }
    Ok(())
}
