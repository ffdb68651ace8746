//! Socket activation.
//!
//! A service manager that starts us on demand passes the listening socket as
//! descriptor 3.

use nix::sys::socket::{getsockopt, sockopt};
use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd};
use tracing::debug;

const LISTEN_FD: RawFd = 3;

/// Take ownership of an inherited listening socket, if there is one.
#[allow(unsafe_code)]
pub fn inherited_listener() -> Option<OwnedFd> {
    // SAFETY: a zero-length read touches no memory; a closed descriptor just
    // fails with EBADF.
    let probe = unsafe { libc::read(LISTEN_FD, std::ptr::null_mut(), 0) };
    if probe != 0 {
        return None;
    }

    // SAFETY: the probe succeeded, so the descriptor is open for the duration
    // of this borrow.
    let borrowed = unsafe { BorrowedFd::borrow_raw(LISTEN_FD) };
    match getsockopt(&borrowed, sockopt::AcceptConn) {
        Ok(true) => {}
        Ok(false) => {
            debug!("Descriptor {} is not a listening socket", LISTEN_FD);
            return None;
        }
        Err(e) => {
            debug!("Descriptor {} is not a socket: {}", LISTEN_FD, e);
            return None;
        }
    }

    // SAFETY: the descriptor was handed to this process by its parent and
    // nothing else in the process owns it.
    Some(unsafe { OwnedFd::from_raw_fd(LISTEN_FD) })
}
