//! Termination signals delivered through a signal descriptor.
//!
//! SIGINT and SIGTERM are blocked before the runtime starts, so every thread
//! inherits the mask and the signals are only ever observed by reading the
//! descriptor.

use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use std::io;
use tokio::io::unix::AsyncFd;

/// Signals that stop the service.
pub const TERMINATION_SIGNALS: [Signal; 2] = [Signal::SIGINT, Signal::SIGTERM];

/// Block the termination signals for the calling thread and its children.
pub fn block_termination_signals() -> nix::Result<SigSet> {
    let mut mask = SigSet::empty();
    for signal in TERMINATION_SIGNALS {
        mask.add(signal);
    }
    mask.thread_block()?;
    Ok(mask)
}

/// Map a raw signal number to a termination signal, if it is one.
pub fn termination_signal(signo: u32) -> Option<Signal> {
    let signal = i32::try_from(signo)
        .ok()
        .and_then(|n| Signal::try_from(n).ok())?;
    TERMINATION_SIGNALS.contains(&signal).then_some(signal)
}

/// Readiness source for blocked signals.
pub struct SignalChannel {
    fd: AsyncFd<SignalFd>,
}

impl SignalChannel {
    /// Must be called inside the runtime.
    pub fn new(mask: &SigSet) -> io::Result<Self> {
        let sfd = SignalFd::with_flags(mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)?;
        Ok(Self {
            fd: AsyncFd::new(sfd)?,
        })
    }

    /// Wait for one signal record and return its raw signal number.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> io::Result<u32> {
        loop {
            let mut guard = self.fd.readable_mut().await?;
            let read = guard.try_io(|fd| match fd.get_mut().read_signal() {
                Ok(Some(info)) => Ok(info.ssi_signo),
                Ok(None) => Err(io::ErrorKind::WouldBlock.into()),
                Err(errno) => Err(io::Error::from(errno)),
            });
            match read {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }
}
