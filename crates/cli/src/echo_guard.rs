//! RAII terminal-echo guard backing `:hide-password`.
//!
//! Grounded on SPEC_FULL.md's resolution of Open Question iii: wrap the
//! termios change in a guard whose `Drop` restores the prior mode, so a
//! panic or an early return from the control loop can never leave the
//! controlling terminal stuck with echo off.

use std::os::fd::BorrowedFd;

use nix::sys::termios::{self, LocalFlags, SetArg, Termios};

pub struct EchoGuard<'fd> {
  fd: BorrowedFd<'fd>,
  original: Termios,
}

impl<'fd> EchoGuard<'fd> {
  /// Disable local echo on `fd`. Returns `Err` if `fd` isn't backed by a
  /// tty (piped stdin in tests, for instance) — callers should treat that
  /// as "nothing to suppress" rather than a fatal error.
  pub fn suppress(fd: BorrowedFd<'fd>) -> nix::Result<Self> {
    let original = termios::tcgetattr(fd)?;
    let mut muted = original.clone();
    muted.local_flags.remove(LocalFlags::ECHO);
    termios::tcsetattr(fd, SetArg::TCSANOW, &muted)?;
    Ok(Self { fd, original })
  }
}

impl Drop for EchoGuard<'_> {
  fn drop(&mut self) {
    let _ = termios::tcsetattr(self.fd, SetArg::TCSANOW, &self.original);
  }
}
