//! C1: the line-buffered I/O endpoint.
//!
//! Wraps one raw fd — the controller end of a pseudo-terminal pair — with a
//! read buffer and a write buffer. Every operation is non-blocking; C5 is the
//! only thing allowed to wait for readiness.

use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::unistd::{close, read, write};

use crate::error::{EngineError, Result};

/// Soft ceiling on read-buffer growth. Crossing it is a hard error, not a
/// silent drop, so an operator sees the dispatcher disconnect rather than a
/// silently truncated stream.
pub const MAX_BUFFER_BYTES: usize = 1024 * 1024;

pub struct PtyChannel {
  fd: RawFd,
  display_name: String,
  pub read_buffer: Vec<u8>,
  pub write_buffer: Vec<u8>,
}

impl PtyChannel {
  /// Take ownership of `fd`, switching it to non-blocking mode.
  pub fn new(fd: RawFd, display_name: impl Into<String>) -> Result<Self> {
    let display_name = display_name.into();
    set_nonblocking(fd).map_err(|source| EngineError::Io {
      display_name: display_name.clone(),
      source,
    })?;
    Ok(Self {
      fd,
      display_name,
      read_buffer: Vec::new(),
      write_buffer: Vec::new(),
    })
  }

  pub fn fd(&self) -> RawFd {
    self.fd
  }

  pub fn readable(&self) -> bool {
    self.read_buffer.len() < MAX_BUFFER_BYTES
  }

  pub fn writable(&self) -> bool {
    !self.write_buffer.is_empty()
  }

  /// Perform one non-blocking read, append to `read_buffer`, and return the
  /// bytes just read. An `EOF` (zero-length read) or hard error is surfaced
  /// so the owning dispatcher can disconnect.
  pub fn handle_read(&mut self) -> Result<Vec<u8>> {
    let mut buf = [0u8; 64 * 1024];
    let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(self.fd) };
    loop {
      match read(borrowed, &mut buf) {
        Ok(0) => {
          return Err(EngineError::Io {
            display_name: self.display_name.clone(),
            source: std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "pty closed"),
          });
        }
        Ok(n) => {
          if self.read_buffer.len() + n > MAX_BUFFER_BYTES {
            return Err(EngineError::BufferOverflow {
              display_name: self.display_name.clone(),
              limit: MAX_BUFFER_BYTES,
            });
          }
          self.read_buffer.extend_from_slice(&buf[..n]);
          return Ok(buf[..n].to_vec());
        }
        Err(Errno::EAGAIN) => return Ok(Vec::new()),
        Err(Errno::EINTR) => continue,
        Err(errno) => {
          return Err(EngineError::Io {
            display_name: self.display_name.clone(),
            source: std::io::Error::from(errno),
          });
        }
      }
    }
  }

  /// Issue one non-blocking write of as many buffered bytes as the kernel
  /// will accept right now, trimming the buffer by that count.
  pub fn handle_write(&mut self) -> Result<usize> {
    if self.write_buffer.is_empty() {
      return Ok(0);
    }
    loop {
      match write(
        unsafe { std::os::fd::BorrowedFd::borrow_raw(self.fd) },
        &self.write_buffer,
      ) {
        Ok(n) => {
          self.write_buffer.drain(..n);
          return Ok(n);
        }
        Err(Errno::EAGAIN) => return Ok(0),
        Err(Errno::EINTR) => continue,
        Err(errno) => {
          return Err(EngineError::Io {
            display_name: self.display_name.clone(),
            source: std::io::Error::from(errno),
          });
        }
      }
    }
  }

  /// Append-only, never blocks.
  pub fn dispatch_write(&mut self, bytes: &[u8]) -> Result<()> {
    if self.write_buffer.len() + bytes.len() > MAX_BUFFER_BYTES {
      return Err(EngineError::BufferOverflow {
        display_name: self.display_name.clone(),
        limit: MAX_BUFFER_BYTES,
      });
    }
    self.write_buffer.extend_from_slice(bytes);
    Ok(())
  }
}

impl Drop for PtyChannel {
  fn drop(&mut self) {
    let _ = close(self.fd);
  }
}

fn set_nonblocking(fd: RawFd) -> std::io::Result<()> {
  let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(std::io::Error::from)?;
  let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
  fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(std::io::Error::from)?;
  Ok(())
}
