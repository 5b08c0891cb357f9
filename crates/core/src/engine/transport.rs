//! Transport command templating and pty-backed child spawning.
//!
//! Grounded on `crates/agency/src/utils/command.rs` for the templating
//! idiom and `adapters/pty/spawn.rs` for the portable-pty spawn shape —
//! generalized here to exec the transport command (typically `ssh {host}`)
//! through `/bin/sh -c` rather than a fixed agent binary.

use std::os::fd::{AsRawFd, RawFd};

use portable_pty::{CommandBuilder, PtySize, native_pty_system};

use crate::error::TransportError;

/// Expand a transport command template for `host`. `{host}` is substituted
/// if present; otherwise the host is appended to the template.
pub fn expand_template(template: &str, host: &str) -> String {
  if template.contains("{host}") {
    template.replace("{host}", host)
  } else {
    format!("{template} {host}")
  }
}

pub struct SpawnedTransport {
  master_fd: RawFd,
  child: Box<dyn portable_pty::Child + Send>,
  // Keeping the master alive keeps the fd valid; dropping it closes the fd.
  _master: Box<dyn portable_pty::MasterPty + Send>,
}

impl SpawnedTransport {
  pub fn master_fd(&self) -> RawFd {
    self.master_fd
  }

  pub fn pid(&self) -> Option<u32> {
    self.child.process_id()
  }

  pub fn kill(&mut self) -> std::io::Result<()> {
    self.child.kill()
  }

  pub fn try_wait(&mut self) -> std::io::Result<Option<portable_pty::ExitStatus>> {
    self.child.try_wait()
  }
}

/// Allocate a pty pair and exec `/bin/sh -c "<expanded template>"` on the
/// slave side. The returned master fd is handed to a `PtyChannel`, bypassing
/// portable-pty's conventional reader-thread pattern: the engine drives the
/// fd directly through `EventLoop::step`.
pub fn spawn(template: &str, host: &str) -> Result<SpawnedTransport, TransportError> {
  let command_line = expand_template(template, host);
  let pty_system = native_pty_system();
  let pair = pty_system
    .openpty(PtySize {
      rows: 24,
      cols: 80,
      pixel_width: 0,
      pixel_height: 0,
    })
    .map_err(|err| TransportError::Spawn {
      command: command_line.clone(),
      source: std::io::Error::other(err.to_string()),
    })?;

  let mut cmd = CommandBuilder::new("/bin/sh");
  cmd.arg("-c");
  cmd.arg(&command_line);

  let child = pair
    .slave
    .spawn_command(cmd)
    .map_err(|err| TransportError::Spawn {
      command: command_line.clone(),
      source: std::io::Error::other(err.to_string()),
    })?;
  drop(pair.slave);

  let master_fd = pair.master.as_raw_fd();
  Ok(SpawnedTransport {
    master_fd,
    child,
    _master: pair.master,
  })
}
